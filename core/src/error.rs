use alloc::boxed::Box;
use core::fmt::{self, Display};

/// Error kind raised by executing BASIC code.
///
/// Each kind carries the classic numeric error code reported to programs
/// through `ERR` and printed by the default handler. Kinds whose message
/// mentions a name or a line number take the parameter from the
/// [`BasicError`] that wraps them.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ErrorCode {
    /// A statement could not be parsed.
    Syntax,
    /// A `FOR` loop was given a zero `STEP`.
    Silly,
    /// The escape key was pressed.
    Escape,
    /// Attempt to divide by zero, integer or float.
    DivisionByZero,
    /// A string exceeded the maximum string length.
    StringTooLong,
    /// A value does not fit the integer width it is converted to.
    NumberTooBig,
    /// `SQR` of a negative number.
    NegativeRoot,
    /// `LN` or `LOG` of a non-positive number.
    LogRange,
    /// A float operation lost all significance (inverse trig out of domain).
    AccuracyLost,
    /// `EXP` or `^` overflowed the float range.
    ExpRange,
    /// Conversion of a NaN to an integer.
    BadConversion,
    /// A name was used before any assignment created it.
    NoSuchVariable,
    /// A string operand appeared where a number was needed, or vice versa.
    TypeMismatch,
    /// `=` was executed outside any function call.
    NotInFunction,
    /// An array was declared with an invalid bound.
    BadDim,
    /// `DIM` on an array that already has a descriptor.
    AlreadyDimensioned,
    /// There is no room left in the byte window for a `DIM` block.
    DimSpace,
    /// `LOCAL` outside of any procedure or function.
    NotLocal,
    /// An array subscript is outside the bounds of its dimension.
    BadSubscript,
    /// An array was used before being dimensioned.
    Undimensioned,
    /// Reference to an array with the wrong number of subscripts.
    BadDimCount,
    /// No `DEF PROC`/`DEF FN` matches a call site.
    NoSuchProcFn,
    /// A call supplied fewer or more arguments than the definition declares.
    ArgumentCount,
    /// A `RETURN` parameter was bound to something that is not an lvalue.
    BadCall,
    /// `ENDPROC` executed with no procedure active.
    NoProc,
    /// `NEXT` executed with no matching `FOR` frame.
    NoFor,
    /// `UNTIL` executed with no matching `REPEAT` frame.
    NoRepeat,
    /// `ENDWHILE` executed with no matching `WHILE` frame.
    NoWhile,
    /// `RETURN` executed with no `GOSUB` frame.
    NoGosub,
    /// `ON` selector is not a valid index into the target list.
    OnRange,
    /// Malformed `ON` statement.
    OnSyntax,
    /// A line number reference does not exist in the program.
    LineMissing,
    /// `READ` past the last `DATA` item.
    OutOfData,
    /// A block `IF` could not find its `ENDIF`.
    MissingEndif,
    /// A `CASE` could not find its `ENDCASE`.
    MissingEndcase,
    /// Missing `OF` after the `CASE` selector.
    MissingOf,
    /// A false `WHILE` could not find its `ENDWHILE`.
    MissingEndwhile,
    /// The value stack hit its low water mark.
    StackFull,
    /// A load or store fell outside the byte window.
    WindowRange,
    /// The statement is recognized but not supported by this interpreter.
    Unsupported,
    /// A host call-out (`OSCLI`, keyboard, library loading) failed.
    HostFault,
    /// An engine invariant was violated; never recoverable from BASIC.
    Broken,
}

impl ErrorCode {
    /// Returns the numeric error code visible through `ERR`.
    pub fn number(&self) -> u32 {
        match self {
            ErrorCode::Silly => 0,
            ErrorCode::BadCall => 3,
            ErrorCode::Syntax => 4,
            ErrorCode::TypeMismatch => 6,
            ErrorCode::NotInFunction => 7,
            ErrorCode::BadDim => 10,
            ErrorCode::DimSpace => 11,
            ErrorCode::NotLocal => 12,
            ErrorCode::NoProc => 13,
            ErrorCode::AlreadyDimensioned => 14,
            ErrorCode::BadSubscript => 15,
            ErrorCode::Undimensioned => 14,
            ErrorCode::BadDimCount => 15,
            ErrorCode::Escape => 17,
            ErrorCode::DivisionByZero => 18,
            ErrorCode::StringTooLong => 19,
            ErrorCode::NumberTooBig => 20,
            ErrorCode::NegativeRoot => 21,
            ErrorCode::LogRange => 22,
            ErrorCode::AccuracyLost => 23,
            ErrorCode::ExpRange => 24,
            ErrorCode::BadConversion => 23,
            ErrorCode::NoSuchVariable => 26,
            ErrorCode::NoSuchProcFn => 29,
            ErrorCode::ArgumentCount => 31,
            ErrorCode::NoFor => 32,
            ErrorCode::NoGosub => 38,
            ErrorCode::OnSyntax => 39,
            ErrorCode::OnRange => 40,
            ErrorCode::LineMissing => 41,
            ErrorCode::OutOfData => 42,
            ErrorCode::NoRepeat => 43,
            ErrorCode::NoWhile => 46,
            ErrorCode::MissingEndcase => 47,
            ErrorCode::MissingOf => 37,
            ErrorCode::MissingEndwhile => 49,
            ErrorCode::MissingEndif => 50,
            ErrorCode::StackFull => 0,
            ErrorCode::WindowRange => 1,
            ErrorCode::Unsupported => 2,
            ErrorCode::HostFault => 254,
            ErrorCode::Broken => 0,
        }
    }

    /// Returns the message template for this error kind.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::Syntax => "Syntax error",
            ErrorCode::Silly => "Silly",
            ErrorCode::Escape => "Escape",
            ErrorCode::DivisionByZero => "Division by zero",
            ErrorCode::StringTooLong => "String too long",
            ErrorCode::NumberTooBig => "Number too big",
            ErrorCode::NegativeRoot => "-ve root",
            ErrorCode::LogRange => "Log range",
            ErrorCode::AccuracyLost => "Accuracy lost",
            ErrorCode::ExpRange => "Exp range",
            ErrorCode::BadConversion => "Accuracy lost",
            ErrorCode::NoSuchVariable => "No such variable",
            ErrorCode::TypeMismatch => "Type mismatch",
            ErrorCode::NotInFunction => "Not in a function",
            ErrorCode::BadDim => "Bad DIM",
            ErrorCode::AlreadyDimensioned => "Already dimensioned",
            ErrorCode::DimSpace => "DIM space",
            ErrorCode::NotLocal => "Not LOCAL",
            ErrorCode::BadSubscript => "Subscript out of range",
            ErrorCode::Undimensioned => "Array not dimensioned",
            ErrorCode::BadDimCount => "Wrong number of subscripts",
            ErrorCode::NoSuchProcFn => "No such FN/PROC",
            ErrorCode::ArgumentCount => "Arguments",
            ErrorCode::BadCall => "Bad call",
            ErrorCode::NoProc => "Not in a procedure",
            ErrorCode::NoFor => "No FOR",
            ErrorCode::NoRepeat => "No REPEAT",
            ErrorCode::NoWhile => "No WHILE",
            ErrorCode::NoGosub => "No GOSUB",
            ErrorCode::OnRange => "ON range",
            ErrorCode::OnSyntax => "ON syntax",
            ErrorCode::LineMissing => "Line not found",
            ErrorCode::OutOfData => "Out of DATA",
            ErrorCode::MissingEndif => "Missing ENDIF",
            ErrorCode::MissingEndcase => "Missing ENDCASE",
            ErrorCode::MissingOf => "OF missing",
            ErrorCode::MissingEndwhile => "Missing ENDWHILE",
            ErrorCode::StackFull => "No room",
            ErrorCode::WindowRange => "Address out of range",
            ErrorCode::Unsupported => "Unsupported statement",
            ErrorCode::HostFault => "Host error",
            ErrorCode::Broken => "The interpreter has gone wrong",
        }
    }

    /// Whether a BASIC-level `ON ERROR` handler may trap this error.
    ///
    /// `Broken` reports an engine invariant violation and always propagates
    /// to the embedder.
    pub fn is_trappable(&self) -> bool {
        !matches!(self, ErrorCode::Broken)
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

/// An error raised during execution, carrying its kind and the optional
/// name and line parameters of the raise site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicError {
    code: ErrorCode,
    name: Option<Box<str>>,
    line: Option<u16>,
}

impl BasicError {
    /// Creates a new error of the given kind with no parameters.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            name: None,
            line: None,
        }
    }

    /// Creates a new error carrying the name it refers to (a variable,
    /// procedure, function or component name).
    pub fn with_name(code: ErrorCode, name: impl Into<Box<str>>) -> Self {
        Self {
            code,
            name: Some(name.into()),
            line: None,
        }
    }

    /// Returns the error kind.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Returns the name parameter, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the line the error was raised at, if known.
    pub fn line(&self) -> Option<u16> {
        self.line
    }

    /// Attaches the raise-site line number, keeping an already recorded one.
    pub fn at_line(mut self, line: u16) -> Self {
        self.line.get_or_insert(line);
        self
    }
}

impl From<ErrorCode> for BasicError {
    fn from(code: ErrorCode) -> Self {
        BasicError::new(code)
    }
}

impl Display for BasicError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.code.message())?;
        if let Some(name) = &self.name {
            write!(f, " {}", name)?;
        }
        if let Some(line) = self.line {
            write!(f, " at line {}", line)?;
        }
        Ok(())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BasicError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classic_numbers() {
        assert_eq!(ErrorCode::Escape.number(), 17);
        assert_eq!(ErrorCode::DivisionByZero.number(), 18);
        assert_eq!(ErrorCode::NoSuchVariable.number(), 26);
        assert_eq!(ErrorCode::OutOfData.number(), 42);
        assert_eq!(ErrorCode::Silly.number(), 0);
    }

    #[test]
    fn display_includes_parameters() {
        let err = BasicError::with_name(ErrorCode::NoSuchVariable, "width").at_line(120);
        assert_eq!(err.to_string(), "No such variable width at line 120");
    }

    #[test]
    fn broken_is_not_trappable() {
        assert!(!ErrorCode::Broken.is_trappable());
        assert!(ErrorCode::Escape.is_trappable());
    }
}
