//! The token stream executed by the interpreter.
//!
//! A compiled program is a flat sequence of [`Token`]s addressed by a `u32`
//! program counter, mirroring the byte-encoded form the classic tokenizers
//! produce: one-byte opcodes, many followed by inline operands. In this
//! memory-safe rendition operands are carried inside tagged enum variants
//! instead of raw operand bytes, and the "self-modifying" resolution of
//! forward references replaces a token with its resolved variant in place:
//!
//! - `LineRef(number)` becomes `LineTarget(pc)` once the target line has
//!   been located,
//! - `ProcUnres`/`FnUnres` become `ProcCall`/`FnCall` carrying the resolved
//!   subprogram record,
//! - `If` becomes `IfSingle` or `IfBlock` with branch targets filled in,
//! - `Else`, `When` and `Otherwise` gain the continuation address of their
//!   construct,
//! - `Case` becomes `CaseRes` pointing at a prebuilt jump table.
//!
//! Every source line contributes its tokens followed by an [`Token::Eol`]
//! marker (the `0x00` terminator of the byte format); the program ends with
//! a single [`Token::Eof`]. Line records carrying the line number, start pc
//! and original source text are kept beside the code for error reports,
//! `GOTO` resolution and `LIST`-style front ends.

use alloc::{boxed::Box, vec::Vec};

/// Program counter: an index into the token stream.
pub type Pc = u32;

/// Index of an interned name or string literal in the program pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NameId(pub(crate) u32);

/// Index of a `DATA` statement's raw item list.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DataId(pub(crate) u32);

/// Index of a resolved `CASE` jump table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CaseId(pub(crate) u32);

/// Index of a variable record in the heap.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct VarId(pub(crate) u32);

/// Built-in functions and print-item helpers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Function {
    Abs,
    Acs,
    Asc,
    Asn,
    Atn,
    Chr,
    Cos,
    Deg,
    Erl,
    Err,
    Exp,
    False,
    Instr,
    Int,
    Left,
    Len,
    Ln,
    Log,
    Mid,
    Pi,
    Pos,
    Rad,
    ReportStr,
    Right,
    Rnd,
    Sgn,
    Sin,
    Spc,
    Sqr,
    Str,
    StringRep,
    Tab,
    Tan,
    Time,
    True,
    Val,
}

/// A single element of the executable token stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    /// End of a source line.
    Eol,
    /// End of the program.
    Eof,
    /// `:` statement separator.
    Colon,

    // Statement keywords.
    Let,
    Print,
    Input,
    /// `INPUT LINE` / `LINE INPUT` whole-line input.
    InputLine,
    Def,
    Endproc,
    Local,
    Dim,
    Himem,
    Read,
    Restore,
    Swap,
    End,
    Stop,
    Quit,
    Report,
    Clear,
    Run,
    Library,
    Oscli,
    Wait,
    Goto,
    Gosub,
    Return,
    On,
    Error,
    Off,
    /// `[` opens an assembler block, which this engine rejects.
    Asm,

    // IF family.
    If,
    /// Single-line `IF` with both branch targets resolved.
    IfSingle {
        /// First token of the THEN arm.
        then_pc: Pc,
        /// First token of the ELSE arm, or the end of the line.
        else_pc: Pc,
    },
    /// Block `IF` with both branch targets resolved.
    IfBlock {
        /// First token of the block body.
        then_pc: Pc,
        /// Continuation after `ELSE` (or after `ENDIF` if there is none).
        else_pc: Pc,
    },
    Then,
    Else,
    /// `ELSE` inside a block `IF`, resolved to jump past the `ENDIF`.
    ElseJump(Pc),
    Endif,

    // CASE family.
    Case,
    /// `CASE` with its jump table built.
    CaseRes(CaseId),
    Of,
    When,
    /// `WHEN` reached by fall-through, resolved to jump past `ENDCASE`.
    WhenJump(Pc),
    Otherwise,
    /// `OTHERWISE` reached by fall-through, resolved like [`Token::WhenJump`].
    OtherwiseJump(Pc),
    Endcase,

    // Loops.
    For,
    To,
    Step,
    Next,
    While,
    /// `WHILE` with the address after its paired `ENDWHILE` cached.
    WhileRes(Pc),
    Endwhile,
    Repeat,
    Until,

    // Line number references.
    /// Unresolved reference to a line by number.
    LineRef(u16),
    /// Resolved reference: address of the line's first executable token.
    LineTarget(Pc),

    // Subprogram call sites.
    /// Unresolved `PROC` call site carrying the name.
    ProcUnres(NameId),
    /// Resolved `PROC` call site carrying the subprogram record.
    ProcCall(VarId),
    /// Unresolved `FN` call site carrying the name.
    FnUnres(NameId),
    /// Resolved `FN` call site carrying the subprogram record.
    FnCall(VarId),

    /// `DATA` statement; items are kept as raw text and parsed by `READ`.
    Data(DataId),
    /// The bare `DATA` keyword of `LOCAL DATA` and `RESTORE DATA`.
    DataKeyword,

    // Operands.
    IntConst(i64),
    FloatConst(f64),
    StrConst(NameId),
    /// Reference to a named variable; array names keep a trailing `(`.
    Var(NameId),
    /// Static integer slot: 1..=26 for `A%`..`Z%`, 27 for `@%`.
    Static(u8),
    Func(Function),

    // Operators and punctuation.
    Plus,
    Minus,
    Star,
    SlashOp,
    Caret,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Shl,
    Shr,
    ShrU,
    Mod,
    Div,
    And,
    Or,
    Eor,
    Not,
    PlusEq,
    MinusEq,
    Query,
    Pling,
    Dollar,
    Bar,
    Semicolon,
    Comma,
    Apostrophe,
    Tilde,
    LParen,
    RParen,
}

impl Token {
    /// Whether this token terminates a statement.
    ///
    /// `ELSE`, `WHEN` and `OTHERWISE` count as end-of-statement so that the
    /// "at end of line" predicate used by the block resolvers treats them
    /// like line breaks.
    pub(crate) fn ends_statement(&self) -> bool {
        matches!(
            self,
            Token::Eol
                | Token::Eof
                | Token::Colon
                | Token::Else
                | Token::ElseJump(_)
                | Token::When
                | Token::WhenJump(_)
                | Token::Otherwise
                | Token::OtherwiseJump(_)
        )
    }
}

/// A source line's entry in the line index.
#[derive(Debug)]
pub(crate) struct LineEntry {
    /// Line number as written in the source.
    pub number: u16,
    /// Address of the line's first executable token.
    pub pc: Pc,
    /// Original source text, whitespace preserved.
    pub source: Box<str>,
}

/// Raw `DATA` items of one statement.
#[derive(Debug)]
pub(crate) struct DataBlock {
    /// Number of the line the statement appears on.
    pub line: u16,
    /// The comma-separated item fields, unparsed.
    pub items: Vec<Box<str>>,
}

/// A compiled program: token stream, line index, interned text pool and
/// `DATA` blocks.
///
/// Libraries installed with [`crate::Interpreter::install_library`] append
/// their tokens after the main program; the boundary and per-library ranges
/// are recorded so symbol lookups can select the right table.
#[derive(Debug, Default)]
pub struct Program {
    pub(crate) code: Vec<Token>,
    pub(crate) lines: Vec<LineEntry>,
    pub(crate) pool: Vec<Box<str>>,
    pub(crate) data: Vec<DataBlock>,
    /// Token ranges of installed libraries, in installation order.
    pub(crate) library_ranges: Vec<(Pc, Pc)>,
}

impl Program {
    /// Compiles source text into a program.
    ///
    /// # Errors
    ///
    /// Returns `Err` if a line cannot be tokenized.
    pub fn compile(source: &str) -> Result<Program, crate::Error> {
        crate::prepare::compile(source)
    }

    /// Returns the token at `pc`.
    ///
    /// # Panics
    ///
    /// Panics if `pc` is outside the program; the compiler always terminates
    /// the stream with [`Token::Eof`] so a cursor that only moves through
    /// intra-program targets never runs out.
    #[inline]
    pub(crate) fn token(&self, pc: Pc) -> &Token {
        &self.code[pc as usize]
    }

    /// Replaces the token at `pc` with its resolved form.
    #[inline]
    pub(crate) fn patch(&mut self, pc: Pc, token: Token) {
        self.code[pc as usize] = token;
    }

    /// Returns the interned text for `id`.
    #[inline]
    pub(crate) fn name(&self, id: NameId) -> &str {
        &self.pool[id.0 as usize]
    }

    /// Interns `text`, reusing an existing pool entry when possible.
    pub(crate) fn intern(&mut self, text: &str) -> NameId {
        if let Some(position) = self.pool.iter().position(|entry| &**entry == text) {
            return NameId(position as u32);
        }
        self.pool.push(text.into());
        NameId((self.pool.len() - 1) as u32)
    }

    /// Looks up a line by number with a linear scan from the program start.
    ///
    /// Only main-program lines participate; library lines are not valid
    /// `GOTO`/`GOSUB`/`RESTORE` targets.
    pub(crate) fn find_line(&self, number: u16) -> Option<&LineEntry> {
        let main_end = self.main_end();
        self.lines
            .iter()
            .take_while(|entry| entry.pc < main_end)
            .find(|entry| entry.number == number)
    }

    /// Returns the source line containing `pc`, if any.
    pub(crate) fn line_of(&self, pc: Pc) -> Option<&LineEntry> {
        match self.lines.binary_search_by(|entry| entry.pc.cmp(&pc)) {
            Ok(index) => Some(&self.lines[index]),
            Err(0) => None,
            Err(index) => Some(&self.lines[index - 1]),
        }
    }

    /// Returns the line number containing `pc`, or zero.
    pub(crate) fn line_number_of(&self, pc: Pc) -> u16 {
        self.line_of(pc).map(|entry| entry.number).unwrap_or(0)
    }

    /// The pc just past the main program (the start of library space).
    pub(crate) fn main_end(&self) -> Pc {
        self.library_ranges
            .first()
            .map(|(start, _)| *start)
            .unwrap_or(self.code.len() as Pc)
    }

    /// Returns the index of the library whose token range contains `pc`.
    pub(crate) fn library_of(&self, pc: Pc) -> Option<usize> {
        self.library_ranges
            .iter()
            .position(|(start, end)| (*start..*end).contains(&pc))
    }

    /// Entry pc of the program: the first executable token.
    pub(crate) fn entry(&self) -> Pc {
        self.lines.first().map(|entry| entry.pc).unwrap_or(0)
    }

    /// Appends a tokenized library and records its range.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the library source cannot be tokenized.
    pub(crate) fn append_library(&mut self, source: &str) -> Result<usize, crate::Error> {
        crate::prepare::append_library(self, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_reuses_entries() {
        let mut program = Program::default();
        let a = program.intern("count%");
        let b = program.intern("total");
        let c = program.intern("count%");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(program.name(a), "count%");
    }

    #[test]
    fn line_lookup_by_pc() {
        let mut program = Program::default();
        program.code = vec![
            Token::Print,
            Token::Eol,
            Token::Print,
            Token::Eol,
            Token::Eof,
        ];
        program.lines.push(LineEntry {
            number: 10,
            pc: 0,
            source: "10 PRINT".into(),
        });
        program.lines.push(LineEntry {
            number: 20,
            pc: 2,
            source: "20 PRINT".into(),
        });
        assert_eq!(program.line_number_of(0), 10);
        assert_eq!(program.line_number_of(1), 10);
        assert_eq!(program.line_number_of(2), 20);
        assert_eq!(program.line_number_of(4), 20);
        assert_eq!(program.find_line(20).unwrap().pc, 2);
        assert!(program.find_line(30).is_none());
    }
}
