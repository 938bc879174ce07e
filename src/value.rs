//! Runtime values and assignment targets.

use crate::token::VarId;
use alloc::rc::Rc;
use basmi_core::{BasicError, ErrorCode, ExtendInto, TryTruncateInto, ValueType};

/// A value held by the operand stack, a variable or an array element.
///
/// The numeric shapes follow the scalar promotion order of
/// [`ValueType`]; strings share their payload by reference counting, so a
/// value popped from the stack stays valid however the variable it came
/// from is reassigned. Array values refer to the variable owning the
/// descriptor.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Unsigned 8-bit byte.
    U8(u8),
    /// 32-bit signed integer.
    I32(i32),
    /// 64-bit signed integer.
    I64(i64),
    /// 64-bit float.
    F64(f64),
    /// String payload.
    Str(Rc<str>),
    /// Reference to a whole array.
    Array(VarId),
}

impl Value {
    /// The scalar type of a numeric value.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` for strings and arrays.
    pub fn scalar_type(&self) -> Result<ValueType, BasicError> {
        match self {
            Value::U8(_) => Ok(ValueType::U8),
            Value::I32(_) => Ok(ValueType::I32),
            Value::I64(_) => Ok(ValueType::I64),
            Value::F64(_) => Ok(ValueType::F64),
            Value::Str(_) | Value::Array(_) => Err(ErrorCode::TypeMismatch.into()),
        }
    }

    /// Whether this value is a string.
    pub fn is_string(&self) -> bool {
        matches!(self, Value::Str(_))
    }

    /// Pops "any integer": bytes and integers pass through, floats round
    /// to the nearest integer with a range check.
    pub fn to_i64(&self) -> Result<i64, BasicError> {
        match self {
            Value::U8(value) => Ok(value.extend_into()),
            Value::I32(value) => Ok(value.extend_into()),
            Value::I64(value) => Ok(*value),
            Value::F64(value) => Ok(value.round().try_truncate_into()?),
            Value::Str(_) | Value::Array(_) => Err(ErrorCode::TypeMismatch.into()),
        }
    }

    /// As [`Value::to_i64`] but narrowed to 32 bits with a range check.
    pub fn to_i32(&self) -> Result<i32, BasicError> {
        match self {
            Value::U8(value) => Ok(value.extend_into()),
            Value::I32(value) => Ok(*value),
            Value::I64(value) => Ok((*value).try_truncate_into()?),
            Value::F64(value) => Ok(value.round().try_truncate_into()?),
            Value::Str(_) | Value::Array(_) => Err(ErrorCode::TypeMismatch.into()),
        }
    }

    /// Pops "any numeric" as a float.
    pub fn to_f64(&self) -> Result<f64, BasicError> {
        match self {
            Value::U8(value) => Ok(value.extend_into()),
            Value::I32(value) => Ok(value.extend_into()),
            Value::I64(value) => Ok(value.extend_into()),
            Value::F64(value) => Ok(*value),
            Value::Str(_) | Value::Array(_) => Err(ErrorCode::TypeMismatch.into()),
        }
    }

    /// Borrows the string payload.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` for numeric and array values.
    pub fn as_str(&self) -> Result<&str, BasicError> {
        match self {
            Value::Str(text) => Ok(text),
            _ => Err(ErrorCode::TypeMismatch.into()),
        }
    }

    /// Takes the string payload.
    pub fn into_str(self) -> Result<Rc<str>, BasicError> {
        match self {
            Value::Str(text) => Ok(text),
            _ => Err(ErrorCode::TypeMismatch.into()),
        }
    }

    /// The truth convention: zero is false, anything else is true.
    pub fn is_true(&self) -> Result<bool, BasicError> {
        match self {
            Value::U8(value) => Ok(*value != 0),
            Value::I32(value) => Ok(*value != 0),
            Value::I64(value) => Ok(*value != 0),
            Value::F64(value) => Ok(*value != 0.0),
            Value::Str(_) | Value::Array(_) => Err(ErrorCode::TypeMismatch.into()),
        }
    }
}

impl From<bool> for Value {
    /// `TRUE` is all bits set.
    fn from(flag: bool) -> Self {
        Value::I32(if flag { -1 } else { 0 })
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::I32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::I64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::F64(value)
    }
}

impl From<Rc<str>> for Value {
    fn from(text: Rc<str>) -> Self {
        Value::Str(text)
    }
}

/// An assignment target.
///
/// Statics and scalars address variable storage; elements address one slot
/// of a dimensioned array; the `*At` shapes address the byte window through
/// the indirection operators.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Lvalue {
    /// Static integer slot (`A%`..`Z%`, `@%`).
    Static(u8),
    /// A named scalar variable.
    Scalar(VarId),
    /// One element of an array, by flattened index.
    Element { array: VarId, index: u32 },
    /// A whole array, for `SWAP` and parameter passing.
    WholeArray(VarId),
    /// `?addr` — a byte in the window.
    ByteAt(u32),
    /// `!addr` — a 32-bit word in the window.
    WordAt(u32),
    /// `|addr` — a 64-bit float in the window.
    FloatAt(u32),
    /// `$addr` — a carriage-return terminated string in the window.
    StringAt(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_pops_round_floats() {
        assert_eq!(Value::F64(1.6).to_i64().unwrap(), 2);
        assert_eq!(Value::F64(-1.6).to_i64().unwrap(), -2);
        assert_eq!(Value::F64(1.4).to_i32().unwrap(), 1);
        assert_eq!(
            Value::F64(3e10).to_i32().unwrap_err().code(),
            ErrorCode::NumberTooBig
        );
    }

    #[test]
    fn string_values_are_not_numeric() {
        let text = Value::Str("10".into());
        assert_eq!(text.to_i64().unwrap_err().code(), ErrorCode::TypeMismatch);
        assert_eq!(text.as_str().unwrap(), "10");
    }

    #[test]
    fn truth_convention() {
        assert!(Value::from(true).is_true().unwrap());
        assert_eq!(Value::from(true), Value::I32(-1));
        assert!(!Value::I32(0).is_true().unwrap());
        assert!(Value::F64(0.5).is_true().unwrap());
    }
}
