//! The value stack: one stack of typed frames for operands and control.
//!
//! Every frame is tagged by its [`Frame`] variant. Operand values,
//! loop heads, subroutine and subprogram returns, saved locals, saved
//! `RETURN` parameters, saved error handlers and saved `DATA` cursors all
//! share this single stack, so properly nested constructs give the
//! stack-balance guarantee: the stack pointer after a closer equals its
//! value before the matching opener.
//!
//! Popping with a kind expectation is checked; a mismatch means the engine
//! itself is confused and surfaces as a `Broken` error rather than being
//! recoverable from BASIC. Unwinding (with per-kind cleanup) is driven by
//! the interpreter, which owns the variable storage the cleanup writes to.

use crate::{
    token::{Pc, VarId},
    value::{Lvalue, Value},
};
use alloc::vec::Vec;
use basmi_core::{BasicError, ErrorCode};

/// Maximum number of frames on the value stack.
pub const DEFAULT_STACK_LIMIT: usize = 16 * 1024;

/// An installed error handler: where to jump and the stack level to reset
/// to when an error transfers here.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct ErrorHandler {
    /// First token of the handler statements.
    pub pc: Pc,
    /// Stack length captured when the handler was installed.
    pub stack_mark: usize,
}

/// Position of the `DATA` cursor: the next item of the next block.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct DataCursor {
    pub block: u32,
    pub item: u32,
}

/// A typed frame on the value stack.
#[derive(Clone, Debug)]
pub(crate) enum Frame {
    /// An operand value.
    Value(Value),
    /// `WHILE` loop head.
    While {
        /// Address of the condition expression.
        cond_pc: Pc,
        /// Address of the first body token.
        body_pc: Pc,
    },
    /// `REPEAT` loop head.
    Repeat {
        /// Address of the first body token.
        body_pc: Pc,
    },
    /// `FOR` loop head.
    For {
        /// The control variable.
        lv: Lvalue,
        /// Address of the first body token.
        body_pc: Pc,
        /// Loop limit, already typed.
        limit: Value,
        /// Loop step, already typed.
        step: Value,
        /// Fast path: 32-bit integer control with step `+1`.
        simple: bool,
    },
    /// `GOSUB` return address.
    Gosub {
        ret_pc: Pc,
    },
    /// Procedure return.
    Proc {
        /// Address to continue at after `ENDPROC`.
        ret_pc: Pc,
        /// The subprogram record being executed.
        def: VarId,
    },
    /// Function return.
    Fn {
        /// Address to continue at after `=`.
        ret_pc: Pc,
        /// The subprogram record being executed.
        def: VarId,
    },
    /// A saved variable installed by `LOCAL` or parameter binding.
    Local {
        lv: Lvalue,
        old: Value,
    },
    /// A saved array descriptor installed by `LOCAL name()` or array
    /// parameter binding.
    LocalArray {
        var: VarId,
        old: Option<crate::heap::ArrayDescriptor>,
    },
    /// A saved `RETURN` parameter: the caller's lvalue to copy back into
    /// and the formal's saved value.
    RetParm {
        ret_lv: Lvalue,
        lv: Lvalue,
        old: Value,
    },
    /// A saved error handler installed by `ON ERROR LOCAL`.
    Error {
        /// The local handler that was active before, if any.
        saved: Option<ErrorHandler>,
    },
    /// A saved `DATA` cursor installed by `LOCAL DATA`.
    Data {
        cursor: DataCursor,
    },
}

impl Frame {
    /// The tag name used in `Broken` diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Frame::Value(_) => "value",
            Frame::While { .. } => "WHILE",
            Frame::Repeat { .. } => "REPEAT",
            Frame::For { .. } => "FOR",
            Frame::Gosub { .. } => "GOSUB",
            Frame::Proc { .. } => "PROC",
            Frame::Fn { .. } => "FN",
            Frame::Local { .. } => "LOCAL",
            Frame::LocalArray { .. } => "LOCAL array",
            Frame::RetParm { .. } => "RETURN parameter",
            Frame::Error { .. } => "ERROR",
            Frame::Data { .. } => "DATA",
        }
    }
}

/// The stack itself: a bounded vector of frames.
#[derive(Debug)]
pub(crate) struct ValueStack {
    frames: Vec<Frame>,
    limit: usize,
}

impl ValueStack {
    /// Creates a stack bounded to `limit` frames.
    pub fn with_limit(limit: usize) -> ValueStack {
        ValueStack {
            frames: Vec::new(),
            limit,
        }
    }

    /// Attempts to push a frame.
    ///
    /// # Errors
    ///
    /// Returns `StackFull` once the limit is reached.
    pub fn push(&mut self, frame: Frame) -> Result<(), BasicError> {
        if self.frames.len() >= self.limit {
            return Err(ErrorCode::StackFull.into());
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    /// Pops the top frame, which must be an operand value.
    ///
    /// # Errors
    ///
    /// Returns `Broken` if the top frame is missing or of another kind.
    pub fn pop_value(&mut self) -> Result<Value, BasicError> {
        match self.frames.pop() {
            Some(Frame::Value(value)) => Ok(value),
            Some(other) => {
                let name = other.kind_name();
                self.frames.push(other);
                Err(BasicError::with_name(ErrorCode::Broken, name))
            }
            None => Err(BasicError::with_name(ErrorCode::Broken, "empty stack")),
        }
    }

    pub fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Iterates frames from the top of the stack downwards.
    pub fn iter_top_down(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter().rev()
    }

    /// Drops every frame; used when the interpreter is reset.
    pub fn reset(&mut self) {
        self.frames.clear();
    }
}

impl Default for ValueStack {
    fn default() -> Self {
        ValueStack::with_limit(DEFAULT_STACK_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_roundtrip() {
        let mut stack = ValueStack::default();
        stack.push(Frame::Value(Value::I32(7))).unwrap();
        stack.push(Frame::Value(Value::Str("abc".into()))).unwrap();
        assert_eq!(stack.pop_value().unwrap(), Value::Str("abc".into()));
        assert_eq!(stack.pop_value().unwrap(), Value::I32(7));
        assert!(stack.is_empty());
    }

    #[test]
    fn pop_value_checks_the_tag() {
        let mut stack = ValueStack::default();
        stack.push(Frame::Repeat { body_pc: 3 }).unwrap();
        let err = stack.pop_value().unwrap_err();
        assert_eq!(err.code(), ErrorCode::Broken);
        assert_eq!(err.name(), Some("REPEAT"));
        // The frame is still there after the failed pop.
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn limit_is_enforced() {
        let mut stack = ValueStack::with_limit(2);
        stack.push(Frame::Value(Value::I32(1))).unwrap();
        stack.push(Frame::Value(Value::I32(2))).unwrap();
        let err = stack.push(Frame::Value(Value::I32(3))).unwrap_err();
        assert_eq!(err.code(), ErrorCode::StackFull);
    }

    #[test]
    fn randomized_value_roundtrip() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut stack = ValueStack::default();
        let mut shadow = Vec::new();
        for _ in 0..512 {
            let value = match rng.gen_range(0..4) {
                0 => Value::U8(rng.gen()),
                1 => Value::I32(rng.gen()),
                2 => Value::I64(rng.gen()),
                _ => Value::F64(rng.gen::<i32>() as f64),
            };
            shadow.push(value.clone());
            stack.push(Frame::Value(value)).unwrap();
        }
        while let Some(expected) = shadow.pop() {
            assert_eq!(stack.pop_value().unwrap(), expected);
        }
        assert!(stack.is_empty());
    }
}
