//! The expression evaluator.
//!
//! A precedence-climbing parser that walks the token stream left to right,
//! evaluating as it goes. Operator precedence follows the classic table:
//! `^` binds tightest, then `* / DIV MOD`, `+ -`, the comparisons and
//! shifts, `NOT`, `AND`, and loosest `OR`/`EOR`. Unary minus binds between
//! `^` and `*`, so `-2^2` is `-(2^2)`; dyadic indirection (`base?offset`,
//! `base!offset`) binds tighter than anything else.
//!
//! Mixed numeric operands promote to the wider type; bytes always widen to
//! 32-bit integers first. `/` always divides as float; `DIV` and `MOD`
//! force integers. Comparison results follow the `TRUE = -1` convention.

use crate::{
    host::Host,
    runner::{Exec, Flow, Interpreter},
    token::{Function, Token},
    value::{Lvalue, Value},
};
use alloc::{
    format,
    rc::Rc,
    string::{String, ToString},
    vec::Vec,
};
use basmi_core::{ArithmeticOps, BasicError, ErrorCode, FloatOps, IntegerOps};

const PREC_OR: u8 = 1;
const PREC_AND: u8 = 2;
const PREC_CMP: u8 = 4;
const PREC_ADD: u8 = 5;
const PREC_MUL: u8 = 6;
const PREC_POW: u8 = 7;

/// Longest string producible by concatenation and `STRING$`.
const MAX_STRING: usize = 65535;

fn precedence(token: &Token) -> Option<u8> {
    Some(match token {
        Token::Caret => PREC_POW,
        Token::Star | Token::SlashOp | Token::Div | Token::Mod => PREC_MUL,
        Token::Plus | Token::Minus => PREC_ADD,
        Token::Eq
        | Token::Ne
        | Token::Lt
        | Token::Gt
        | Token::Le
        | Token::Ge
        | Token::Shl
        | Token::Shr
        | Token::ShrU => PREC_CMP,
        Token::And => PREC_AND,
        Token::Or | Token::Eor => PREC_OR,
        _ => return None,
    })
}

impl Interpreter {
    /// Evaluates a full expression at the cursor.
    pub(crate) fn expression<H: Host>(&mut self, host: &mut H) -> Exec<Value> {
        self.binary_expr(host, PREC_OR)
    }

    fn binary_expr<H: Host>(&mut self, host: &mut H, min_prec: u8) -> Exec<Value> {
        let mut lhs = self.parse_unary(host)?;
        loop {
            let token = self.program.token(self.pc).clone();
            let prec = match precedence(&token) {
                Some(prec) if prec >= min_prec => prec,
                _ => break,
            };
            self.pc += 1;
            let rhs = self.binary_expr(host, prec + 1)?;
            lhs = apply_binary(&token, &lhs, &rhs).map_err(Flow::from)?;
        }
        Ok(lhs)
    }

    /// Parses a unary item: prefix operators, an atom, and any dyadic
    /// indirection suffixes.
    pub(crate) fn parse_unary<H: Host>(&mut self, host: &mut H) -> Exec<Value> {
        let mut value = self.parse_prefix(host)?;
        loop {
            match self.program.token(self.pc) {
                Token::Query => {
                    self.pc += 1;
                    let offset = self.parse_prefix(host)?;
                    let addr = indexed_addr(&value, &offset).map_err(Flow::from)?;
                    value = Value::U8(self.workspace.read_u8(addr)?);
                }
                Token::Pling => {
                    self.pc += 1;
                    let offset = self.parse_prefix(host)?;
                    let addr = indexed_addr(&value, &offset).map_err(Flow::from)?;
                    value = Value::I32(self.workspace.read_i32(addr)?);
                }
                _ => return Ok(value),
            }
        }
    }

    fn parse_prefix<H: Host>(&mut self, host: &mut H) -> Exec<Value> {
        let token = self.program.token(self.pc).clone();
        match token {
            Token::Minus => {
                self.pc += 1;
                let operand = self.binary_expr(host, PREC_POW)?;
                op_neg(&operand).map_err(Flow::from)
            }
            Token::Plus => {
                self.pc += 1;
                self.binary_expr(host, PREC_POW)
            }
            Token::Not => {
                self.pc += 1;
                let operand = self.binary_expr(host, PREC_CMP)?;
                op_not(&operand).map_err(Flow::from)
            }
            Token::Query => {
                self.pc += 1;
                let addr = addr_of(&self.parse_prefix(host)?).map_err(Flow::from)?;
                Ok(Value::U8(self.workspace.read_u8(addr)?))
            }
            Token::Pling => {
                self.pc += 1;
                let addr = addr_of(&self.parse_prefix(host)?).map_err(Flow::from)?;
                Ok(Value::I32(self.workspace.read_i32(addr)?))
            }
            Token::Bar => {
                self.pc += 1;
                let addr = addr_of(&self.parse_prefix(host)?).map_err(Flow::from)?;
                Ok(Value::F64(self.workspace.read_f64(addr)?))
            }
            Token::Dollar => {
                self.pc += 1;
                let addr = addr_of(&self.parse_prefix(host)?).map_err(Flow::from)?;
                let bytes = self.workspace.read_cstring(addr)?;
                let text: String = bytes.iter().map(|byte| *byte as char).collect();
                Ok(Value::Str(text.into()))
            }
            Token::IntConst(value) => {
                self.pc += 1;
                Ok(narrow_i64(value))
            }
            Token::FloatConst(value) => {
                self.pc += 1;
                Ok(Value::F64(value))
            }
            Token::StrConst(id) => {
                self.pc += 1;
                Ok(Value::Str(Rc::from(self.program.name(id))))
            }
            Token::Static(slot) => {
                self.pc += 1;
                Ok(Value::I32(self.statics.get(slot)))
            }
            Token::Var(id) => {
                let name = self.program.name(id).to_string();
                self.pc += 1;
                self.variable_value(host, &name)
            }
            Token::LParen => {
                self.pc += 1;
                let value = self.expression(host)?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            Token::FnUnres(_) | Token::FnCall(_) => {
                let call_pc = self.pc;
                let (id, _) = self.resolve_call(call_pc)?;
                self.pc += 1;
                match self.call_subprogram(host, id, true)? {
                    Some(value) => Ok(value),
                    None => Err(ErrorCode::Broken.into()),
                }
            }
            Token::Func(function) => {
                self.pc += 1;
                self.builtin(host, function)
            }
            _ => Err(self.syntax_error().into()),
        }
    }

    /// Reads a named variable: scalar, array element, or whole array.
    fn variable_value<H: Host>(&mut self, host: &mut H, name: &str) -> Exec<Value> {
        let missing = || {
            Flow::Error(BasicError::with_name(
                ErrorCode::NoSuchVariable,
                crate::heap::display_name(name),
            ))
        };
        if name.ends_with('(') {
            let var = self.lookup_var(name).ok_or_else(missing)?;
            if matches!(self.program.token(self.pc), Token::RParen) {
                self.pc += 1;
                return Ok(Value::Array(var));
            }
            let index = self.subscripts(host, var)?;
            self.heap
                .elem_value(&self.workspace, var, index)
                .map_err(Flow::from)
        } else {
            let var = self.lookup_var(name).ok_or_else(missing)?;
            self.read_lvalue(&Lvalue::Scalar(var)).map_err(Flow::from)
        }
    }

    /// Parses the subscript list of an array reference (the name token
    /// carries the opening parenthesis) and flattens it.
    pub(crate) fn subscripts<H: Host>(&mut self, host: &mut H, var: crate::token::VarId) -> Exec<u32> {
        let mut subs: Vec<i64> = Vec::new();
        loop {
            let value = self.expression(host)?.to_i64().map_err(Flow::from)?;
            subs.push(value);
            match self.program.token(self.pc) {
                Token::Comma => self.pc += 1,
                Token::RParen => {
                    self.pc += 1;
                    break;
                }
                _ => return Err(self.syntax_error().into()),
            }
        }
        let desc = self.heap.descriptor(var).map_err(Flow::from)?;
        desc.flat_index(&subs).map_err(Flow::from)
    }

    /// Parses an assignment target at the cursor.
    pub(crate) fn parse_lvalue<H: Host>(&mut self, host: &mut H) -> Exec<Lvalue> {
        let token = self.program.token(self.pc).clone();
        let base = match token {
            Token::Static(slot) => {
                self.pc += 1;
                Lvalue::Static(slot)
            }
            Token::Var(id) => {
                let name = self.program.name(id).to_string();
                self.pc += 1;
                if name.ends_with('(') {
                    let var = self.find_or_create_var(&name)?;
                    if matches!(self.program.token(self.pc), Token::RParen) {
                        self.pc += 1;
                        Lvalue::WholeArray(var)
                    } else {
                        let index = self.subscripts(host, var)?;
                        Lvalue::Element { array: var, index }
                    }
                } else {
                    let var = self.find_or_create_var(&name)?;
                    Lvalue::Scalar(var)
                }
            }
            Token::Query => {
                self.pc += 1;
                let addr = addr_of(&self.parse_prefix(host)?).map_err(Flow::from)?;
                Lvalue::ByteAt(addr)
            }
            Token::Pling => {
                self.pc += 1;
                let addr = addr_of(&self.parse_prefix(host)?).map_err(Flow::from)?;
                Lvalue::WordAt(addr)
            }
            Token::Bar => {
                self.pc += 1;
                let addr = addr_of(&self.parse_prefix(host)?).map_err(Flow::from)?;
                Lvalue::FloatAt(addr)
            }
            Token::Dollar => {
                self.pc += 1;
                let addr = addr_of(&self.parse_prefix(host)?).map_err(Flow::from)?;
                Lvalue::StringAt(addr)
            }
            _ => return Err(self.syntax_error().into()),
        };
        // Dyadic indirection makes a window target of any numeric base.
        match self.program.token(self.pc) {
            Token::Query => {
                self.pc += 1;
                let base_value = self.read_lvalue(&base).map_err(Flow::from)?;
                let offset = self.parse_prefix(host)?;
                let addr = indexed_addr(&base_value, &offset).map_err(Flow::from)?;
                Ok(Lvalue::ByteAt(addr))
            }
            Token::Pling => {
                self.pc += 1;
                let base_value = self.read_lvalue(&base).map_err(Flow::from)?;
                let offset = self.parse_prefix(host)?;
                let addr = indexed_addr(&base_value, &offset).map_err(Flow::from)?;
                Ok(Lvalue::WordAt(addr))
            }
            _ => Ok(base),
        }
    }

    // === Built-in functions ================================================

    fn builtin<H: Host>(&mut self, host: &mut H, function: Function) -> Exec<Value> {
        match function {
            Function::Pi => Ok(Value::F64(core::f64::consts::PI)),
            Function::True => Ok(Value::I32(-1)),
            Function::False => Ok(Value::I32(0)),
            Function::Time => Ok(Value::I32(host.ticks() as i32)),
            Function::Pos => Ok(Value::I32(self.column as i32)),
            Function::Erl => Ok(Value::I32(
                self.last_error
                    .as_ref()
                    .and_then(|error| error.line())
                    .unwrap_or(0) as i32,
            )),
            Function::Err => Ok(Value::I32(
                self.last_error
                    .as_ref()
                    .map(|error| error.code().number() as i32)
                    .unwrap_or(0),
            )),
            Function::ReportStr => {
                let message = self
                    .last_error
                    .as_ref()
                    .map(|error| error.code().message().to_string())
                    .unwrap_or_default();
                Ok(Value::Str(message.into()))
            }
            Function::Rnd => self.builtin_rnd(host),

            Function::Abs => {
                let value = self.parse_unary(host)?;
                Ok(match value {
                    Value::U8(value) => Value::U8(value),
                    Value::F64(value) => Value::F64(value.abs()),
                    other => {
                        let wide = other.to_i64().map_err(Flow::from)?;
                        narrow_i64(wide.wrapping_abs())
                    }
                })
            }
            Function::Sgn => {
                let value = self.parse_unary(host)?.to_f64().map_err(Flow::from)?;
                Ok(Value::I32(if value > 0.0 {
                    1
                } else if value < 0.0 {
                    -1
                } else {
                    0
                }))
            }
            Function::Int => {
                let value = self.parse_unary(host)?;
                match value {
                    Value::F64(value) => {
                        let whole: i64 = basmi_core::TryTruncateInto::try_truncate_into(
                            value.floor(),
                        )
                        .map_err(BasicError::from)
                        .map_err(Flow::from)?;
                        Ok(narrow_i64(whole))
                    }
                    integral => Ok(integral),
                }
            }
            Function::Sqr => self.float_fn(host, FloatOps::sqrt),
            Function::Sin => self.float_fn(host, |value| Ok(FloatOps::sin(value))),
            Function::Cos => self.float_fn(host, |value| Ok(FloatOps::cos(value))),
            Function::Tan => self.float_fn(host, |value| Ok(FloatOps::tan(value))),
            Function::Asn => self.float_fn(host, FloatOps::asin),
            Function::Acs => self.float_fn(host, FloatOps::acos),
            Function::Atn => self.float_fn(host, |value| Ok(FloatOps::atan(value))),
            Function::Exp => self.float_fn(host, FloatOps::exp),
            Function::Ln => self.float_fn(host, FloatOps::ln),
            Function::Log => self.float_fn(host, FloatOps::log10),
            Function::Rad => self.float_fn(host, |value| Ok(value.to_radians())),
            Function::Deg => self.float_fn(host, |value| Ok(value.to_degrees())),

            Function::Len => {
                let text = self.parse_unary(host)?;
                Ok(Value::I32(text.as_str().map_err(Flow::from)?.len() as i32))
            }
            Function::Chr => {
                let code = self.parse_unary(host)?.to_i64().map_err(Flow::from)?;
                let byte = (code & 0xFF) as u8;
                let mut text = String::new();
                text.push(byte as char);
                Ok(Value::Str(text.into()))
            }
            Function::Asc => {
                let value = self.parse_unary(host)?;
                let text = value.as_str().map_err(Flow::from)?;
                Ok(Value::I32(
                    text.bytes().next().map(|byte| byte as i32).unwrap_or(-1),
                ))
            }
            Function::Str => {
                let hex = if matches!(self.program.token(self.pc), Token::Tilde) {
                    self.pc += 1;
                    true
                } else {
                    false
                };
                let value = self.parse_unary(host)?;
                // STR$ uses the @% format only when its top bit is set.
                let at_percent = self.statics.get(crate::symbols::STATIC_AT);
                let format = if at_percent as u32 & 0x8000_0000 != 0 {
                    at_percent
                } else {
                    crate::symbols::DEFAULT_AT_PERCENT
                };
                Ok(Value::Str(
                    format_value(&value, hex, format).map_err(Flow::from)?.into(),
                ))
            }
            Function::Val => {
                let value = self.parse_unary(host)?;
                let text = value.as_str().map_err(Flow::from)?;
                Ok(parse_number(text).unwrap_or(Value::I32(0)))
            }

            Function::Left => {
                self.expect(Token::LParen)?;
                let text = self.expression(host)?;
                let text = text.as_str().map_err(Flow::from)?.to_string();
                let count = if matches!(self.program.token(self.pc), Token::Comma) {
                    self.pc += 1;
                    self.expression(host)?.to_i64().map_err(Flow::from)?.max(0) as usize
                } else {
                    text.len().saturating_sub(1)
                };
                self.expect(Token::RParen)?;
                Ok(Value::Str(take_bytes(&text, 0, count).into()))
            }
            Function::Right => {
                self.expect(Token::LParen)?;
                let text = self.expression(host)?;
                let text = text.as_str().map_err(Flow::from)?.to_string();
                let count = if matches!(self.program.token(self.pc), Token::Comma) {
                    self.pc += 1;
                    self.expression(host)?.to_i64().map_err(Flow::from)?.max(0) as usize
                } else {
                    1
                };
                self.expect(Token::RParen)?;
                let count = count.min(text.len());
                Ok(Value::Str(take_bytes(&text, text.len() - count, count).into()))
            }
            Function::Mid => {
                self.expect(Token::LParen)?;
                let text = self.expression(host)?;
                let text = text.as_str().map_err(Flow::from)?.to_string();
                self.expect(Token::Comma)?;
                let start = self.expression(host)?.to_i64().map_err(Flow::from)?.max(1) as usize;
                let count = if matches!(self.program.token(self.pc), Token::Comma) {
                    self.pc += 1;
                    self.expression(host)?.to_i64().map_err(Flow::from)?.max(0) as usize
                } else {
                    text.len()
                };
                self.expect(Token::RParen)?;
                Ok(Value::Str(take_bytes(&text, start - 1, count).into()))
            }
            Function::StringRep => {
                self.expect(Token::LParen)?;
                let count = self.expression(host)?.to_i64().map_err(Flow::from)?.max(0) as usize;
                self.expect(Token::Comma)?;
                let unit = self.expression(host)?;
                let unit = unit.as_str().map_err(Flow::from)?;
                self.expect(Token::RParen)?;
                if count.saturating_mul(unit.len()) > MAX_STRING {
                    return Err(ErrorCode::StringTooLong.into());
                }
                Ok(Value::Str(unit.repeat(count).into()))
            }
            Function::Instr => {
                self.expect(Token::LParen)?;
                let haystack = self.expression(host)?;
                let haystack = haystack.as_str().map_err(Flow::from)?.to_string();
                self.expect(Token::Comma)?;
                let needle = self.expression(host)?;
                let needle = needle.as_str().map_err(Flow::from)?.to_string();
                let start = if matches!(self.program.token(self.pc), Token::Comma) {
                    self.pc += 1;
                    self.expression(host)?.to_i64().map_err(Flow::from)?.max(1) as usize
                } else {
                    1
                };
                self.expect(Token::RParen)?;
                if needle.is_empty() {
                    return Ok(Value::I32(start.min(haystack.len() + 1) as i32));
                }
                let position = haystack
                    .get(start - 1..)
                    .and_then(|tail| tail.find(&needle))
                    .map(|at| at + start)
                    .unwrap_or(0);
                Ok(Value::I32(position as i32))
            }

            Function::Tab | Function::Spc => Err(self.syntax_error().into()),
        }
    }

    fn float_fn<H: Host>(
        &mut self,
        host: &mut H,
        op: impl Fn(f64) -> Result<f64, ErrorCode>,
    ) -> Exec<Value> {
        let value = self.parse_unary(host)?.to_f64().map_err(Flow::from)?;
        Ok(Value::F64(op(value).map_err(BasicError::from)?))
    }

    /// The five classic argument forms of `RND`.
    fn builtin_rnd<H: Host>(&mut self, host: &mut H) -> Exec<Value> {
        if !matches!(self.program.token(self.pc), Token::LParen) {
            return Ok(Value::I32(self.rng.next_int()));
        }
        self.pc += 1;
        let argument = self.expression(host)?.to_i64().map_err(Flow::from)?;
        self.expect(Token::RParen)?;
        Ok(match argument {
            n if n < 0 => {
                self.rng.seed(-n);
                Value::I32(n as i32)
            }
            0 => Value::F64(self.rng.last_float()),
            1 => Value::F64(self.rng.next_float()),
            n => {
                let range = n as f64;
                let scaled = (self.rng.next_float() * range) as i64 + 1;
                narrow_i64(scaled.min(n))
            }
        })
    }
}

/// Narrows an `i64` to the 32-bit shape when it fits.
pub(crate) fn narrow_i64(value: i64) -> Value {
    match i32::try_from(value) {
        Ok(value) => Value::I32(value),
        Err(_) => Value::I64(value),
    }
}

fn addr_of(value: &Value) -> Result<u32, BasicError> {
    let wide = value.to_i64()?;
    u32::try_from(wide).map_err(|_| ErrorCode::WindowRange.into())
}

fn indexed_addr(base: &Value, offset: &Value) -> Result<u32, BasicError> {
    let base = base.to_i64()?;
    let offset = offset.to_i64()?;
    base.checked_add(offset)
        .and_then(|addr| u32::try_from(addr).ok())
        .ok_or_else(|| ErrorCode::WindowRange.into())
}

/// Byte-offset substring helper; BASIC strings are byte strings.
fn take_bytes(text: &str, start: usize, count: usize) -> String {
    text.as_bytes()
        .iter()
        .skip(start)
        .take(count)
        .map(|byte| *byte as char)
        .collect()
}

/// The integer pair a bitwise or integer-division operator works on: the
/// 32-bit shape unless either operand needs 64 bits.
enum IntPair {
    Narrow(i32, i32),
    Wide(i64, i64),
}

fn int_pair(lhs: &Value, rhs: &Value) -> Result<IntPair, BasicError> {
    let a = lhs.to_i64()?;
    let b = rhs.to_i64()?;
    match (i32::try_from(a), i32::try_from(b)) {
        (Ok(a), Ok(b)) if !matches!(lhs, Value::I64(_)) && !matches!(rhs, Value::I64(_)) => {
            Ok(IntPair::Narrow(a, b))
        }
        _ => Ok(IntPair::Wide(a, b)),
    }
}

fn is_float(value: &Value) -> bool {
    matches!(value, Value::F64(_))
}

pub(crate) fn op_add(lhs: &Value, rhs: &Value) -> Result<Value, BasicError> {
    if lhs.is_string() || rhs.is_string() {
        let a = lhs.as_str()?;
        let b = rhs.as_str()?;
        if a.len() + b.len() > MAX_STRING {
            return Err(ErrorCode::StringTooLong.into());
        }
        let mut joined = String::with_capacity(a.len() + b.len());
        joined.push_str(a);
        joined.push_str(b);
        return Ok(Value::Str(joined.into()));
    }
    if is_float(lhs) || is_float(rhs) {
        return Ok(Value::F64(lhs.to_f64()?.add(rhs.to_f64()?)));
    }
    match int_pair(lhs, rhs)? {
        IntPair::Narrow(a, b) => Ok(narrow_i64(a as i64 + b as i64)),
        IntPair::Wide(a, b) => Ok(Value::I64(a.add(b))),
    }
}

pub(crate) fn op_sub(lhs: &Value, rhs: &Value) -> Result<Value, BasicError> {
    if is_float(lhs) || is_float(rhs) {
        return Ok(Value::F64(lhs.to_f64()?.sub(rhs.to_f64()?)));
    }
    match int_pair(lhs, rhs)? {
        IntPair::Narrow(a, b) => Ok(narrow_i64(a as i64 - b as i64)),
        IntPair::Wide(a, b) => Ok(Value::I64(a.sub(b))),
    }
}

fn op_mul(lhs: &Value, rhs: &Value) -> Result<Value, BasicError> {
    if is_float(lhs) || is_float(rhs) {
        return Ok(Value::F64(lhs.to_f64()?.mul(rhs.to_f64()?)));
    }
    match int_pair(lhs, rhs)? {
        IntPair::Narrow(a, b) => Ok(narrow_i64(a as i64 * b as i64)),
        IntPair::Wide(a, b) => Ok(Value::I64(a.mul(b))),
    }
}

/// `/` always divides as float.
fn op_fdiv(lhs: &Value, rhs: &Value) -> Result<Value, BasicError> {
    Ok(Value::F64(lhs.to_f64()?.div(rhs.to_f64()?)?))
}

fn op_idiv(lhs: &Value, rhs: &Value) -> Result<Value, BasicError> {
    match int_pair(lhs, rhs)? {
        IntPair::Narrow(a, b) => Ok(Value::I32(a.div(b)?)),
        IntPair::Wide(a, b) => Ok(Value::I64(a.div(b)?)),
    }
}

fn op_mod(lhs: &Value, rhs: &Value) -> Result<Value, BasicError> {
    match int_pair(lhs, rhs)? {
        IntPair::Narrow(a, b) => Ok(Value::I32(a.rem(b)?)),
        IntPair::Wide(a, b) => Ok(Value::I64(a.rem(b)?)),
    }
}

fn op_pow(lhs: &Value, rhs: &Value) -> Result<Value, BasicError> {
    Ok(Value::F64(FloatOps::powf(lhs.to_f64()?, rhs.to_f64()?)?))
}

fn op_neg(value: &Value) -> Result<Value, BasicError> {
    match value {
        Value::F64(value) => Ok(Value::F64(-value)),
        other => Ok(narrow_i64(other.to_i64()?.wrapping_neg())),
    }
}

fn op_not(value: &Value) -> Result<Value, BasicError> {
    match int_pair(value, &Value::I32(0))? {
        IntPair::Narrow(a, _) => Ok(Value::I32(!a)),
        IntPair::Wide(a, _) => Ok(Value::I64(!a)),
    }
}

fn op_bitwise(
    lhs: &Value,
    rhs: &Value,
    narrow: impl Fn(i32, i32) -> i32,
    wide: impl Fn(i64, i64) -> i64,
) -> Result<Value, BasicError> {
    match int_pair(lhs, rhs)? {
        IntPair::Narrow(a, b) => Ok(Value::I32(narrow(a, b))),
        IntPair::Wide(a, b) => Ok(Value::I64(wide(a, b))),
    }
}

fn shift_count(value: i64, width: u32) -> Option<u32> {
    if value < 0 || value >= width as i64 {
        None
    } else {
        Some(value as u32)
    }
}

fn op_shift(lhs: &Value, rhs: &Value, op: &Token) -> Result<Value, BasicError> {
    match int_pair(lhs, rhs)? {
        IntPair::Narrow(a, b) => {
            let count = shift_count(b as i64, 32);
            Ok(Value::I32(match (op, count) {
                (Token::Shl, Some(count)) => a.wrapping_shl(count),
                (Token::Shr, Some(count)) => a >> count,
                (Token::ShrU, Some(count)) => ((a as u32) >> count) as i32,
                (Token::Shr, None) => a >> 31,
                (_, None) => 0,
                (_, Some(_)) => unreachable!("op_shift called with a non-shift token"),
            }))
        }
        IntPair::Wide(a, b) => {
            let count = shift_count(b, 64);
            Ok(Value::I64(match (op, count) {
                (Token::Shl, Some(count)) => a.wrapping_shl(count),
                (Token::Shr, Some(count)) => a >> count,
                (Token::ShrU, Some(count)) => ((a as u64) >> count) as i64,
                (Token::Shr, None) => a >> 63,
                (_, None) => 0,
                (_, Some(_)) => unreachable!("op_shift called with a non-shift token"),
            }))
        }
    }
}

/// Equality across the comparison rules: integer against integer by
/// value, floats by promotion, strings byte for byte.
pub(crate) fn values_equal(lhs: &Value, rhs: &Value) -> Result<bool, BasicError> {
    Ok(compare_values(lhs, rhs)? == core::cmp::Ordering::Equal)
}

/// Three-way comparison with the numeric promotion rules; strings compare
/// byte-lexicographically.
pub(crate) fn compare_values(lhs: &Value, rhs: &Value) -> Result<core::cmp::Ordering, BasicError> {
    use core::cmp::Ordering;
    if lhs.is_string() != rhs.is_string() {
        return Err(ErrorCode::TypeMismatch.into());
    }
    if lhs.is_string() {
        let a = lhs.as_str()?;
        let b = rhs.as_str()?;
        return Ok(a.as_bytes().cmp(b.as_bytes()));
    }
    if is_float(lhs) || is_float(rhs) {
        let a = lhs.to_f64()?;
        let b = rhs.to_f64()?;
        return Ok(a.partial_cmp(&b).unwrap_or(Ordering::Equal));
    }
    let a = lhs.to_i64()?;
    let b = rhs.to_i64()?;
    Ok(a.cmp(&b))
}

fn apply_binary(op: &Token, lhs: &Value, rhs: &Value) -> Result<Value, BasicError> {
    use core::cmp::Ordering;
    let comparison = |wanted: &[Ordering]| -> Result<Value, BasicError> {
        Ok(Value::from(wanted.contains(&compare_values(lhs, rhs)?)))
    };
    match op {
        Token::Plus => op_add(lhs, rhs),
        Token::Minus => op_sub(lhs, rhs),
        Token::Star => op_mul(lhs, rhs),
        Token::SlashOp => op_fdiv(lhs, rhs),
        Token::Div => op_idiv(lhs, rhs),
        Token::Mod => op_mod(lhs, rhs),
        Token::Caret => op_pow(lhs, rhs),
        Token::Eq => comparison(&[Ordering::Equal]),
        Token::Ne => comparison(&[Ordering::Less, Ordering::Greater]),
        Token::Lt => comparison(&[Ordering::Less]),
        Token::Gt => comparison(&[Ordering::Greater]),
        Token::Le => comparison(&[Ordering::Less, Ordering::Equal]),
        Token::Ge => comparison(&[Ordering::Greater, Ordering::Equal]),
        Token::And => op_bitwise(lhs, rhs, |a, b| a & b, |a, b| a & b),
        Token::Or => op_bitwise(lhs, rhs, |a, b| a | b, |a, b| a | b),
        Token::Eor => op_bitwise(lhs, rhs, |a, b| a ^ b, |a, b| a ^ b),
        Token::Shl | Token::Shr | Token::ShrU => op_shift(lhs, rhs, op),
        _ => Err(ErrorCode::Broken.into()),
    }
}

/// Parses the leading number of a text field, as `VAL` and `INPUT` do.
pub(crate) fn parse_number(text: &str) -> Option<Value> {
    let trimmed = text.trim_start();
    let bytes = trimmed.as_bytes();
    let mut end = 0usize;
    let mut seen_digit = false;
    let mut is_float = false;
    if end < bytes.len() && (bytes[end] == b'-' || bytes[end] == b'+') {
        end += 1;
    }
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
        seen_digit = true;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        is_float = true;
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
            seen_digit = true;
        }
    }
    if seen_digit && end < bytes.len() && (bytes[end] == b'E' || bytes[end] == b'e') {
        let mark = end;
        end += 1;
        if end < bytes.len() && (bytes[end] == b'-' || bytes[end] == b'+') {
            end += 1;
        }
        if end < bytes.len() && bytes[end].is_ascii_digit() {
            is_float = true;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
        } else {
            end = mark;
        }
    }
    if !seen_digit {
        return None;
    }
    let number = &trimmed[..end];
    if is_float {
        number.parse::<f64>().ok().map(Value::F64)
    } else {
        match number.parse::<i64>() {
            Ok(value) => Some(narrow_i64(value)),
            Err(_) => number.parse::<f64>().ok().map(Value::F64),
        }
    }
}

/// Formats a value for `PRINT` and `STR$`.
///
/// Integer shapes print as decimal; floats follow the `@%` word: the
/// format nibble selects general, exponent or fixed notation and the
/// digits byte gives the significance. `~` formatting prints the integer
/// value in uppercase hexadecimal.
pub(crate) fn format_value(value: &Value, hex: bool, at_percent: i32) -> Result<String, BasicError> {
    if hex {
        return Ok(match value {
            Value::U8(value) => format!("{:X}", value),
            Value::I32(value) => format!("{:X}", *value as u32),
            Value::I64(value) => format!("{:X}", *value as u64),
            other => format!("{:X}", other.to_i64()? as u64),
        });
    }
    match value {
        Value::Str(text) => Ok(text.to_string()),
        Value::U8(value) => Ok(format!("{}", value)),
        Value::I32(value) => Ok(format!("{}", value)),
        Value::I64(value) => Ok(format!("{}", value)),
        Value::F64(value) => {
            let digits = ((at_percent >> 8) & 0xFF).clamp(0, 17);
            let digits = if digits == 0 { 9 } else { digits as u32 };
            let mode = (at_percent >> 16) & 3;
            match mode {
                // Exponent format.
                1 => Ok(format_float_e(*value, digits)),
                // Fixed format: the digits byte counts decimals.
                2 => Ok(format!("{:.*}", digits as usize, value)),
                // General format.
                _ => Ok(format_float_g(*value, digits)),
            }
        }
        Value::Array(_) => Err(ErrorCode::TypeMismatch.into()),
    }
}

/// Splits the `{:e}` rendering into decimal digits and exponent.
fn float_digits(value: f64, digits: u32) -> (bool, String, i32) {
    let rendered = format!("{:.*e}", digits as usize - 1, value);
    let negative = rendered.starts_with('-');
    let body = rendered.trim_start_matches('-');
    let (mantissa, exponent) = body.split_once('e').unwrap_or((body, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(|ch| ch.is_ascii_digit()).collect();
    let trimmed = digits.trim_end_matches('0');
    let digits = if trimmed.is_empty() { "0" } else { trimmed };
    (negative, digits.to_string(), exponent)
}

fn format_float_e(value: f64, digits: u32) -> String {
    if value == 0.0 {
        return "0E0".to_string();
    }
    let (negative, digits, exponent) = float_digits(value, digits);
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&digits[..1]);
    if digits.len() > 1 {
        out.push('.');
        out.push_str(&digits[1..]);
    }
    out.push('E');
    out.push_str(&exponent.to_string());
    out
}

fn format_float_g(value: f64, digits: u32) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    let (negative, mantissa, exponent) = float_digits(value, digits);
    if exponent < -5 || exponent >= digits as i32 {
        return format_float_e(value, digits);
    }
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if exponent < 0 {
        out.push_str("0.");
        for _ in 0..(-exponent - 1) {
            out.push('0');
        }
        out.push_str(&mantissa);
    } else {
        let whole = (exponent + 1) as usize;
        if mantissa.len() <= whole {
            out.push_str(&mantissa);
            for _ in 0..whole - mantissa.len() {
                out.push('0');
            }
        } else {
            out.push_str(&mantissa[..whole]);
            out.push('.');
            out.push_str(&mantissa[whole..]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_is_argument_order_independent() {
        let a = Value::I32(3);
        let b = Value::F64(1.5);
        assert_eq!(op_add(&a, &b).unwrap(), Value::F64(4.5));
        assert_eq!(op_add(&b, &a).unwrap(), Value::F64(4.5));
        assert_eq!(op_mul(&a, &b).unwrap(), Value::F64(4.5));
        assert_eq!(op_mul(&b, &a).unwrap(), Value::F64(4.5));
    }

    #[test]
    fn bytes_widen_in_arithmetic() {
        assert_eq!(
            op_add(&Value::U8(200), &Value::U8(100)).unwrap(),
            Value::I32(300)
        );
    }

    #[test]
    fn integer_sums_widen_to_sixty_four_bits() {
        assert_eq!(
            op_add(&Value::I32(i32::MAX), &Value::I32(1)).unwrap(),
            Value::I64(i32::MAX as i64 + 1)
        );
    }

    #[test]
    fn float_division_by_zero_is_an_error() {
        let err = op_fdiv(&Value::F64(1.0), &Value::I32(0)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DivisionByZero);
    }

    #[test]
    fn string_concat_and_compare() {
        let ab = op_add(&Value::Str("a".into()), &Value::Str("b".into())).unwrap();
        assert_eq!(ab.as_str().unwrap(), "ab");
        assert!(values_equal(&Value::Str("ab".into()), &ab).unwrap());
        assert_eq!(
            op_add(&Value::Str("a".into()), &Value::I32(1)).unwrap_err().code(),
            ErrorCode::TypeMismatch
        );
    }

    #[test]
    fn general_format_trims_and_switches_to_exponent() {
        assert_eq!(format_float_g(0.0, 9), "0");
        assert_eq!(format_float_g(5.0, 9), "5");
        assert_eq!(format_float_g(2.5, 9), "2.5");
        assert_eq!(format_float_g(-2.5, 9), "-2.5");
        assert_eq!(format_float_g(0.125, 9), "0.125");
        assert_eq!(format_float_g(1e9, 9), "1E9");
        assert_eq!(format_float_g(1e-7, 9), "1E-7");
        assert_eq!(format_float_g(1.0 / 3.0, 9), "0.333333333");
    }

    #[test]
    fn hex_format_uses_register_width() {
        assert_eq!(
            format_value(&Value::I32(-1), true, 0x90A).unwrap(),
            "FFFFFFFF"
        );
        assert_eq!(format_value(&Value::I32(255), true, 0x90A).unwrap(), "FF");
    }

    #[test]
    fn val_parses_leading_number() {
        assert_eq!(parse_number("42abc"), Some(Value::I32(42)));
        assert_eq!(parse_number("  -1.5"), Some(Value::F64(-1.5)));
        assert_eq!(parse_number("2E3"), Some(Value::F64(2000.0)));
        assert_eq!(parse_number("abc"), None);
    }

    #[test]
    fn shifts() {
        assert_eq!(
            op_shift(&Value::I32(1), &Value::I32(4), &Token::Shl).unwrap(),
            Value::I32(16)
        );
        assert_eq!(
            op_shift(&Value::I32(-8), &Value::I32(1), &Token::Shr).unwrap(),
            Value::I32(-4)
        );
        assert_eq!(
            op_shift(&Value::I32(-8), &Value::I32(1), &Token::ShrU).unwrap(),
            Value::I32(0x7FFFFFFC)
        );
        assert_eq!(
            op_shift(&Value::I32(1), &Value::I32(40), &Token::Shl).unwrap(),
            Value::I32(0)
        );
    }
}
