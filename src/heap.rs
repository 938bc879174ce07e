//! Heap records: variables, array descriptors, subprogram definitions and
//! `CASE` jump tables.
//!
//! Records live in an arena indexed by [`VarId`]; references between
//! records are arena indices rather than pointers, so the arena can move
//! freely. A record's payload is the [`VarKind`] union; subprograms start
//! life as [`VarKind::Marker`] entries that only know where their `DEF`
//! lives and are upgraded to full records when their parameter list is
//! first needed.

use crate::{
    memory::Workspace,
    token::{CaseId, Pc, VarId},
    value::{Lvalue, Value},
};
use alloc::{boxed::Box, rc::Rc, string::String, vec::Vec};
use basmi_core::{BasicError, ErrorCode, TryTruncateInto};

/// Element type of an array or scalar slot, decided by the name suffix.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ElemType {
    U8,
    I32,
    I64,
    F64,
    Str,
}

impl ElemType {
    /// Size in bytes of one element stored in the byte window.
    pub fn window_size(&self) -> Option<u32> {
        match self {
            ElemType::U8 => Some(1),
            ElemType::I32 => Some(4),
            ElemType::I64 => Some(8),
            ElemType::F64 => Some(8),
            ElemType::Str => None,
        }
    }
}

/// Backing store of a dimensioned array.
#[derive(Clone, Debug)]
pub(crate) enum ArrayData {
    U8(Vec<u8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F64(Vec<f64>),
    Str(Vec<Rc<str>>),
    /// Off-heap backing: elements live in the byte window at `base`.
    Window { base: u32, elem: ElemType },
}

/// Descriptor of a dimensioned array.
#[derive(Clone, Debug)]
pub(crate) struct ArrayDescriptor {
    /// Per-dimension element counts (declared bound plus one).
    pub dims: Box<[u32]>,
    /// Total element count, the product of `dims`.
    pub elem_count: u32,
    /// Element storage.
    pub data: ArrayData,
}

impl ArrayDescriptor {
    /// Whether the backing bytes live outside the managed heap.
    pub fn is_off_heap(&self) -> bool {
        matches!(self.data, ArrayData::Window { .. })
    }

    /// Flattens row-major subscripts into an element index, checking each
    /// against its dimension.
    pub fn flat_index(&self, subscripts: &[i64]) -> Result<u32, BasicError> {
        if subscripts.len() != self.dims.len() {
            return Err(ErrorCode::BadDimCount.into());
        }
        let mut index: u64 = 0;
        for (subscript, dim) in subscripts.iter().zip(self.dims.iter()) {
            if *subscript < 0 || *subscript >= *dim as i64 {
                return Err(ErrorCode::BadSubscript.into());
            }
            index = index * (*dim as u64) + *subscript as u64;
        }
        Ok(index as u32)
    }
}

/// A formal parameter of a subprogram.
#[derive(Clone, Debug)]
pub(crate) struct Param {
    /// The formal's storage; always a static, scalar or whole-array target.
    pub target: Lvalue,
    /// Whether `RETURN` preceded the formal in the definition.
    pub by_return: bool,
}

/// A resolved `DEF PROC`/`DEF FN` record.
#[derive(Clone, Debug)]
pub(crate) struct SubDef {
    /// Address of the first statement of the body.
    pub entry_pc: Pc,
    /// The formal parameters in declaration order.
    pub params: Box<[Param]>,
    /// Fast-path flag: exactly one non-`RETURN` 32-bit integer scalar.
    pub simple_int: bool,
}

/// Payload union of a variable record.
#[derive(Clone, Debug)]
pub(crate) enum VarKind {
    U8(u8),
    I32(i32),
    I64(i64),
    F64(f64),
    Str(Rc<str>),
    /// An array slot; `None` between declaration and `DIM`.
    Array {
        elem: ElemType,
        desc: Option<ArrayDescriptor>,
    },
    Proc(SubDef),
    Fn(SubDef),
    /// A known-but-unparsed definition: only the `DEF` site is recorded.
    Marker { def_pc: Pc, is_fn: bool },
}

/// A heap-allocated variable record.
#[derive(Clone, Debug)]
pub(crate) struct VarRecord {
    /// The name, including any trailing `(` for arrays and the `PROC`/`FN`
    /// prefix for subprograms.
    pub name: Box<str>,
    /// Cached name hash.
    pub hash: u32,
    /// Owning library index, or `None` for the main program.
    pub library: Option<usize>,
    /// Next record in the same hash bucket.
    pub next: Option<VarId>,
    /// The payload.
    pub kind: VarKind,
}

/// One `WHEN` arm of a resolved `CASE`.
#[derive(Copy, Clone, Debug)]
pub(crate) struct CaseEntry {
    /// Address of the arm's first selector expression.
    pub expr_pc: Pc,
    /// Address of the arm's body.
    pub body_pc: Pc,
}

/// A resolved `CASE` jump table.
#[derive(Clone, Debug)]
pub(crate) struct CaseTable {
    /// The `WHEN` arms in source order.
    pub entries: Vec<CaseEntry>,
    /// Body of the `OTHERWISE` arm, if present.
    pub otherwise_pc: Option<Pc>,
    /// Continuation after `ENDCASE`.
    pub exit_pc: Pc,
}

/// The record arena.
///
/// `CASE` tables are kept apart from variable records: variables die on
/// `CLEAR` and `RUN` while case tables, being reachable from resolved
/// tokens, live until the interpreter itself is reset.
#[derive(Debug)]
pub(crate) struct Heap {
    vars: Vec<VarRecord>,
    case_tables: Vec<CaseTable>,
    empty: Rc<str>,
}

impl Heap {
    pub fn new() -> Heap {
        Heap {
            vars: Vec::new(),
            case_tables: Vec::new(),
            empty: Rc::from(""),
        }
    }

    /// The shared empty-string payload.
    pub fn empty_str(&self) -> Rc<str> {
        self.empty.clone()
    }

    pub fn alloc(&mut self, record: VarRecord) -> VarId {
        self.vars.push(record);
        VarId((self.vars.len() - 1) as u32)
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn var(&self, id: VarId) -> &VarRecord {
        &self.vars[id.0 as usize]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut VarRecord {
        &mut self.vars[id.0 as usize]
    }

    /// Drops every variable record. Case tables survive.
    pub fn clear_vars(&mut self) {
        self.vars.clear();
    }

    pub fn alloc_case(&mut self, table: CaseTable) -> CaseId {
        self.case_tables.push(table);
        CaseId((self.case_tables.len() - 1) as u32)
    }

    pub fn case(&self, id: CaseId) -> &CaseTable {
        &self.case_tables[id.0 as usize]
    }

    /// Reads one array element as a value.
    pub fn elem_value(
        &self,
        window: &Workspace,
        id: VarId,
        index: u32,
    ) -> Result<Value, BasicError> {
        let desc = self.descriptor(id)?;
        debug_assert!(index < desc.elem_count);
        let at = index as usize;
        match &desc.data {
            ArrayData::U8(elems) => Ok(Value::U8(elems[at])),
            ArrayData::I32(elems) => Ok(Value::I32(elems[at])),
            ArrayData::I64(elems) => Ok(Value::I64(elems[at])),
            ArrayData::F64(elems) => Ok(Value::F64(elems[at])),
            ArrayData::Str(elems) => Ok(Value::Str(elems[at].clone())),
            ArrayData::Window { base, elem } => {
                let size = elem.window_size().ok_or(ErrorCode::Broken)?;
                let offset = base + index * size;
                Ok(match elem {
                    ElemType::U8 => Value::U8(window.read_u8(offset)?),
                    ElemType::I32 => Value::I32(window.read_i32(offset)?),
                    ElemType::I64 => Value::I64(window.read_i64(offset)?),
                    ElemType::F64 => Value::F64(window.read_f64(offset)?),
                    ElemType::Str => return Err(ErrorCode::Broken.into()),
                })
            }
        }
    }

    /// Stores a value into one array element, converting to the element
    /// type.
    pub fn set_elem(
        &mut self,
        window: &mut Workspace,
        id: VarId,
        index: u32,
        value: Value,
    ) -> Result<(), BasicError> {
        let desc = self.descriptor_mut(id)?;
        debug_assert!(index < desc.elem_count);
        let at = index as usize;
        match &mut desc.data {
            ArrayData::U8(elems) => elems[at] = to_u8(&value)?,
            ArrayData::I32(elems) => elems[at] = value.to_i32()?,
            ArrayData::I64(elems) => elems[at] = value.to_i64()?,
            ArrayData::F64(elems) => elems[at] = value.to_f64()?,
            ArrayData::Str(elems) => elems[at] = value.into_str()?,
            ArrayData::Window { base, elem } => {
                let size = elem.window_size().ok_or(ErrorCode::Broken)?;
                let offset = *base + index * size;
                match elem {
                    ElemType::U8 => window.write_u8(offset, to_u8(&value)?)?,
                    ElemType::I32 => window.write_i32(offset, value.to_i32()?)?,
                    ElemType::I64 => window.write_i64(offset, value.to_i64()?)?,
                    ElemType::F64 => window.write_f64(offset, value.to_f64()?)?,
                    ElemType::Str => return Err(ErrorCode::Broken.into()),
                }
            }
        }
        Ok(())
    }

    /// Returns the descriptor of a dimensioned array.
    ///
    /// # Errors
    ///
    /// `Undimensioned` before `DIM`; `Broken` if the record is not an array
    /// at all.
    pub fn descriptor(&self, id: VarId) -> Result<&ArrayDescriptor, BasicError> {
        match &self.var(id).kind {
            VarKind::Array { desc: Some(desc), .. } => Ok(desc),
            VarKind::Array { desc: None, .. } => Err(ErrorCode::Undimensioned.into()),
            _ => Err(ErrorCode::Broken.into()),
        }
    }

    pub fn descriptor_mut(&mut self, id: VarId) -> Result<&mut ArrayDescriptor, BasicError> {
        match &mut self.var_mut(id).kind {
            VarKind::Array { desc: Some(desc), .. } => Ok(desc),
            VarKind::Array { desc: None, .. } => Err(ErrorCode::Undimensioned.into()),
            _ => Err(ErrorCode::Broken.into()),
        }
    }
}

/// Converts a value to a byte for `&` variables, `?` stores and byte
/// arrays: integers keep their low 8 bits, floats round first.
pub(crate) fn to_u8(value: &Value) -> Result<u8, BasicError> {
    match value {
        Value::U8(value) => Ok(*value),
        Value::I32(value) => Ok(*value as u8),
        Value::I64(value) => Ok(*value as u8),
        Value::F64(value) => {
            let whole: i64 = value.round().try_truncate_into()?;
            Ok(whole as u8)
        }
        Value::Str(_) | Value::Array(_) => Err(ErrorCode::TypeMismatch.into()),
    }
}

/// Zero-fills a fresh array backing for the element type.
pub(crate) fn zeroed_data(elem: ElemType, count: u32, empty: Rc<str>) -> ArrayData {
    let count = count as usize;
    match elem {
        ElemType::U8 => ArrayData::U8(alloc::vec![0; count]),
        ElemType::I32 => ArrayData::I32(alloc::vec![0; count]),
        ElemType::I64 => ArrayData::I64(alloc::vec![0; count]),
        ElemType::F64 => ArrayData::F64(alloc::vec![0.0; count]),
        ElemType::Str => ArrayData::Str(alloc::vec![empty; count]),
    }
}

/// Renders a variable name for an error message, trimming the array marker.
pub(crate) fn display_name(name: &str) -> String {
    name.trim_end_matches('(').into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(dims: &[u32]) -> ArrayDescriptor {
        let elem_count = dims.iter().product();
        ArrayDescriptor {
            dims: dims.into(),
            elem_count,
            data: zeroed_data(ElemType::I32, elem_count, Rc::from("")),
        }
    }

    #[test]
    fn flat_index_is_row_major() {
        let desc = descriptor(&[3, 4]);
        assert_eq!(desc.flat_index(&[0, 0]).unwrap(), 0);
        assert_eq!(desc.flat_index(&[1, 0]).unwrap(), 4);
        assert_eq!(desc.flat_index(&[2, 3]).unwrap(), 11);
    }

    #[test]
    fn subscript_bounds_are_checked() {
        let desc = descriptor(&[3]);
        assert_eq!(
            desc.flat_index(&[3]).unwrap_err().code(),
            ErrorCode::BadSubscript
        );
        assert_eq!(
            desc.flat_index(&[-1]).unwrap_err().code(),
            ErrorCode::BadSubscript
        );
        assert_eq!(
            desc.flat_index(&[0, 0]).unwrap_err().code(),
            ErrorCode::BadDimCount
        );
    }

    #[test]
    fn byte_conversion_wraps() {
        assert_eq!(to_u8(&Value::I32(300)).unwrap(), 44);
        assert_eq!(to_u8(&Value::F64(255.6)).unwrap(), 0);
        assert_eq!(to_u8(&Value::I64(-1)).unwrap(), 255);
    }
}
