//! The byte window: BASIC's flat workspace memory.
//!
//! Indirection operators (`?`, `!`, `|`, `$`) and `DIM` block allocations
//! operate on a contiguous byte array indexed by numeric offsets. All
//! multi-byte accesses are little-endian and unaligned; strings stored in
//! the window are terminated by a carriage return.

use crate::memory_units::{Bytes, Pages};
use alloc::vec::Vec;
use basmi_core::{ErrorCode, LittleEndianConvert};

/// Default size of the byte window.
pub const DEFAULT_WORKSPACE_PAGES: Pages = Pages(8);

/// Lowest offset handed out by the block allocator. Offsets below this are
/// never allocated, so a zero address always means "nowhere".
const WORKSPACE_BASE: u32 = 16;

/// Alignment of `DIM` block and off-heap allocations.
const BLOCK_ALIGN: u32 = 8;

/// The terminator byte of strings stored in the window.
pub(crate) const CSTRING_TERMINATOR: u8 = 0x0D;

/// An off-heap allocation made by `DIM HIMEM`.
#[derive(Debug, Copy, Clone)]
struct OffHeapBlock {
    base: u32,
    size: u32,
}

/// The interpreter's workspace: a fixed-size byte array with a bottom-up
/// block allocator (`DIM name size`) and a top-down off-heap allocator
/// (`DIM HIMEM`).
///
/// Off-heap blocks are only returned to the allocator when the released
/// block sits exactly at the current `HIMEM`; blocks released out of order
/// stay unusable until `CLEAR HIMEM` resets the whole region. This matches
/// the explicit-release contract of the language.
#[derive(Debug)]
pub struct Workspace {
    buffer: Vec<u8>,
    vartop: u32,
    himem: u32,
    initial_himem: u32,
    blocks: Vec<OffHeapBlock>,
}

impl Workspace {
    /// Allocates a workspace of the given size, zero filled.
    pub fn new(size: Pages) -> Workspace {
        let bytes: Bytes = size.into();
        let len = bytes.0.max((WORKSPACE_BASE as usize) * 2) as u32;
        Workspace {
            buffer: alloc::vec![0u8; len as usize],
            vartop: WORKSPACE_BASE,
            himem: len,
            initial_himem: len,
            blocks: Vec::new(),
        }
    }

    /// Total size of the window in bytes.
    pub fn size(&self) -> u32 {
        self.buffer.len() as u32
    }

    /// Current top of the block allocator.
    pub fn vartop(&self) -> u32 {
        self.vartop
    }

    /// Current `HIMEM`.
    pub fn himem(&self) -> u32 {
        self.himem
    }

    fn checked_range(&self, offset: u32, size: usize) -> Result<core::ops::Range<usize>, ErrorCode> {
        let start = offset as usize;
        let end = start.checked_add(size).ok_or(ErrorCode::WindowRange)?;
        if end > self.buffer.len() {
            return Err(ErrorCode::WindowRange);
        }
        Ok(start..end)
    }

    /// Reads a value of type `T` from the given offset.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the access falls outside the window.
    pub fn get_value<T: LittleEndianConvert>(&self, offset: u32) -> Result<T, ErrorCode> {
        let mut bytes = T::Bytes::default();
        let range = self.checked_range(offset, bytes.as_ref().len())?;
        bytes.as_mut().copy_from_slice(&self.buffer[range]);
        Ok(T::from_le_bytes(bytes))
    }

    /// Writes a value of type `T` at the given offset.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the access falls outside the window.
    pub fn set_value<T: LittleEndianConvert>(&mut self, offset: u32, value: T) -> Result<(), ErrorCode> {
        let bytes = value.into_le_bytes();
        let range = self.checked_range(offset, bytes.as_ref().len())?;
        self.buffer[range].copy_from_slice(bytes.as_ref());
        Ok(())
    }

    /// Reads the byte at `offset`.
    pub fn read_u8(&self, offset: u32) -> Result<u8, ErrorCode> {
        self.get_value(offset)
    }

    /// Reads a little-endian 32-bit integer at `offset`.
    pub fn read_i32(&self, offset: u32) -> Result<i32, ErrorCode> {
        self.get_value(offset)
    }

    /// Reads a little-endian 64-bit integer at `offset`.
    pub fn read_i64(&self, offset: u32) -> Result<i64, ErrorCode> {
        self.get_value(offset)
    }

    /// Reads a 64-bit float at `offset`.
    pub fn read_f64(&self, offset: u32) -> Result<f64, ErrorCode> {
        self.get_value(offset)
    }

    /// Writes the byte at `offset`.
    pub fn write_u8(&mut self, offset: u32, value: u8) -> Result<(), ErrorCode> {
        self.set_value(offset, value)
    }

    /// Writes a little-endian 32-bit integer at `offset`.
    pub fn write_i32(&mut self, offset: u32, value: i32) -> Result<(), ErrorCode> {
        self.set_value(offset, value)
    }

    /// Writes a little-endian 64-bit integer at `offset`.
    pub fn write_i64(&mut self, offset: u32, value: i64) -> Result<(), ErrorCode> {
        self.set_value(offset, value)
    }

    /// Writes a 64-bit float at `offset`.
    pub fn write_f64(&mut self, offset: u32, value: f64) -> Result<(), ErrorCode> {
        self.set_value(offset, value)
    }

    /// Length in bytes of the carriage-return terminated string at `offset`.
    pub fn cstring_len(&self, offset: u32) -> Result<u32, ErrorCode> {
        let start = offset as usize;
        if start > self.buffer.len() {
            return Err(ErrorCode::WindowRange);
        }
        self.buffer[start..]
            .iter()
            .position(|byte| *byte == CSTRING_TERMINATOR)
            .map(|len| len as u32)
            .ok_or(ErrorCode::WindowRange)
    }

    /// Copies the carriage-return terminated string at `offset`.
    pub fn read_cstring(&self, offset: u32) -> Result<Vec<u8>, ErrorCode> {
        let len = self.cstring_len(offset)? as usize;
        let start = offset as usize;
        Ok(self.buffer[start..start + len].to_vec())
    }

    /// Writes `bytes` at `offset` followed by the terminator.
    pub fn write_cstring(&mut self, offset: u32, bytes: &[u8]) -> Result<(), ErrorCode> {
        let range = self.checked_range(offset, bytes.len() + 1)?;
        self.buffer[range.start..range.end - 1].copy_from_slice(bytes);
        self.buffer[range.end - 1] = CSTRING_TERMINATOR;
        Ok(())
    }

    fn align(size: u32) -> u32 {
        (size + BLOCK_ALIGN - 1) & !(BLOCK_ALIGN - 1)
    }

    /// Allocates a `DIM name size` block of `size + 1` bytes bottom-up and
    /// returns its address.
    ///
    /// A size of `-1` allocates zero bytes yet still yields a valid address.
    ///
    /// # Errors
    ///
    /// Returns `BadDim` for sizes below `-1` and `DimSpace` when the block
    /// would collide with `HIMEM`.
    pub fn alloc_block(&mut self, size: i64) -> Result<u32, ErrorCode> {
        if size < -1 {
            return Err(ErrorCode::BadDim);
        }
        let bytes = Self::align((size + 1) as u32);
        let base = self.vartop;
        let new_top = base.checked_add(bytes).ok_or(ErrorCode::DimSpace)?;
        if new_top > self.himem {
            return Err(ErrorCode::DimSpace);
        }
        self.vartop = new_top;
        Ok(base)
    }

    /// Allocates an off-heap block of `size` bytes by lowering `HIMEM`.
    ///
    /// # Errors
    ///
    /// Returns `BadDim` for non-positive sizes and `DimSpace` when `HIMEM`
    /// would collide with the block allocator.
    pub fn alloc_himem(&mut self, size: i64) -> Result<u32, ErrorCode> {
        if size <= 0 {
            return Err(ErrorCode::BadDim);
        }
        if size > self.size() as i64 {
            return Err(ErrorCode::DimSpace);
        }
        let bytes = Self::align(size as u32);
        let base = self.himem.checked_sub(bytes).ok_or(ErrorCode::DimSpace)?;
        if base < self.vartop {
            return Err(ErrorCode::DimSpace);
        }
        self.himem = base;
        self.blocks.push(OffHeapBlock { base, size: bytes });
        Ok(base)
    }

    /// Releases the off-heap block at `addr`.
    ///
    /// The bytes only return to the allocator when the block is the most
    /// recent live allocation; otherwise the record is dropped and the
    /// space leaks until `CLEAR HIMEM`.
    ///
    /// # Errors
    ///
    /// Returns `BadDim` if no live off-heap block starts at `addr`.
    pub fn release_himem(&mut self, addr: u32) -> Result<(), ErrorCode> {
        let index = self
            .blocks
            .iter()
            .position(|block| block.base == addr)
            .ok_or(ErrorCode::BadDim)?;
        let block = self.blocks.remove(index);
        if block.base == self.himem {
            self.himem += block.size;
        }
        Ok(())
    }

    /// Resets `HIMEM` to its initial position, reclaiming every off-heap
    /// block at once.
    pub fn clear_himem(&mut self) {
        self.himem = self.initial_himem;
        self.blocks.clear();
    }

    /// Releases every bottom-up block; used by `CLEAR` and `RUN`.
    pub fn clear_blocks(&mut self) {
        self.vartop = WORKSPACE_BASE;
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Workspace::new(DEFAULT_WORKSPACE_PAGES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unaligned_little_endian_roundtrip() {
        let mut window = Workspace::default();
        window.write_i32(21, 0x0102_0304).unwrap();
        assert_eq!(window.read_i32(21).unwrap(), 0x0102_0304);
        assert_eq!(window.read_u8(21).unwrap(), 0x04);
        assert_eq!(window.read_u8(24).unwrap(), 0x01);
        window.write_i64(33, -5).unwrap();
        assert_eq!(window.read_i64(33).unwrap(), -5);
        window.write_f64(41, 2.5).unwrap();
        assert_eq!(window.read_f64(41).unwrap(), 2.5);
    }

    #[test]
    fn out_of_bounds_is_reported() {
        let mut window = Workspace::default();
        let size = window.size();
        assert_eq!(window.read_i32(size - 2), Err(ErrorCode::WindowRange));
        assert_eq!(window.write_u8(size, 1), Err(ErrorCode::WindowRange));
        assert!(window.read_u8(size - 1).is_ok());
    }

    #[test]
    fn cstring_roundtrip() {
        let mut window = Workspace::default();
        window.write_cstring(100, b"hello").unwrap();
        assert_eq!(window.cstring_len(100).unwrap(), 5);
        assert_eq!(window.read_cstring(100).unwrap(), b"hello".to_vec());
        assert_eq!(window.read_cstring(102).unwrap(), b"llo".to_vec());
    }

    #[test]
    fn empty_block_has_valid_address() {
        let mut window = Workspace::default();
        let empty = window.alloc_block(-1).unwrap();
        let other = window.alloc_block(7).unwrap();
        assert_eq!(empty, other);
        assert_eq!(window.alloc_block(-2), Err(ErrorCode::BadDim));
    }

    #[test]
    fn himem_release_contract() {
        let mut window = Workspace::default();
        let initial = window.himem();
        let first = window.alloc_himem(64).unwrap();
        let second = window.alloc_himem(64).unwrap();
        assert!(second < first);

        // Out of order release leaks: HIMEM does not move.
        window.release_himem(first).unwrap();
        assert_eq!(window.himem(), second);

        // Releasing the block at HIMEM reclaims only that block.
        window.release_himem(second).unwrap();
        assert_eq!(window.himem(), first);

        window.clear_himem();
        assert_eq!(window.himem(), initial);
        assert_eq!(window.release_himem(first), Err(ErrorCode::BadDim));
    }

    #[test]
    fn allocators_collide_with_dim_space() {
        let mut window = Workspace::new(Pages(1));
        let size = window.size() as i64;
        assert_eq!(window.alloc_himem(size + 16), Err(ErrorCode::DimSpace));
        window.alloc_himem(size / 2).unwrap();
        assert_eq!(window.alloc_block(size / 2), Err(ErrorCode::DimSpace));
    }
}
