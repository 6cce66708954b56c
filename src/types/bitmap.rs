//! NULL bitmaps for binary rows and statement parameters.

use crate::error::MySqlResult;
use crate::protocol::wire::read_bytes;

/// Bit offset of the first column in a binary result row bitmap.
pub const ROW_OFFSET: usize = 2;

/// Bit offset of the first parameter in a COM_STMT_EXECUTE bitmap.
pub const PARAM_OFFSET: usize = 0;

/// One bit per column or parameter, LSB-first, shifted by a fixed offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NullBitmap {
    offset: usize,
    bytes: Vec<u8>,
}

impl NullBitmap {
    /// An all-clear bitmap for `count` positions.
    pub fn new(count: usize, offset: usize) -> Self {
        Self {
            offset,
            bytes: vec![0; Self::byte_len(count, offset)],
        }
    }

    pub fn for_params(count: usize) -> Self {
        Self::new(count, PARAM_OFFSET)
    }

    pub fn for_row(count: usize) -> Self {
        Self::new(count, ROW_OFFSET)
    }

    /// Size in bytes of a bitmap covering `count` positions.
    pub fn byte_len(count: usize, offset: usize) -> usize {
        (count + 7 + offset) / 8
    }

    /// Read a bitmap for `count` positions from the front of `buf`.
    pub fn decode(buf: &mut &[u8], count: usize, offset: usize) -> MySqlResult<Self> {
        let bytes = read_bytes(buf, Self::byte_len(count, offset))?;
        Ok(Self {
            offset,
            bytes: bytes.to_vec(),
        })
    }

    pub fn is_null(&self, pos: usize) -> bool {
        let bit = pos + self.offset;
        self.bytes
            .get(bit >> 3)
            .is_some_and(|byte| byte & (1 << (bit & 7)) != 0)
    }

    pub fn set_null(&mut self, pos: usize) {
        let bit = pos + self.offset;
        if let Some(byte) = self.bytes.get_mut(bit >> 3) {
            *byte |= 1 << (bit & 7);
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
