//! Random-access table mapping a dense index (method id) to a data
//! offset, with 0 meaning "absent".
//!
//! Entries are grouped into blocks of sixteen. A block is a little-endian
//! u16 presence bitmask followed by one ULEB128 per present entry,
//! holding that entry's distance from the table base. A u32 index of
//! block offsets sits after the blocks, so a lookup touches one block at
//! most. Identical blocks are stored once.

use std::collections::HashMap;

use crate::leb128::{decode_uleb128, encode_uleb128};
use crate::{dex_err, error::DexError, Result};

pub const ELEMENTS_PER_INDEX: u32 = 16;
pub const ALIGNMENT: u32 = 4;

pub struct CompactOffsetTable {
    pub data: Vec<u8>,
    /// Smallest non-zero offset; all deltas are relative to it.
    pub minimum_offset: u32,
    /// Position of the block-offset index within `data`.
    pub table_offset: u32,
}

/// Builds the serialized table. Offsets may appear in any order; equal
/// offsets across indices are fine.
pub fn build(offsets: &[u32]) -> CompactOffsetTable {
    let minimum_offset = offsets
        .iter()
        .copied()
        .filter(|off| *off != 0)
        .min()
        .unwrap_or(0);

    let mut data = Vec::new();
    let mut block_offsets = Vec::with_capacity(offsets.len().div_ceil(ELEMENTS_PER_INDEX as usize));
    let mut seen_blocks: HashMap<Vec<u8>, u32> = HashMap::new();

    for chunk in offsets.chunks(ELEMENTS_PER_INDEX as usize) {
        let mut bitmask = 0u16;
        let mut block = Vec::new();
        for (bit, offset) in chunk.iter().enumerate() {
            if *offset != 0 {
                bitmask |= 1 << bit;
            }
        }
        block.extend_from_slice(&bitmask.to_le_bytes());
        for offset in chunk {
            if *offset != 0 {
                let (buf, len) = encode_uleb128(*offset - minimum_offset);
                block.extend_from_slice(&buf[..len]);
            }
        }

        let block_off = match seen_blocks.get(&block) {
            Some(existing) => *existing,
            None => {
                let off = data.len() as u32;
                data.extend_from_slice(&block);
                seen_blocks.insert(block, off);
                off
            }
        };
        block_offsets.push(block_off);
    }

    while data.len() % ALIGNMENT as usize != 0 {
        data.push(0);
    }
    let table_offset = data.len() as u32;
    for block_off in block_offsets {
        data.extend_from_slice(&block_off.to_le_bytes());
    }

    CompactOffsetTable {
        data,
        minimum_offset,
        table_offset,
    }
}

pub struct CompactOffsetTableAccessor<'a> {
    data: &'a [u8],
    minimum_offset: u32,
    table_offset: u32,
}

impl<'a> CompactOffsetTableAccessor<'a> {
    pub fn new(data: &'a [u8], minimum_offset: u32, table_offset: u32) -> Self {
        Self {
            data,
            minimum_offset,
            table_offset,
        }
    }

    pub fn get_offset(&self, index: u32) -> Result<u32> {
        let table_pos = self.table_offset as usize + (index / ELEMENTS_PER_INDEX) as usize * 4;
        let block_off = self.read_u32(table_pos)?;
        let bit_index = index % ELEMENTS_PER_INDEX;

        let bitmask = self.read_u16(block_off as usize)?;
        if bitmask & (1 << bit_index) == 0 {
            // Bit not set means the offset is 0.
            return Ok(0);
        }
        // Count how many entries precede (and include) ours; the last
        // decoded value is the one we want.
        let count = (bitmask as u32 & ((1u32 << (bit_index + 1)) - 1)).count_ones();
        let mut pos = block_off as usize + 2;
        let mut value = 0;
        for _ in 0..count {
            value = decode_uleb128(self.data, &mut pos)?;
        }
        Ok(self.minimum_offset + value)
    }

    fn read_u16(&self, pos: usize) -> Result<u16> {
        if pos + 2 > self.data.len() {
            return dex_err!(TruncatedFile);
        }
        Ok(u16::from_le_bytes([self.data[pos], self.data[pos + 1]]))
    }

    fn read_u32(&self, pos: usize) -> Result<u32> {
        if pos + 4 > self.data.len() {
            return dex_err!(TruncatedFile);
        }
        Ok(u32::from_le_bytes([
            self.data[pos],
            self.data[pos + 1],
            self.data[pos + 2],
            self.data[pos + 3],
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(offsets: &[u32]) {
        let table = build(offsets);
        let accessor =
            CompactOffsetTableAccessor::new(&table.data, table.minimum_offset, table.table_offset);
        for (i, expected) in offsets.iter().enumerate() {
            assert_eq!(accessor.get_offset(i as u32).unwrap(), *expected, "index {i}");
        }
    }

    #[test]
    fn empty_and_sparse_tables() {
        round_trip(&[0, 0, 0, 0]);
        round_trip(&[0, 100, 0, 164, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 200]);
    }

    #[test]
    fn unsorted_offsets_decode_correctly() {
        round_trip(&[500, 100, 300, 0, 200, 900, 100]);
    }

    #[test]
    fn shared_blocks_are_stored_once() {
        let offsets: Vec<u32> = std::iter::repeat(64).take(64).collect();
        let table = build(&offsets);
        let accessor =
            CompactOffsetTableAccessor::new(&table.data, table.minimum_offset, table.table_offset);
        assert_eq!(accessor.get_offset(63).unwrap(), 64);
        // Four identical blocks, one stored copy plus the index.
        assert!(table.data.len() < 4 * (2 + 16));
    }
}
