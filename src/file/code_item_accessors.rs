use plain::Plain;

use super::structs::{compact_code_item, CodeItem, CompactCodeItem, TryItem};
use crate::leb128::{decode_sleb128, decode_uleb128};
use crate::{dex_err, error::DexError, Result};

/// Uniform view of a standard or compact code item.
///
/// `code_off` addresses the fixed struct itself; a compact item's
/// pre-header lies immediately before it. The debug-info offset is only
/// populated for standard items; compact files keep it in the side table
/// and the caller resolves it by method index.
pub struct CodeItemAccessor<'a> {
    code_off: u32,
    registers_size: u16,
    ins_size: u16,
    outs_size: u16,
    tries_size: u16,
    debug_info_off: u32,
    insns: &'a [u16],
    /// File offset one past the instruction array.
    insns_end_off: u32,
}

impl<'a> CodeItemAccessor<'a> {
    pub fn from_standard(data: &'a [u8], code_off: u32) -> Result<CodeItemAccessor<'a>> {
        let item: &CodeItem = read_at(data, code_off)?;
        let insns_off = code_off + std::mem::size_of::<CodeItem>() as u32;
        let insns = read_slice_at(data, insns_off, item.insns_size as usize)?;
        Ok(CodeItemAccessor {
            code_off,
            registers_size: item.registers_size,
            ins_size: item.ins_size,
            outs_size: item.outs_size,
            tries_size: item.tries_size,
            debug_info_off: item.debug_info_off,
            insns,
            insns_end_off: insns_off + item.insns_size * 2,
        })
    }

    pub fn from_compact(data: &'a [u8], code_off: u32) -> Result<CodeItemAccessor<'a>> {
        use compact_code_item::*;

        let item: &CompactCodeItem = read_at(data, code_off)?;
        let fields = item.fields;
        let flags = item.insns_count_and_flags;

        let mut registers_size = (fields >> REGISTERS_SIZE_SHIFT) & SIZE_MASK;
        let mut ins_size = (fields >> INS_SIZE_SHIFT) & SIZE_MASK;
        let mut outs_size = (fields >> OUTS_SIZE_SHIFT) & SIZE_MASK;
        let mut tries_size = (fields >> TRIES_SIZE_SHIFT) & SIZE_MASK;
        let mut insns_size = (flags >> INSNS_SIZE_SHIFT) as u32;

        // Spilled values live in the pre-header, read back-to-front.
        let mut preheader_off = code_off;
        let mut read_back = |off: &mut u32| -> Result<u16> {
            if *off < 2 {
                return dex_err!(TruncatedFile);
            }
            *off -= 2;
            Ok(u16::from_le_bytes([
                data[*off as usize],
                data[*off as usize + 1],
            ]))
        };
        if flags & FLAG_PREHEADER_INSNS_SIZE != 0 {
            let lo = read_back(&mut preheader_off)? as u32;
            let hi = read_back(&mut preheader_off)? as u32;
            insns_size = (hi << 16) | lo;
        }
        if flags & FLAG_PREHEADER_TRIES_SIZE != 0 {
            tries_size = read_back(&mut preheader_off)?;
        }
        if flags & FLAG_PREHEADER_OUTS_SIZE != 0 {
            outs_size = read_back(&mut preheader_off)?;
        }
        if flags & FLAG_PREHEADER_INS_SIZE != 0 {
            ins_size = read_back(&mut preheader_off)?;
        }
        if flags & FLAG_PREHEADER_REGISTERS_SIZE != 0 {
            registers_size = read_back(&mut preheader_off)?;
        }

        let insns_off = code_off + std::mem::size_of::<CompactCodeItem>() as u32;
        let insns = read_slice_at(data, insns_off, insns_size as usize)?;
        Ok(CodeItemAccessor {
            code_off,
            registers_size,
            ins_size,
            outs_size,
            tries_size,
            debug_info_off: 0,
            insns,
            insns_end_off: insns_off + insns_size * 2,
        })
    }

    #[inline(always)]
    pub fn code_off(&self) -> u32 {
        self.code_off
    }

    pub fn registers_size(&self) -> u16 {
        self.registers_size
    }

    pub fn ins_size(&self) -> u16 {
        self.ins_size
    }

    pub fn outs_size(&self) -> u16 {
        self.outs_size
    }

    pub fn tries_size(&self) -> u16 {
        self.tries_size
    }

    pub fn debug_info_off(&self) -> u32 {
        self.debug_info_off
    }

    #[inline(always)]
    pub fn insns(&self) -> &'a [u16] {
        self.insns
    }

    #[inline]
    pub fn insns_size_in_code_units(&self) -> u32 {
        self.insns.len() as u32
    }

    pub fn has_code(&self) -> bool {
        !self.insns.is_empty()
    }

    /// File offset of the try-item table (4-byte aligned past the
    /// instructions); only meaningful when `tries_size > 0`.
    pub fn tries_off(&self) -> u32 {
        (self.insns_end_off + 3) & !3
    }

    /// File offset of the encoded catch-handler list.
    pub fn handlers_off(&self) -> u32 {
        self.tries_off() + self.tries_size as u32 * std::mem::size_of::<TryItem>() as u32
    }

    pub fn try_items<'d>(&self, data: &'d [u8]) -> Result<&'d [TryItem]> {
        if self.tries_size == 0 {
            return Ok(&[]);
        }
        read_slice_at(data, self.tries_off(), self.tries_size as usize)
    }

    /// Total extent of the item in the file, handler table included.
    pub fn code_item_size(&self, data: &[u8]) -> Result<u32> {
        if self.tries_size == 0 {
            return Ok(self.insns_end_off - self.code_off);
        }
        let handlers_base = self.handlers_off() as usize;
        let mut pos = handlers_base;
        let handlers_size = decode_uleb128(data, &mut pos)?;
        for _ in 0..handlers_size {
            let size = decode_sleb128(data, &mut pos)?;
            let pairs = size.unsigned_abs();
            for _ in 0..pairs {
                decode_uleb128(data, &mut pos)?; // type_idx
                decode_uleb128(data, &mut pos)?; // addr
            }
            if size <= 0 {
                decode_uleb128(data, &mut pos)?; // catch_all_addr
            }
        }
        Ok(pos as u32 - self.code_off)
    }
}

#[inline]
fn read_at<'a, T: Plain>(data: &'a [u8], offset: u32) -> Result<&'a T> {
    if offset == 0 || offset as usize >= data.len() {
        return dex_err!(DexLayoutError {
            offset,
            item_ty: std::any::type_name::<T>(),
            array_len: 0,
            file_size: data.len()
        });
    }
    match T::from_bytes(&data[offset as usize..]) {
        Ok(v) => Ok(v),
        Err(_) => dex_err!(DexLayoutError {
            offset,
            item_ty: std::any::type_name::<T>(),
            array_len: 0,
            file_size: data.len()
        }),
    }
}

#[inline]
fn read_slice_at<'a, T: Plain>(data: &'a [u8], offset: u32, len: usize) -> Result<&'a [T]> {
    if len == 0 {
        return Ok(&[]);
    }
    if offset as usize >= data.len() {
        return dex_err!(DexLayoutError {
            offset,
            item_ty: std::any::type_name::<T>(),
            array_len: len,
            file_size: data.len()
        });
    }
    match T::slice_from_bytes_len(&data[offset as usize..], len) {
        Ok(v) => Ok(v),
        Err(_) => dex_err!(DexLayoutError {
            offset,
            item_ty: std::any::type_name::<T>(),
            array_len: len,
            file_size: data.len()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_accessor_reads_fields() {
        let mut data = vec![0u8; 4]; // padding so the offset is non-zero
        data.extend_from_slice(&2u16.to_le_bytes()); // registers
        data.extend_from_slice(&1u16.to_le_bytes()); // ins
        data.extend_from_slice(&0u16.to_le_bytes()); // outs
        data.extend_from_slice(&0u16.to_le_bytes()); // tries
        data.extend_from_slice(&0u32.to_le_bytes()); // debug info
        data.extend_from_slice(&1u32.to_le_bytes()); // insns size
        data.extend_from_slice(&0x000eu16.to_le_bytes()); // return-void

        let accessor = CodeItemAccessor::from_standard(&data, 4).unwrap();
        assert_eq!(accessor.registers_size(), 2);
        assert_eq!(accessor.ins_size(), 1);
        assert_eq!(accessor.insns(), &[0x000e]);
        assert_eq!(accessor.code_item_size(&data).unwrap(), 18);
    }

    #[test]
    fn compact_accessor_reads_packed_and_spilled_fields() {
        use compact_code_item::*;

        // Pre-header carries a spilled registers size; everything else is
        // packed. Layout: [pad u16][registers u16][fields][count+flags][insns].
        let mut data = vec![0u8; 2];
        data.extend_from_slice(&100u16.to_le_bytes()); // spilled registers
        let fields: u16 = (1 << INS_SIZE_SHIFT) | (2 << OUTS_SIZE_SHIFT);
        data.extend_from_slice(&fields.to_le_bytes());
        let flags: u16 = FLAG_PREHEADER_REGISTERS_SIZE | (1 << INSNS_SIZE_SHIFT);
        data.extend_from_slice(&flags.to_le_bytes());
        data.extend_from_slice(&0x000eu16.to_le_bytes());

        let accessor = CodeItemAccessor::from_compact(&data, 4).unwrap();
        assert_eq!(accessor.registers_size(), 100);
        assert_eq!(accessor.ins_size(), 1);
        assert_eq!(accessor.outs_size(), 2);
        assert_eq!(accessor.tries_size(), 0);
        assert_eq!(accessor.insns(), &[0x000e]);
    }
}
