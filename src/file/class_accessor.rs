use crate::leb128::decode_uleb128;
use crate::Result;

/// One field row of a raw class-data item.
#[derive(Debug, Clone, Copy)]
pub struct RawField {
    pub field_idx: u32,
    pub access_flags: u32,
}

/// One method row of a raw class-data item. `code_off` is zero for
/// abstract and native methods.
#[derive(Debug, Clone, Copy)]
pub struct RawMethod {
    pub method_idx: u32,
    pub access_flags: u32,
    pub code_off: u32,
}

/// Decoded class-data item. Member indices are delta-encoded on disk;
/// this walker resolves them to absolute ids.
#[derive(Debug, Default)]
pub struct ClassDataAccessor {
    pub static_fields: Vec<RawField>,
    pub instance_fields: Vec<RawField>,
    pub direct_methods: Vec<RawMethod>,
    pub virtual_methods: Vec<RawMethod>,
    /// Bytes the encoded form occupies in the file.
    pub size: u32,
}

impl ClassDataAccessor {
    pub fn parse(data: &[u8], offset: u32) -> Result<ClassDataAccessor> {
        let mut pos = offset as usize;
        let static_fields_size = decode_uleb128(data, &mut pos)?;
        let instance_fields_size = decode_uleb128(data, &mut pos)?;
        let direct_methods_size = decode_uleb128(data, &mut pos)?;
        let virtual_methods_size = decode_uleb128(data, &mut pos)?;

        let mut accessor = ClassDataAccessor::default();
        accessor.static_fields = Self::read_fields(data, &mut pos, static_fields_size)?;
        accessor.instance_fields = Self::read_fields(data, &mut pos, instance_fields_size)?;
        accessor.direct_methods = Self::read_methods(data, &mut pos, direct_methods_size)?;
        accessor.virtual_methods = Self::read_methods(data, &mut pos, virtual_methods_size)?;
        accessor.size = (pos - offset as usize) as u32;
        Ok(accessor)
    }

    fn read_fields(data: &[u8], pos: &mut usize, count: u32) -> Result<Vec<RawField>> {
        let mut fields = Vec::with_capacity(count as usize);
        let mut field_idx = 0u32;
        for _ in 0..count {
            field_idx = field_idx.wrapping_add(decode_uleb128(data, pos)?);
            let access_flags = decode_uleb128(data, pos)?;
            fields.push(RawField {
                field_idx,
                access_flags,
            });
        }
        Ok(fields)
    }

    fn read_methods(data: &[u8], pos: &mut usize, count: u32) -> Result<Vec<RawMethod>> {
        let mut methods = Vec::with_capacity(count as usize);
        let mut method_idx = 0u32;
        for _ in 0..count {
            method_idx = method_idx.wrapping_add(decode_uleb128(data, pos)?);
            let access_flags = decode_uleb128(data, pos)?;
            let code_off = decode_uleb128(data, pos)?;
            methods.push(RawMethod {
                method_idx,
                access_flags,
                code_off,
            });
        }
        Ok(methods)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_delta_encoded_members() {
        // 1 static field, 0 instance fields, 2 direct methods, 0 virtual.
        let data = [
            1, 0, 2, 0, // counts
            5, 1, // field 5, flags 1
            3, 2, 0, // method 3, flags 2, no code
            4, 8, 0x80, 1, // method 3+4=7, flags 8, code off 128
        ];
        let accessor = ClassDataAccessor::parse(&data, 0).unwrap();
        assert_eq!(accessor.static_fields.len(), 1);
        assert_eq!(accessor.static_fields[0].field_idx, 5);
        assert_eq!(accessor.direct_methods[0].method_idx, 3);
        assert_eq!(accessor.direct_methods[1].method_idx, 7);
        assert_eq!(accessor.direct_methods[1].code_off, 128);
        assert_eq!(accessor.size, data.len() as u32);
        assert!(accessor.virtual_methods.is_empty());
    }
}
