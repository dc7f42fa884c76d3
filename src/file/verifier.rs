use crate::{dex_err, error::DexError, Result};

use super::{DexContainer, DexFile, Header, DEX_ENDIAN_CONSTANT};

impl<'a, C: DexContainer<'a>> DexFile<'a, C> {
    /// Structural header validation plus an optional checksum check.
    pub fn verify(&self, verify_checksum: bool) -> Result<()> {
        check_header(self, verify_checksum)
    }

    /// Adler-32 over everything past the magic and checksum fields. For a
    /// compact file serialized as `main || data` this covers both
    /// sections, matching the writer.
    pub fn calculate_checksum(&self) -> u32 {
        let data = &self.raw_data()[12..self.file_size()];
        adler32::adler32(data).unwrap_or(0)
    }
}

fn check_header<'a, C>(dex: &DexFile<'a, C>, verify_checksum: bool) -> Result<()>
where
    C: DexContainer<'a>,
{
    let size = dex.file_size();
    if size < std::mem::size_of::<Header>() {
        return dex_err!(TruncatedFile);
    }

    if !dex.is_magic_valid() {
        return dex_err!(BadFileMagic);
    }

    if !dex.is_version_valid() {
        return dex_err!(UnknownDexVersion {
            version: dex.get_header().get_version()
        });
    }

    let header = dex.get_header();
    let header_size = dex.expected_header_size() as usize;
    let file_size = header.file_size as usize;

    if file_size < header_size {
        return dex_err!(FileSizeAtLeast {
            actual: file_size,
            expected: header_size
        });
    }
    if file_size > size {
        return dex_err!(FileSizeAtMost {
            actual: file_size,
            expected: size
        });
    }

    if header.header_size as usize != header_size {
        return dex_err!(BadHeaderSize {
            size: header.header_size,
            expected: header_size as u32
        });
    }

    if header.endian_tag != DEX_ENDIAN_CONSTANT {
        return dex_err!(UnexpectedEndianess, header.endian_tag);
    }

    if verify_checksum {
        let checksum = dex.calculate_checksum();
        if checksum != header.checksum {
            return dex_err!(BadChecksum {
                actual: checksum,
                expected: header.checksum
            });
        }
    }

    check_valid_offset_and_size(dex, header.link_off, header.link_size, "link")?;
    check_valid_offset_and_size(
        dex,
        dex.resolve_data_off(header.map_off),
        std::mem::size_of::<u32>() as u32,
        "map",
    )?;
    check_valid_offset_and_size(
        dex,
        header.string_ids_off,
        header.string_ids_size,
        "string-ids",
    )?;
    check_valid_offset_and_size(dex, header.type_ids_off, header.type_ids_size, "type-ids")?;
    check_valid_offset_and_size(
        dex,
        header.proto_ids_off,
        header.proto_ids_size,
        "proto-ids",
    )?;
    check_valid_offset_and_size(
        dex,
        header.field_ids_off,
        header.field_ids_size,
        "field-ids",
    )?;
    check_valid_offset_and_size(
        dex,
        header.method_ids_off,
        header.method_ids_size,
        "method-ids",
    )?;
    check_valid_offset_and_size(
        dex,
        header.class_defs_off,
        header.class_defs_size,
        "class-defs",
    )?;
    check_valid_offset_and_size(dex, header.data_off, header.data_size, "data")?;
    Ok(())
}

fn check_valid_offset_and_size<'a, C>(
    dex: &DexFile<'a, C>,
    offset: u32,
    size: u32,
    label: &'static str,
) -> Result<()>
where
    C: DexContainer<'a>,
{
    if size == 0 {
        if offset != 0 {
            return dex_err!(BadOffsetNoSize {
                offset,
                section: label
            });
        }
        return Ok(());
    }

    let file_size = dex.file_size();
    let header_offset = std::mem::size_of::<Header>() as u32;
    if offset < header_offset {
        return dex_err!(BadOffsetInHeader {
            offset,
            header_size: header_offset as usize,
            section: label
        });
    }
    if offset as usize > file_size {
        return dex_err!(BadOffsetTooLarge {
            offset,
            size: file_size,
            section: label
        });
    }

    Ok(())
}
