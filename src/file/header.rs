#[repr(C)]
#[derive(Debug, Clone)]
pub struct Header {
    /// magic value
    pub magic: [u8; 8],

    /// Adler32 checksum of the rest of the file (everything but `magic` and
    /// this field); used to detect file corruption.
    pub checksum: u32,

    /// SHA-1 signature (hash) of the rest of the file (everything but
    /// `magic`, `checksum`, and this field); used to uniquely identify
    /// files.
    pub signature: [u8; 20],

    /// Size of the entire file including the header.
    pub file_size: u32,

    /// Size of the header (this struct), in bytes. It is always 0x70 for
    /// standard dex.
    pub header_size: u32,

    /// Endian constant - only the little-endian byte order is supported.
    pub endian_tag: u32,

    /// size of the link section, or 0 if this file isn't statically linked
    pub link_size: u32,

    /// offset from the start of the file to the link section, or `0` if
    /// `link_size == 0`.
    pub link_off: u32,

    /// offset to the map item. The offset, which must be non-zero, points
    /// into the `data` section.
    pub map_off: u32,

    /// count of strings in the string identifiers list
    pub string_ids_size: u32,

    /// offset from the start of the file to the string identifiers list, or
    /// `0` if `string_ids_size == 0`.
    pub string_ids_off: u32,

    /// count of elements in the type identifiers list, at most `65535`
    pub type_ids_size: u32,

    /// offset from the start of the file to the type identifiers list, or
    /// `0` if `type_ids_size == 0`.
    pub type_ids_off: u32,

    /// count of elements in the proto identifiers list, at most `65535`
    pub proto_ids_size: u32,

    /// offset from the start of the file to the proto identifiers list, or
    /// `0` if `proto_ids_size == 0`.
    pub proto_ids_off: u32,

    /// count of elements in the field identifiers list
    pub field_ids_size: u32,

    /// offset from the start of the file to the field identifiers list, or
    /// `0` if `field_ids_size == 0`.
    pub field_ids_off: u32,

    /// count of elements in the method identifiers list
    pub method_ids_size: u32,

    /// offset from the start of the file to the method identifiers list, or
    /// `0` if `method_ids_size == 0`.
    pub method_ids_off: u32,

    /// count of elements in the class definitions list
    pub class_defs_size: u32,

    /// offset from the start of the file to the class definitions list, or
    /// `0` if `class_defs_size == 0`.
    pub class_defs_off: u32,

    /// size of the data section (in bytes)
    pub data_size: u32,

    /// offset from the start of the file to the data section
    pub data_off: u32,
}

unsafe impl plain::Plain for Header {}

impl Header {
    pub fn get_magic(&self) -> &[u8; 8] {
        &self.magic
    }

    pub fn get_signature(&self) -> &[u8; 20] {
        &self.signature
    }

    pub fn get_version(&self) -> u32 {
        let version_raw = &self.magic[4..7];
        String::from_utf8_lossy(version_raw)
            .parse()
            .unwrap_or_default() // will lead to invalid dex file
    }
}

/// Compact-dex header: the standard fields followed by the feature flags,
/// the debug-info offset table anchors and the owned-data bounds.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct CompactHeader {
    pub base: Header,
    pub feature_flags: u32,
    pub debug_info_offsets_pos: u32,
    pub debug_info_offsets_table_offset: u32,
    pub debug_info_base: u32,
    pub owned_data_begin: u32,
    pub owned_data_end: u32,
}

unsafe impl plain::Plain for CompactHeader {}

pub mod feature_flags {
    pub const DEFAULT_METHODS: u32 = 0x1;
}
