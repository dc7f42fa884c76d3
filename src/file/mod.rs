use plain::Plain;

pub mod structs;
pub use structs::*;
pub mod header;
pub use header::*;
pub mod class_accessor;
pub use class_accessor::*;
pub mod code_item_accessors;
pub use code_item_accessors::*;
pub mod container;
pub use container::*;
pub mod instruction;
pub use instruction::*;
pub mod modifiers;
pub mod verifier;

use crate::offset_table::CompactOffsetTableAccessor;
use crate::{dex_err, error::DexError, leb128::decode_uleb128, utf, Result};

pub const DEX_MAGIC: &[u8] = b"dex\n";
pub const DEX_MAGIC_VERSIONS: &[&[u8]] = &[
    b"035\0", b"037\0", // Dex version 038: Android "O" and beyond.
    b"038\0", // Dex version 039: Android "P" and beyond.
    b"039\0",
];
/// Version written when the output cannot reuse the input magic.
pub const DEX_VERSION_CURRENT: &[u8] = b"039\0";

pub const CDEX_MAGIC: &[u8] = b"cdex";
pub const CDEX_MAGIC_VERSIONS: &[&[u8]] = &[b"001\0"];

pub const DEX_ENDIAN_CONSTANT: u32 = 0x12345678;

#[derive(Debug, Clone)]
pub enum DexLocation {
    InMemory,
    Path(String),
}

impl From<&'static str> for DexLocation {
    fn from(s: &'static str) -> Self {
        DexLocation::Path(s.to_string())
    }
}

impl std::fmt::Display for DexLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DexLocation::InMemory => write!(f, "[in-memory]"),
            DexLocation::Path(path) => write!(f, "{}", path),
        }
    }
}

pub type InMemoryDexFile<'a> = DexFile<'a, InMemoryDexContainer<'a>>;
pub type MmapDexFile<'a> = DexFile<'a, memmap2::Mmap>;

/// Read-side view of one dex file, standard or compact. All data-section
/// offsets stored in the file are resolved through `data_base`, which is
/// zero for standard files and `data_off` for compact ones.
pub struct DexFile<'a, T: DexContainer<'a> = memmap2::Mmap> {
    mmap: &'a T,
    header: &'a Header,
    compact: Option<&'a CompactHeader>,

    string_ids: &'a [StringId],
    type_ids: &'a [TypeId],
    field_ids: &'a [FieldId],
    proto_ids: &'a [ProtoId],
    method_ids: &'a [MethodId],
    class_defs: &'a [ClassDef],
    method_handles: &'a [MethodHandleItem],
    call_site_ids: &'a [CallSiteIdItem],
    map_items: &'a [MapItem],

    location: DexLocation,
}

macro_rules! check_lt_result {
    ($idx:expr, $count:expr, $item_ty:tt) => {
        if ($idx as usize) >= ($count as usize) {
            return dex_err!(DexIndexError {
                index: $idx as u32,
                item_ty: stringify!($item_ty),
                max: $count as usize,
            });
        }
    };
}

impl<'a, C: DexContainer<'a>> DexFile<'a, C> {
    #[inline]
    fn header_available(base: &'a C) -> bool {
        base.len() >= std::mem::size_of::<Header>() && plain::is_aligned::<Header>(base)
    }

    pub fn get_section<T: Plain>(base: &'a C, offset: u32, len: u32) -> &'a [T] {
        if len == 0 {
            return &[];
        }
        // sanity checks so that this function will always return a valid slice
        let size = base.len();
        let section_size = len as usize * std::mem::size_of::<T>();
        if (offset as usize + section_size) > size || offset as usize >= size {
            return &[];
        }

        let data = &base[offset as usize..];
        match T::slice_from_bytes_len(data, len as usize) {
            Ok(slice) => slice,
            Err(_) => &[],
        }
    }

    pub fn from_raw_parts(base: &'a C, location: DexLocation) -> Result<DexFile<'a, C>> {
        if !DexFile::header_available(base) {
            return dex_err!(TruncatedFile);
        }

        let header = match Header::from_bytes(base) {
            Ok(header) => header,
            Err(_) => return dex_err!(TruncatedFile),
        };
        let compact = if &header.magic[..4] == CDEX_MAGIC {
            if base.len() < std::mem::size_of::<CompactHeader>() {
                return dex_err!(TruncatedFile);
            }
            match CompactHeader::from_bytes(base) {
                Ok(compact) => Some(compact),
                Err(_) => return dex_err!(TruncatedFile),
            }
        } else {
            None
        };

        let mut dex = Self {
            mmap: base,
            header,
            compact,
            string_ids: DexFile::get_section(base, header.string_ids_off, header.string_ids_size),
            type_ids: DexFile::get_section(base, header.type_ids_off, header.type_ids_size),
            field_ids: DexFile::get_section(base, header.field_ids_off, header.field_ids_size),
            proto_ids: DexFile::get_section(base, header.proto_ids_off, header.proto_ids_size),
            method_ids: DexFile::get_section(base, header.method_ids_off, header.method_ids_size),
            class_defs: DexFile::get_section(base, header.class_defs_off, header.class_defs_size),
            method_handles: &[],
            call_site_ids: &[],
            map_items: &[],
            location,
        };

        dex.init_sections_from_maplist();
        Ok(dex)
    }

    pub fn open(container: &DexFileContainer) -> Result<MmapDexFile<'_>> {
        container.open()
    }

    pub fn get_location(&self) -> &DexLocation {
        &self.location
    }

    #[inline(always)]
    pub fn file_size(&self) -> usize {
        self.mmap.len()
    }

    pub fn get_header(&self) -> &Header {
        self.header
    }

    pub fn get_compact_header(&self) -> Option<&CompactHeader> {
        self.compact
    }

    #[inline(always)]
    pub fn is_compact_dex(&self) -> bool {
        self.compact.is_some()
    }

    /// Base every data-section offset is relative to.
    #[inline(always)]
    pub fn data_base(&self) -> u32 {
        match self.compact {
            Some(_) => self.header.data_off,
            None => 0,
        }
    }

    /// Resolves a data-section offset to a file-absolute one, keeping the
    /// "zero means absent" convention.
    #[inline(always)]
    pub fn resolve_data_off(&self, offset: u32) -> u32 {
        match offset {
            0 => 0,
            _ => self.data_base() + offset,
        }
    }

    pub fn raw_data(&self) -> &'a [u8] {
        self.mmap.data()
    }

    pub fn is_magic_valid(&self) -> bool {
        &self.header.magic[..4] == DEX_MAGIC || &self.header.magic[..4] == CDEX_MAGIC
    }

    pub fn is_version_valid(&self) -> bool {
        let version_raw = &self.header.magic[4..];
        if self.is_compact_dex() {
            CDEX_MAGIC_VERSIONS.contains(&version_raw)
        } else {
            DEX_MAGIC_VERSIONS.contains(&version_raw)
        }
    }

    pub fn expected_header_size(&self) -> u32 {
        if self.is_compact_dex() {
            std::mem::size_of::<CompactHeader>() as u32
        } else {
            std::mem::size_of::<Header>() as u32
        }
    }

    // -- strings
    #[inline(always)]
    pub fn get_string_id(&self, idx: u32) -> Result<&'a StringId> {
        check_lt_result!(idx, self.num_string_ids(), StringId);
        Ok(&self.string_ids[idx as usize])
    }

    #[inline(always)]
    pub fn string_ids(&self) -> &'a [StringId] {
        self.string_ids
    }

    #[inline(always)]
    pub fn num_string_ids(&self) -> u32 {
        self.string_ids.len() as u32
    }

    /// Returns the declared UTF-16 length and the MUTF-8 payload without
    /// its trailing null byte.
    #[inline]
    pub fn get_string_data(&self, string_id: &StringId) -> Result<(u32, &'a [u8])> {
        let offset = self.resolve_data_off(string_id.offset());
        check_lt_result!(offset, self.file_size(), "string-id");
        let mut pos = offset as usize;
        let utf16_len = decode_uleb128(self.mmap, &mut pos)?;

        check_lt_result!(pos, self.file_size(), "string-data");
        match self.mmap[pos..].iter().position(|x| *x == 0) {
            Some(end) => Ok((utf16_len, &self.mmap[pos..pos + end])),
            None => dex_err!(BadStringData, pos),
        }
    }

    #[inline(always)]
    pub fn get_utf16_str_lossy(&self, string_id: &StringId) -> Result<String> {
        let (_, data) = self.get_string_data(string_id)?;
        Ok(utf::mutf8_to_str_lossy(data))
    }

    #[inline(always)]
    pub fn get_utf16_str_lossy_at(&self, idx: u32) -> Result<String> {
        self.get_utf16_str_lossy(self.get_string_id(idx)?)
    }

    // -- types
    #[inline(always)]
    pub fn get_type_id(&self, idx: TypeIndex) -> Result<&'a TypeId> {
        check_lt_result!(idx as u32, self.num_type_ids(), TypeId);
        Ok(&self.type_ids[idx as usize])
    }

    #[inline(always)]
    pub fn num_type_ids(&self) -> u32 {
        self.type_ids.len() as u32
    }

    #[inline(always)]
    pub fn get_type_ids(&self) -> &'a [TypeId] {
        self.type_ids
    }

    #[inline(always)]
    pub fn get_type_desc_at(&self, idx: TypeIndex) -> Result<String> {
        let type_id = self.get_type_id(idx)?;
        self.get_utf16_str_lossy_at(type_id.descriptor_idx)
    }

    // -- fields
    #[inline]
    pub fn get_field_id(&self, idx: u32) -> Result<&'a FieldId> {
        check_lt_result!(idx, self.field_ids.len(), FieldId);
        Ok(&self.field_ids[idx as usize])
    }

    #[inline(always)]
    pub fn num_field_ids(&self) -> u32 {
        self.field_ids.len() as u32
    }

    #[inline(always)]
    pub fn get_field_ids(&self) -> &'a [FieldId] {
        self.field_ids
    }

    // -- protos
    pub fn get_proto_id(&self, idx: ProtoIndex) -> Result<&'a ProtoId> {
        check_lt_result!(idx, self.proto_ids.len(), ProtoId);
        Ok(&self.proto_ids[idx as usize])
    }

    #[inline(always)]
    pub fn num_proto_ids(&self) -> u32 {
        self.proto_ids.len() as u32
    }

    #[inline(always)]
    pub fn get_proto_ids(&self) -> &'a [ProtoId] {
        self.proto_ids
    }

    // -- methods
    #[inline(always)]
    pub fn get_method_id(&self, idx: u32) -> Result<&'a MethodId> {
        check_lt_result!(idx, self.method_ids.len(), MethodId);
        Ok(&self.method_ids[idx as usize])
    }

    #[inline(always)]
    pub fn num_method_ids(&self) -> u32 {
        self.method_ids.len() as u32
    }

    #[inline(always)]
    pub fn get_method_ids(&self) -> &'a [MethodId] {
        self.method_ids
    }

    // -- class defs
    #[inline(always)]
    pub fn get_class_def(&self, idx: u32) -> Result<&'a ClassDef> {
        check_lt_result!(idx, self.class_defs.len(), ClassDef);
        Ok(&self.class_defs[idx as usize])
    }

    #[inline(always)]
    pub fn num_class_defs(&self) -> u32 {
        self.class_defs.len() as u32
    }

    #[inline(always)]
    pub fn get_class_defs(&self) -> &'a [ClassDef] {
        self.class_defs
    }

    #[inline]
    pub fn get_class_descriptor(&self, class_def: &ClassDef) -> Result<String> {
        self.get_type_desc_at(class_def.class_idx)
    }

    // -- method handles / call sites
    #[inline(always)]
    pub fn get_method_handles(&self) -> &'a [MethodHandleItem] {
        self.method_handles
    }

    #[inline(always)]
    pub fn num_method_handles(&self) -> u32 {
        self.method_handles.len() as u32
    }

    #[inline(always)]
    pub fn get_call_site_ids(&self) -> &'a [CallSiteIdItem] {
        self.call_site_ids
    }

    #[inline(always)]
    pub fn num_call_site_ids(&self) -> u32 {
        self.call_site_ids.len() as u32
    }

    // -- map list
    #[inline(always)]
    pub fn get_map_items(&self) -> &'a [MapItem] {
        self.map_items
    }

    // -- type lists
    /// `offset` is a data-section offset as stored in the file.
    #[inline]
    pub fn get_type_list(&self, offset: u32) -> Result<Option<RawTypeList<'a>>> {
        if offset == 0 {
            return Ok(None);
        }
        let offset = self.resolve_data_off(offset);
        check_lt_result!(offset, self.file_size(), TypeList);
        let length: &u32 = self.non_null_data_ptr(offset)?;
        let data_off = offset + std::mem::size_of::<u32>() as u32;
        Ok(Some(self.non_null_array_data_ptr(data_off, *length as usize)?))
    }

    // -- code items
    /// `offset` is a data-section offset as stored in a class-data item.
    pub fn get_code_item_accessor(&self, offset: u32) -> Result<CodeItemAccessor<'a>> {
        let resolved = self.resolve_data_off(offset);
        check_lt_result!(resolved, self.file_size(), "code item offset");
        if self.is_compact_dex() {
            CodeItemAccessor::from_compact(self.mmap, resolved)
        } else {
            CodeItemAccessor::from_standard(self.mmap, resolved)
        }
    }

    /// The debug-info offset for one method, resolved either from the code
    /// item itself (standard) or from the side table (compact).
    pub fn get_debug_info_offset(
        &self,
        accessor: &CodeItemAccessor<'_>,
        method_idx: u32,
    ) -> Result<u32> {
        match self.compact {
            None => Ok(accessor.debug_info_off()),
            Some(compact) => {
                if compact.debug_info_offsets_pos == 0 {
                    return Ok(0);
                }
                let table_start = self.resolve_data_off(compact.debug_info_offsets_pos) as usize;
                check_lt_result!(table_start, self.file_size(), "debug info offsets table");
                let table = CompactOffsetTableAccessor::new(
                    &self.mmap[table_start..],
                    compact.debug_info_base,
                    compact.debug_info_offsets_table_offset,
                );
                table.get_offset(method_idx)
            }
        }
    }

    // -- raw byte helpers
    pub fn data_at(&self, offset: u32) -> Result<&'a [u8]> {
        check_lt_result!(offset, self.file_size(), "raw data");
        Ok(&self.mmap[offset as usize..])
    }

    #[inline]
    pub fn non_null_data_ptr<T: Plain>(&self, offset: u32) -> Result<&'a T> {
        if offset == 0 || offset as usize >= self.file_size() {
            return dex_err!(DexLayoutError {
                offset,
                item_ty: std::any::type_name::<T>(),
                array_len: 0,
                file_size: self.file_size()
            });
        }
        match T::from_bytes(&self.mmap[offset as usize..]) {
            Ok(v) => Ok(v),
            Err(_) => dex_err!(DexLayoutError {
                offset,
                item_ty: std::any::type_name::<T>(),
                array_len: 0,
                file_size: self.file_size()
            }),
        }
    }

    #[inline]
    pub fn non_null_array_data_ptr<T: Plain>(&self, offset: u32, len: usize) -> Result<&'a [T]> {
        if len == 0 {
            return Ok(&[]);
        }
        if offset == 0 || offset as usize >= self.file_size() {
            return dex_err!(DexLayoutError {
                offset,
                item_ty: std::any::type_name::<T>(),
                array_len: len,
                file_size: self.file_size()
            });
        }
        match T::slice_from_bytes_len(&self.mmap[offset as usize..], len) {
            Ok(v) => Ok(v),
            Err(_) => dex_err!(DexLayoutError {
                offset,
                item_ty: std::any::type_name::<T>(),
                array_len: len,
                file_size: self.file_size()
            }),
        }
    }

    pub fn link_data(&self) -> &'a [u8] {
        let off = self.header.link_off as usize;
        let size = self.header.link_size as usize;
        if size == 0 || off + size > self.file_size() {
            return &[];
        }
        &self.mmap[off..off + size]
    }

    pub fn check_header(&self) -> Result<()> {
        let container_size = self.file_size();
        if container_size < std::mem::size_of::<Header>() {
            return dex_err!(
                DexFileError,
                "Unable to open {}: File size is too small to fit dex header",
                self.location
            );
        }

        self.check_magic_and_version()?;

        let expected_header_size = self.expected_header_size();
        if expected_header_size != self.header.header_size {
            return dex_err!(
                DexFileError,
                "Unable to open {}: Header size is {} but {} was expected",
                self.location,
                self.header.header_size,
                expected_header_size
            );
        }

        if container_size < self.header.file_size as usize {
            return dex_err!(
                DexFileError,
                "Unable to open {}: File size is {} but the header expects {}",
                self.location,
                container_size,
                self.header.file_size
            );
        }
        Ok(())
    }

    fn check_magic_and_version(&self) -> Result<()> {
        if !self.is_magic_valid() {
            return dex_err!(
                DexFileError,
                "Unrecognized magic number in {}: {:?}",
                self.location,
                &self.header.magic[..4]
            );
        }

        if !self.is_version_valid() {
            return dex_err!(
                DexFileError,
                "Unrecognized dex version in {}: {:?}",
                self.location,
                &self.header.magic[4..]
            );
        }
        Ok(())
    }

    #[inline]
    fn maplist_available(&self) -> bool {
        if self.header.map_off == 0x00 {
            return false;
        }
        let map_off = self.resolve_data_off(self.header.map_off) as usize;
        map_off + std::mem::size_of::<u32>() <= self.file_size()
    }

    fn init_sections_from_maplist(&mut self) {
        if !self.maplist_available() {
            // bad offset, reported through the verifier
            return;
        }

        let map_list_size_off = self.resolve_data_off(self.header.map_off);
        let map_list_off = map_list_size_off as usize + std::mem::size_of::<u32>();
        if map_list_off >= self.file_size() {
            return;
        }

        let count: &u32 = match self.non_null_data_ptr(map_list_size_off) {
            Ok(v) => v,
            Err(_) => return,
        };
        let map_limit =
            (self.file_size() - map_list_off) / std::mem::size_of::<MapItem>();
        if *count as usize > map_limit {
            // bad file
            return;
        }

        let items = match self.non_null_array_data_ptr::<MapItem>(map_list_off as u32, *count as usize)
        {
            Ok(v) => v,
            Err(_) => return,
        };
        self.map_items = items;
        for map_item in items {
            match MapItemType::from_raw(map_item.type_) {
                Some(MapItemType::MethodHandleItem) => {
                    self.method_handles =
                        DexFile::get_section(self.mmap, map_item.off, map_item.size);
                }
                Some(MapItemType::CallSiteIdItem) => {
                    self.call_site_ids =
                        DexFile::get_section(self.mmap, map_item.off, map_item.size);
                }
                _ => {}
            }
        }
    }
}
