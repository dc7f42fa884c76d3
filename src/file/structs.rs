// --------------------------------------------------------------------
// StringId
// --------------------------------------------------------------------
pub type StringIndex = u32;

#[repr(C)]
#[derive(Debug, Clone)]
pub struct StringId {
    pub string_data_off: u32,
}

unsafe impl plain::Plain for StringId {}

impl StringId {
    #[inline]
    pub const fn offset(&self) -> u32 {
        self.string_data_off
    }
}

// --------------------------------------------------------------------
// TypeId
// --------------------------------------------------------------------
pub type TypeIndex = u16;

#[repr(C)]
#[derive(Debug, Clone)]
pub struct TypeId {
    pub descriptor_idx: StringIndex,
}

unsafe impl plain::Plain for TypeId {}

// --------------------------------------------------------------------
// FieldId
// --------------------------------------------------------------------
pub type FieldIndex = u32;

#[repr(C)]
#[derive(Debug, Clone)]
pub struct FieldId {
    pub class_idx: TypeIndex,  // index into type_ids array for defining class
    pub type_idx: TypeIndex,   // index into type_ids array for field type
    pub name_idx: StringIndex, // index into string_ids array for field name
}

unsafe impl plain::Plain for FieldId {}

// --------------------------------------------------------------------
// ProtoId
// --------------------------------------------------------------------
pub type ProtoIndex = u16;

#[repr(C)]
#[derive(Debug, Clone)]
pub struct ProtoId {
    pub shorty_idx: StringIndex, // index into string_ids array for shorty descriptor
    pub return_type_idx: TypeIndex, // index into type_ids array for return type
    pub pad_: u16,               // padding = 0
    pub parameters_off: u32,     // file offset to type_list for parameter types
}

unsafe impl plain::Plain for ProtoId {}

// --------------------------------------------------------------------
// MethodId
// --------------------------------------------------------------------
pub type MethodIndex = u32;

#[repr(C)]
#[derive(Debug, Clone)]
pub struct MethodId {
    pub class_idx: TypeIndex,  // index into type_ids array for defining class
    pub proto_idx: ProtoIndex, // index into proto_ids array for method signature
    pub name_idx: StringIndex, // index into string_ids array for method name
}

unsafe impl plain::Plain for MethodId {}

// --------------------------------------------------------------------
// ClassDef
// --------------------------------------------------------------------
pub type ClassDefIndex = u32;

/// Sentinel for "no index" in class-def superclass/source-file slots.
pub const NO_INDEX: u32 = 0xFFFF_FFFF;

#[repr(C)]
#[derive(Debug, Clone)]
pub struct ClassDef {
    pub class_idx: TypeIndex, // index into type_ids array for this class
    pub pad1_: u16,           // padding = 0
    pub access_flags: u32,
    pub superclass_idx: u32, // index into type_ids array, or NO_INDEX
    pub interfaces_off: u32, // file offset to TypeList
    pub source_file_idx: u32, // index into string_ids, or NO_INDEX
    pub annotations_off: u32, // file offset to annotations_directory_item
    pub class_data_off: u32, // file offset to class_data_item
    pub static_values_off: u32, // file offset to EncodedArray
}

unsafe impl plain::Plain for ClassDef {}

// --------------------------------------------------------------------
// TypeItem
// --------------------------------------------------------------------
#[repr(C)]
#[derive(Debug, Clone)]
pub struct TypeItem {
    pub type_idx: TypeIndex, // index into type_ids section
}

unsafe impl plain::Plain for TypeItem {}

pub type RawTypeList<'a> = &'a [TypeItem];

// --------------------------------------------------------------------
// MapItem
// --------------------------------------------------------------------
#[repr(C)]
#[derive(Debug, Clone)]
pub struct MapItem {
    pub type_: u16,
    pub unused_: u16,
    pub size: u32,
    pub off: u32,
}

unsafe impl plain::Plain for MapItem {}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MapItemType {
    HeaderItem = 0x0000,
    StringIdItem = 0x0001,
    TypeIdItem = 0x0002,
    ProtoIdItem = 0x0003,
    FieldIdItem = 0x0004,
    MethodIdItem = 0x0005,
    ClassDefItem = 0x0006,
    CallSiteIdItem = 0x0007,
    MethodHandleItem = 0x0008,
    MapList = 0x1000,
    TypeList = 0x1001,
    AnnotationSetRefList = 0x1002,
    AnnotationSetItem = 0x1003,
    ClassDataItem = 0x2000,
    CodeItem = 0x2001,
    StringDataItem = 0x2002,
    DebugInfoItem = 0x2003,
    AnnotationItem = 0x2004,
    EncodedArrayItem = 0x2005,
    AnnotationsDirectoryItem = 0x2006,
}

impl MapItemType {
    pub fn from_raw(raw: u16) -> Option<MapItemType> {
        Some(match raw {
            0x0000 => MapItemType::HeaderItem,
            0x0001 => MapItemType::StringIdItem,
            0x0002 => MapItemType::TypeIdItem,
            0x0003 => MapItemType::ProtoIdItem,
            0x0004 => MapItemType::FieldIdItem,
            0x0005 => MapItemType::MethodIdItem,
            0x0006 => MapItemType::ClassDefItem,
            0x0007 => MapItemType::CallSiteIdItem,
            0x0008 => MapItemType::MethodHandleItem,
            0x1000 => MapItemType::MapList,
            0x1001 => MapItemType::TypeList,
            0x1002 => MapItemType::AnnotationSetRefList,
            0x1003 => MapItemType::AnnotationSetItem,
            0x2000 => MapItemType::ClassDataItem,
            0x2001 => MapItemType::CodeItem,
            0x2002 => MapItemType::StringDataItem,
            0x2003 => MapItemType::DebugInfoItem,
            0x2004 => MapItemType::AnnotationItem,
            0x2005 => MapItemType::EncodedArrayItem,
            0x2006 => MapItemType::AnnotationsDirectoryItem,
            _ => return None,
        })
    }
}

// --------------------------------------------------------------------
// MethodHandleItem
// --------------------------------------------------------------------
#[repr(C)]
#[derive(Debug, Clone)]
pub struct MethodHandleItem {
    pub method_handle_type: u16,
    pub reserved1_: u16,
    pub field_or_method_idx: u16, // Field index for accessors, method index otherwise.
    pub reserved2_: u16,
}

unsafe impl plain::Plain for MethodHandleItem {}

/// Method handle kinds 0x00-0x03 reference fields, 0x04-0x08 methods.
pub const METHOD_HANDLE_KIND_LAST_FIELD: u16 = 0x03;

// --------------------------------------------------------------------
// CallSiteIdItem
// --------------------------------------------------------------------
#[repr(C)]
#[derive(Debug, Clone)]
pub struct CallSiteIdItem {
    pub data_off: u32, // Offset into data section pointing to encoded array items.
}

unsafe impl plain::Plain for CallSiteIdItem {}

// --------------------------------------------------------------------
// CodeItem (standard)
// --------------------------------------------------------------------
#[repr(C)]
#[derive(Debug, Clone)]
pub struct CodeItem {
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
    pub tries_size: u16,
    pub debug_info_off: u32,
    pub insns_size: u32,
}

unsafe impl plain::Plain for CodeItem {}

// --------------------------------------------------------------------
// CompactCodeItem
// --------------------------------------------------------------------

/// The fixed part of a compact code item. The four register counts share a
/// packed word (4 bits each); the instruction count shares the second word
/// with the pre-header presence flags. Values that do not fit spill into
/// the pre-header, a sequence of u16s immediately before this struct.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct CompactCodeItem {
    pub fields: u16,
    pub insns_count_and_flags: u16,
}

unsafe impl plain::Plain for CompactCodeItem {}

pub mod compact_code_item {
    pub const ALIGNMENT: u32 = 2;
    /// registers, ins, outs, tries (one u16 each) + instruction count (two).
    pub const MAX_PREHEADER_SIZE: usize = 6;

    pub const REGISTERS_SIZE_SHIFT: u16 = 12;
    pub const INS_SIZE_SHIFT: u16 = 8;
    pub const OUTS_SIZE_SHIFT: u16 = 4;
    pub const TRIES_SIZE_SHIFT: u16 = 0;
    pub const BITS_PER_SIZE: u16 = 4;
    pub const SIZE_MASK: u16 = (1 << BITS_PER_SIZE) - 1;

    pub const INSNS_SIZE_SHIFT: u16 = 5;
    pub const INSNS_SIZE_BITS: u16 = 16 - INSNS_SIZE_SHIFT;

    pub const FLAG_PREHEADER_REGISTERS_SIZE: u16 = 0x1;
    pub const FLAG_PREHEADER_INS_SIZE: u16 = 0x2;
    pub const FLAG_PREHEADER_OUTS_SIZE: u16 = 0x4;
    pub const FLAG_PREHEADER_TRIES_SIZE: u16 = 0x8;
    pub const FLAG_PREHEADER_INSNS_SIZE: u16 = 0x10;
}

// --------------------------------------------------------------------
// TryItem
// --------------------------------------------------------------------
#[repr(C)]
#[derive(Debug, Clone)]
pub struct TryItem {
    pub start_addr: u32,
    pub insn_count: u16,
    pub handler_off: u16,
}

unsafe impl plain::Plain for TryItem {}

pub const TRY_ITEM_ALIGNMENT: u32 = 4;

// --------------------------------------------------------------------
// AnnotationsDirectoryItem
// --------------------------------------------------------------------
#[repr(C)]
#[derive(Debug, Clone)]
pub struct AnnotationsDirectoryItem {
    pub class_annotations_off: u32,
    pub fields_size: u32,
    pub methods_size: u32,
    pub parameters_size: u32,
}

unsafe impl plain::Plain for AnnotationsDirectoryItem {}

#[repr(C)]
#[derive(Debug, Clone)]
pub struct FieldAnnotationsItem {
    pub field_idx: u32,
    pub annotations_off: u32,
}

unsafe impl plain::Plain for FieldAnnotationsItem {}

#[repr(C)]
#[derive(Debug, Clone)]
pub struct MethodAnnotationsItem {
    pub method_idx: u32,
    pub annotations_off: u32,
}

unsafe impl plain::Plain for MethodAnnotationsItem {}

#[repr(C)]
#[derive(Debug, Clone)]
pub struct ParameterAnnotationsItem {
    pub method_idx: u32,
    pub annotations_off: u32,
}

unsafe impl plain::Plain for ParameterAnnotationsItem {}

#[repr(C)]
#[derive(Debug, Clone)]
pub struct AnnotationSetRefItem {
    pub annotations_off: u32,
}

unsafe impl plain::Plain for AnnotationSetRefItem {}

// --------------------------------------------------------------------
// Encoded value tags
// --------------------------------------------------------------------
pub mod value_types {
    pub const BYTE: u8 = 0x00;
    pub const SHORT: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const INT: u8 = 0x04;
    pub const LONG: u8 = 0x06;
    pub const FLOAT: u8 = 0x10;
    pub const DOUBLE: u8 = 0x11;
    pub const METHOD_TYPE: u8 = 0x15;
    pub const METHOD_HANDLE: u8 = 0x16;
    pub const STRING: u8 = 0x17;
    pub const TYPE: u8 = 0x18;
    pub const FIELD: u8 = 0x19;
    pub const METHOD: u8 = 0x1a;
    pub const ENUM: u8 = 0x1b;
    pub const ARRAY: u8 = 0x1c;
    pub const ANNOTATION: u8 = 0x1d;
    pub const NULL: u8 = 0x1e;
    pub const BOOLEAN: u8 = 0x1f;
}

// --------------------------------------------------------------------
// Debug info opcodes
// --------------------------------------------------------------------
pub mod debug_info_opcodes {
    pub const DBG_END_SEQUENCE: u8 = 0x00;
    pub const DBG_ADVANCE_PC: u8 = 0x01;
    pub const DBG_ADVANCE_LINE: u8 = 0x02;
    pub const DBG_START_LOCAL: u8 = 0x03;
    pub const DBG_START_LOCAL_EXTENDED: u8 = 0x04;
    pub const DBG_END_LOCAL: u8 = 0x05;
    pub const DBG_RESTART_LOCAL: u8 = 0x06;
    pub const DBG_SET_PROLOGUE_END: u8 = 0x07;
    pub const DBG_SET_EPILOGUE_BEGIN: u8 = 0x08;
    pub const DBG_SET_FILE: u8 = 0x09;
}
