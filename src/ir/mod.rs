//! In-memory representation of a dex file.
//!
//! Indexed id tables are plain vectors whose position is the item index.
//! Every by-offset collection is a [`Section`]: an append-only arena of
//! items plus a separate emission order. Cross-references are `u32`
//! handles into the owning arena, so the layout passes can permute the
//! emission order without invalidating any reference.

pub mod builder;

pub const HEADER_ITEM_SIZE: u32 = 0x70;
pub const STRING_ID_ITEM_SIZE: u32 = 4;
pub const TYPE_ID_ITEM_SIZE: u32 = 4;
pub const PROTO_ID_ITEM_SIZE: u32 = 12;
pub const FIELD_ID_ITEM_SIZE: u32 = 8;
pub const METHOD_ID_ITEM_SIZE: u32 = 8;
pub const CLASS_DEF_ITEM_SIZE: u32 = 32;
pub const CALL_SITE_ID_ITEM_SIZE: u32 = 4;
pub const METHOD_HANDLE_ITEM_SIZE: u32 = 8;

/// Arena handles. All index into the `items` vector of the matching
/// [`Section`].
pub type StringDataRef = u32;
pub type TypeListRef = u32;
pub type EncodedArrayRef = u32;
pub type AnnotationItemRef = u32;
pub type AnnotationSetRef = u32;
pub type AnnotationSetRefListRef = u32;
pub type AnnotationsDirectoryRef = u32;
pub type CodeItemRef = u32;
pub type DebugInfoRef = u32;
pub type ClassDataRef = u32;

/// Offsets start out unassigned; the writer stamps them once per
/// emission pass.
pub const OFFSET_UNASSIGNED: u32 = 0;

/// A by-offset collection: `items` is the arena in creation order,
/// `order` the emission order. The two start out identical; the builder
/// rewrites `order` to match the input map list, the layout planner
/// permutes it again.
#[derive(Debug)]
pub struct Section<T> {
    pub items: Vec<T>,
    pub order: Vec<u32>,
    pub offset: u32,
}

impl<T> Default for Section<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            order: Vec::new(),
            offset: OFFSET_UNASSIGNED,
        }
    }
}

impl<T> Section<T> {
    pub fn push(&mut self, item: T) -> u32 {
        let id = self.items.len() as u32;
        self.items.push(item);
        self.order.push(id);
        id
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline(always)]
    pub fn get(&self, id: u32) -> &T {
        &self.items[id as usize]
    }

    #[inline(always)]
    pub fn get_mut(&mut self, id: u32) -> &mut T {
        &mut self.items[id as usize]
    }

    /// Items in emission order.
    pub fn iter_in_order(&self) -> impl Iterator<Item = &T> {
        self.order.iter().map(|id| &self.items[*id as usize])
    }

    /// Rewrites the emission order to `(key(item), creation id)` ascending.
    pub fn sort_order_by_key<K: Ord>(&mut self, mut key: impl FnMut(u32, &T) -> K) {
        let items = &self.items;
        self.order
            .sort_by_key(|id| (key(*id, &items[*id as usize]), *id));
    }
}

/// An id table: position in `items` is the item's index.
#[derive(Debug)]
pub struct IndexedSection<T> {
    pub items: Vec<T>,
    pub offset: u32,
}

impl<T> Default for IndexedSection<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            offset: OFFSET_UNASSIGNED,
        }
    }
}

impl<T> IndexedSection<T> {
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// --------------------------------------------------------------------
// Indexed items
// --------------------------------------------------------------------

#[derive(Debug)]
pub struct StringId {
    pub offset: u32,
    pub index: u32,
    pub string_data: StringDataRef,
}

#[derive(Debug)]
pub struct TypeId {
    pub offset: u32,
    pub index: u32,
    /// Index into the string-id table for the descriptor.
    pub descriptor_idx: u32,
}

#[derive(Debug)]
pub struct ProtoId {
    pub offset: u32,
    pub index: u32,
    pub shorty_idx: u32,
    pub return_type_idx: u32,
    pub parameters: Option<TypeListRef>,
}

#[derive(Debug)]
pub struct FieldId {
    pub offset: u32,
    pub index: u32,
    pub class_idx: u32,
    pub type_idx: u32,
    pub name_idx: u32,
}

#[derive(Debug)]
pub struct MethodId {
    pub offset: u32,
    pub index: u32,
    pub class_idx: u32,
    pub proto_idx: u32,
    pub name_idx: u32,
}

#[derive(Debug)]
pub struct ClassDef {
    pub offset: u32,
    pub index: u32,
    pub class_idx: u32,
    pub access_flags: u32,
    pub superclass_idx: Option<u32>,
    pub interfaces: Option<TypeListRef>,
    pub source_file_idx: Option<u32>,
    pub annotations: Option<AnnotationsDirectoryRef>,
    pub class_data: Option<ClassDataRef>,
    pub static_values: Option<EncodedArrayRef>,
}

#[derive(Debug)]
pub struct CallSiteId {
    pub offset: u32,
    pub index: u32,
    pub call_site_item: EncodedArrayRef,
}

#[derive(Debug)]
pub struct MethodHandleItem {
    pub offset: u32,
    pub index: u32,
    pub method_handle_type: u16,
    /// Field index for accessor kinds, method index for invoke kinds.
    pub field_or_method_idx: u32,
}

impl MethodHandleItem {
    pub fn is_invoke(&self) -> bool {
        self.method_handle_type > crate::file::METHOD_HANDLE_KIND_LAST_FIELD
    }
}

// --------------------------------------------------------------------
// Data items
// --------------------------------------------------------------------

#[derive(Debug)]
pub struct StringData {
    pub offset: u32,
    /// MUTF-8 payload without the trailing null byte.
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct TypeList {
    pub offset: u32,
    pub types: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EncodedValue {
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    MethodType(u32),
    MethodHandle(u32),
    String(u32),
    Type(u32),
    Field(u32),
    Method(u32),
    Enum(u32),
    Array(Vec<EncodedValue>),
    Annotation(EncodedAnnotation),
    Null,
    Boolean(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationElement {
    pub name_idx: u32,
    pub value: EncodedValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodedAnnotation {
    pub type_idx: u32,
    pub elements: Vec<AnnotationElement>,
}

#[derive(Debug)]
pub struct EncodedArrayItem {
    pub offset: u32,
    pub values: Vec<EncodedValue>,
}

#[derive(Debug)]
pub struct AnnotationItem {
    pub offset: u32,
    /// Bytes the encoded form occupies; used to walk packed annotation
    /// runs from the map list.
    pub size: u32,
    pub visibility: u8,
    pub annotation: EncodedAnnotation,
}

#[derive(Debug)]
pub struct AnnotationSetItem {
    pub offset: u32,
    pub items: Vec<AnnotationItemRef>,
}

#[derive(Debug)]
pub struct AnnotationSetRefList {
    pub offset: u32,
    /// Slots are nullable on disk.
    pub items: Vec<Option<AnnotationSetRef>>,
}

#[derive(Debug)]
pub struct FieldAnnotation {
    pub field_idx: u32,
    pub annotations: AnnotationSetRef,
}

#[derive(Debug)]
pub struct MethodAnnotation {
    pub method_idx: u32,
    pub annotations: AnnotationSetRef,
}

#[derive(Debug)]
pub struct ParameterAnnotation {
    pub method_idx: u32,
    pub annotations: AnnotationSetRefListRef,
}

#[derive(Debug)]
pub struct AnnotationsDirectoryItem {
    pub offset: u32,
    pub class_annotation: Option<AnnotationSetRef>,
    pub field_annotations: Vec<FieldAnnotation>,
    pub method_annotations: Vec<MethodAnnotation>,
    pub parameter_annotations: Vec<ParameterAnnotation>,
}

#[derive(Debug)]
pub struct DebugInfoItem {
    pub offset: u32,
    /// Opaque stream, decoded only for its length.
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeAddrPair {
    /// `None` marks the catch-all entry.
    pub type_idx: Option<u32>,
    pub address: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchHandler {
    pub catch_all: bool,
    /// Offset of this handler within the encoded handler list, preserved
    /// from the input so try items keep pointing at the right row.
    pub list_offset: u16,
    pub handlers: Vec<TypeAddrPair>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryItem {
    pub start_addr: u32,
    pub insn_count: u16,
    /// Index into the owning code item's handler list.
    pub handler_index: u16,
}

/// Id-table references the bytecode touches, gathered once at build time
/// so hotness queries during layout stay cheap.
#[derive(Debug, Default)]
pub struct CodeFixups {
    pub type_ids: Vec<u32>,
    pub string_ids: Vec<u32>,
    pub method_ids: Vec<u32>,
    pub field_ids: Vec<u32>,
}

#[derive(Debug)]
pub struct CodeItem {
    pub offset: u32,
    pub size: u32,
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
    pub debug_info: Option<DebugInfoRef>,
    pub insns: Vec<u16>,
    pub tries: Vec<TryItem>,
    pub handlers: Vec<CatchHandler>,
    pub fixups: Option<CodeFixups>,
}

impl CodeItem {
    #[inline(always)]
    pub fn tries_size(&self) -> u16 {
        self.tries.len() as u16
    }

    #[inline(always)]
    pub fn insns_size(&self) -> u32 {
        self.insns.len() as u32
    }
}

#[derive(Debug)]
pub struct FieldItem {
    pub access_flags: u32,
    pub field_idx: u32,
}

#[derive(Debug)]
pub struct MethodItem {
    pub access_flags: u32,
    pub method_idx: u32,
    pub code: Option<CodeItemRef>,
}

#[derive(Debug, Default)]
pub struct ClassData {
    pub offset: u32,
    pub size: u32,
    pub static_fields: Vec<FieldItem>,
    pub instance_fields: Vec<FieldItem>,
    pub direct_methods: Vec<MethodItem>,
    pub virtual_methods: Vec<MethodItem>,
}

// --------------------------------------------------------------------
// Collections
// --------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Collections {
    pub string_ids: IndexedSection<StringId>,
    pub type_ids: IndexedSection<TypeId>,
    pub proto_ids: IndexedSection<ProtoId>,
    pub field_ids: IndexedSection<FieldId>,
    pub method_ids: IndexedSection<MethodId>,
    pub class_defs: IndexedSection<ClassDef>,
    pub call_site_ids: IndexedSection<CallSiteId>,
    pub method_handle_items: IndexedSection<MethodHandleItem>,

    pub string_datas: Section<StringData>,
    pub type_lists: Section<TypeList>,
    pub encoded_array_items: Section<EncodedArrayItem>,
    pub annotation_items: Section<AnnotationItem>,
    pub annotation_set_items: Section<AnnotationSetItem>,
    pub annotation_set_ref_lists: Section<AnnotationSetRefList>,
    pub annotations_directory_items: Section<AnnotationsDirectoryItem>,
    pub debug_info_items: Section<DebugInfoItem>,
    pub code_items: Section<CodeItem>,
    pub class_datas: Section<ClassData>,

    pub map_list_offset: u32,
    pub link_data: Vec<u8>,
}

/// IR root: the header fields carried over from the input plus every
/// collection.
#[derive(Debug)]
pub struct Header {
    pub magic: [u8; 8],
    pub checksum: u32,
    pub signature: [u8; 20],
    pub endian_tag: u32,
    pub file_size: u32,
    pub header_size: u32,
    pub link_size: u32,
    pub link_offset: u32,
    pub data_size: u32,
    pub data_offset: u32,
    pub support_default_methods: bool,
    pub collections: Collections,
}

/// One row of the section summary, ordered the way the sections appear in
/// the file.
#[derive(Debug, Clone)]
pub struct FileSection {
    pub name: &'static str,
    pub map_type: crate::file::MapItemType,
    pub size: u32,
    pub offset: u32,
}

/// Snapshot of every section's (count, offset), sorted ascending by
/// offset. Meaningful after a build with eager offsets or after a write.
pub fn file_sections(header: &Header) -> Vec<FileSection> {
    use crate::file::MapItemType;

    let c = &header.collections;
    let mut sections = vec![
        FileSection {
            name: "Header",
            map_type: MapItemType::HeaderItem,
            size: 1,
            offset: 0,
        },
        FileSection {
            name: "StringId",
            map_type: MapItemType::StringIdItem,
            size: c.string_ids.len() as u32,
            offset: c.string_ids.offset,
        },
        FileSection {
            name: "TypeId",
            map_type: MapItemType::TypeIdItem,
            size: c.type_ids.len() as u32,
            offset: c.type_ids.offset,
        },
        FileSection {
            name: "ProtoId",
            map_type: MapItemType::ProtoIdItem,
            size: c.proto_ids.len() as u32,
            offset: c.proto_ids.offset,
        },
        FileSection {
            name: "FieldId",
            map_type: MapItemType::FieldIdItem,
            size: c.field_ids.len() as u32,
            offset: c.field_ids.offset,
        },
        FileSection {
            name: "MethodId",
            map_type: MapItemType::MethodIdItem,
            size: c.method_ids.len() as u32,
            offset: c.method_ids.offset,
        },
        FileSection {
            name: "ClassDef",
            map_type: MapItemType::ClassDefItem,
            size: c.class_defs.len() as u32,
            offset: c.class_defs.offset,
        },
        FileSection {
            name: "CallSiteId",
            map_type: MapItemType::CallSiteIdItem,
            size: c.call_site_ids.len() as u32,
            offset: c.call_site_ids.offset,
        },
        FileSection {
            name: "MethodHandle",
            map_type: MapItemType::MethodHandleItem,
            size: c.method_handle_items.len() as u32,
            offset: c.method_handle_items.offset,
        },
        FileSection {
            name: "StringData",
            map_type: MapItemType::StringDataItem,
            size: c.string_datas.len() as u32,
            offset: c.string_datas.offset,
        },
        FileSection {
            name: "TypeList",
            map_type: MapItemType::TypeList,
            size: c.type_lists.len() as u32,
            offset: c.type_lists.offset,
        },
        FileSection {
            name: "EncArr",
            map_type: MapItemType::EncodedArrayItem,
            size: c.encoded_array_items.len() as u32,
            offset: c.encoded_array_items.offset,
        },
        FileSection {
            name: "Annotation",
            map_type: MapItemType::AnnotationItem,
            size: c.annotation_items.len() as u32,
            offset: c.annotation_items.offset,
        },
        FileSection {
            name: "AnnoSet",
            map_type: MapItemType::AnnotationSetItem,
            size: c.annotation_set_items.len() as u32,
            offset: c.annotation_set_items.offset,
        },
        FileSection {
            name: "AnnoSetRL",
            map_type: MapItemType::AnnotationSetRefList,
            size: c.annotation_set_ref_lists.len() as u32,
            offset: c.annotation_set_ref_lists.offset,
        },
        FileSection {
            name: "AnnoDir",
            map_type: MapItemType::AnnotationsDirectoryItem,
            size: c.annotations_directory_items.len() as u32,
            offset: c.annotations_directory_items.offset,
        },
        FileSection {
            name: "DebugInfo",
            map_type: MapItemType::DebugInfoItem,
            size: c.debug_info_items.len() as u32,
            offset: c.debug_info_items.offset,
        },
        FileSection {
            name: "CodeItem",
            map_type: MapItemType::CodeItem,
            size: c.code_items.len() as u32,
            offset: c.code_items.offset,
        },
        FileSection {
            name: "ClassData",
            map_type: MapItemType::ClassDataItem,
            size: c.class_datas.len() as u32,
            offset: c.class_datas.offset,
        },
    ];
    sections.sort_by_key(|s| s.offset);
    sections
}

/// Hand-built IR files for unit tests across the crate.
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::file::modifiers;
    use crate::utf;

    pub fn empty_header() -> Header {
        Header {
            magic: *b"dex\n035\0",
            checksum: 0,
            signature: [0; 20],
            endian_tag: crate::file::DEX_ENDIAN_CONSTANT,
            file_size: 0,
            header_size: HEADER_ITEM_SIZE,
            link_size: 0,
            link_offset: 0,
            data_size: 0,
            data_offset: 0,
            support_default_methods: false,
            collections: Collections::default(),
        }
    }

    pub fn add_string(c: &mut Collections, value: &str) -> u32 {
        let string_data = c.string_datas.push(StringData {
            offset: OFFSET_UNASSIGNED,
            data: utf::str_to_mutf8(value),
        });
        let index = c.string_ids.items.len() as u32;
        c.string_ids.items.push(StringId {
            offset: OFFSET_UNASSIGNED,
            index,
            string_data,
        });
        index
    }

    pub fn add_type(c: &mut Collections, descriptor: &str) -> u32 {
        let descriptor_idx = add_string(c, descriptor);
        let index = c.type_ids.items.len() as u32;
        c.type_ids.items.push(TypeId {
            offset: OFFSET_UNASSIGNED,
            index,
            descriptor_idx,
        });
        index
    }

    pub fn add_proto(c: &mut Collections, shorty: &str, return_type_idx: u32) -> u32 {
        let shorty_idx = add_string(c, shorty);
        let index = c.proto_ids.items.len() as u32;
        c.proto_ids.items.push(ProtoId {
            offset: OFFSET_UNASSIGNED,
            index,
            shorty_idx,
            return_type_idx,
            parameters: None,
        });
        index
    }

    pub fn add_method(c: &mut Collections, class_idx: u32, proto_idx: u32, name: &str) -> u32 {
        let name_idx = add_string(c, name);
        let index = c.method_ids.items.len() as u32;
        c.method_ids.items.push(MethodId {
            offset: OFFSET_UNASSIGNED,
            index,
            class_idx,
            proto_idx,
            name_idx,
        });
        index
    }

    pub fn add_code(
        c: &mut Collections,
        insns: Vec<u16>,
        fixups: Option<CodeFixups>,
    ) -> CodeItemRef {
        c.code_items.push(CodeItem {
            offset: OFFSET_UNASSIGNED,
            size: 0,
            registers_size: 1,
            ins_size: 0,
            outs_size: 0,
            debug_info: None,
            insns,
            tries: Vec::new(),
            handlers: Vec::new(),
            fixups,
        })
    }

    pub fn add_class(
        c: &mut Collections,
        class_idx: u32,
        superclass_idx: Option<u32>,
        class_data: Option<ClassDataRef>,
    ) -> u32 {
        let index = c.class_defs.items.len() as u32;
        c.class_defs.items.push(ClassDef {
            offset: OFFSET_UNASSIGNED,
            index,
            class_idx,
            access_flags: modifiers::ACC_PUBLIC,
            superclass_idx,
            interfaces: None,
            source_file_idx: None,
            annotations: None,
            class_data,
            static_values: None,
        });
        index
    }

    /// Encodes `const-string v0, string@idx` followed by `return-void`.
    pub fn const_string_insns(string_idx: u32) -> Vec<u16> {
        vec![0x001a, string_idx as u16, 0x000e]
    }

    /// One class, two static methods with their own code items. Method 0
    /// loads a string ("hot paths only") so string-layout tests have a
    /// fixup to chase; method 1 is a bare return.
    pub fn two_method_class() -> Header {
        let mut header = empty_header();
        let c = &mut header.collections;
        let object = add_type(c, "Ljava/lang/Object;");
        let void = add_type(c, "V");
        let main = add_type(c, "LMain;");
        let proto = add_proto(c, "V", void);
        let m_run = add_method(c, main, proto, "run");
        let m_idle = add_method(c, main, proto, "idle");
        let hot_string = add_string(c, "hot paths only");

        let code_run = add_code(
            c,
            const_string_insns(hot_string),
            Some(CodeFixups {
                string_ids: vec![hot_string],
                ..CodeFixups::default()
            }),
        );
        let code_idle = add_code(c, vec![0x000e], None);

        let class_data = c.class_datas.push(ClassData {
            direct_methods: vec![
                MethodItem {
                    access_flags: modifiers::ACC_PUBLIC | modifiers::ACC_STATIC,
                    method_idx: m_run,
                    code: Some(code_run),
                },
                MethodItem {
                    access_flags: modifiers::ACC_PUBLIC | modifiers::ACC_STATIC,
                    method_idx: m_idle,
                    code: Some(code_idle),
                },
            ],
            ..ClassData::default()
        });
        add_class(c, main, Some(object), Some(class_data));
        header
    }

    /// One class where two methods share one code item and a third owns a
    /// separate one.
    pub fn shared_code_class() -> Header {
        let mut header = empty_header();
        let c = &mut header.collections;
        let object = add_type(c, "Ljava/lang/Object;");
        let void = add_type(c, "V");
        let main = add_type(c, "LMain;");
        let proto = add_proto(c, "V", void);
        let m0 = add_method(c, main, proto, "a");
        let m1 = add_method(c, main, proto, "b");
        let m2 = add_method(c, main, proto, "c");

        let shared = add_code(c, vec![0x000e], None);
        let separate = add_code(c, vec![0x0000, 0x000e], None);

        let class_data = c.class_datas.push(ClassData {
            direct_methods: vec![
                MethodItem {
                    access_flags: modifiers::ACC_PUBLIC | modifiers::ACC_STATIC,
                    method_idx: m0,
                    code: Some(shared),
                },
                MethodItem {
                    access_flags: modifiers::ACC_PUBLIC | modifiers::ACC_STATIC,
                    method_idx: m1,
                    code: Some(shared),
                },
                MethodItem {
                    access_flags: modifiers::ACC_PUBLIC | modifiers::ACC_STATIC,
                    method_idx: m2,
                    code: Some(separate),
                },
            ],
            ..ClassData::default()
        });
        add_class(c, main, Some(object), Some(class_data));
        header
    }

    /// Two classes with one method each; both code items have identical
    /// bytes, which compact dedup is expected to fold.
    pub fn duplicate_code_classes() -> Header {
        let mut header = empty_header();
        let c = &mut header.collections;
        let object = add_type(c, "Ljava/lang/Object;");
        let void = add_type(c, "V");
        let first = add_type(c, "LFirst;");
        let second = add_type(c, "LSecond;");
        let proto = add_proto(c, "V", void);
        let m0 = add_method(c, first, proto, "go");
        let m1 = add_method(c, second, proto, "go");

        let code0 = add_code(c, vec![0x0000, 0x0000, 0x000e], None);
        let code1 = add_code(c, vec![0x0000, 0x0000, 0x000e], None);

        let data0 = c.class_datas.push(ClassData {
            direct_methods: vec![MethodItem {
                access_flags: modifiers::ACC_PUBLIC | modifiers::ACC_STATIC,
                method_idx: m0,
                code: Some(code0),
            }],
            ..ClassData::default()
        });
        let data1 = c.class_datas.push(ClassData {
            direct_methods: vec![MethodItem {
                access_flags: modifiers::ACC_PUBLIC | modifiers::ACC_STATIC,
                method_idx: m1,
                code: Some(code1),
            }],
            ..ClassData::default()
        });
        add_class(c, first, Some(object), Some(data0));
        add_class(c, second, Some(object), Some(data1));
        header
    }

    /// Two classes, each with its own class data.
    pub fn two_class_file() -> Header {
        let mut header = empty_header();
        let c = &mut header.collections;
        let object = add_type(c, "Ljava/lang/Object;");
        let void = add_type(c, "V");
        let alpha = add_type(c, "LAlpha;");
        let beta = add_type(c, "LBeta;");
        let proto = add_proto(c, "V", void);
        let m0 = add_method(c, alpha, proto, "run");
        let m1 = add_method(c, beta, proto, "run");

        let code0 = add_code(c, vec![0x000e], None);
        let code1 = add_code(c, vec![0x000e], None);
        let data0 = c.class_datas.push(ClassData {
            direct_methods: vec![MethodItem {
                access_flags: modifiers::ACC_PUBLIC,
                method_idx: m0,
                code: Some(code0),
            }],
            ..ClassData::default()
        });
        let data1 = c.class_datas.push(ClassData {
            direct_methods: vec![MethodItem {
                access_flags: modifiers::ACC_PUBLIC,
                method_idx: m1,
                code: Some(code1),
            }],
            ..ClassData::default()
        });
        add_class(c, alpha, Some(object), Some(data0));
        add_class(c, beta, Some(object), Some(data1));
        header
    }

    /// One class whose method carries a try/catch table and a debug-info
    /// stream.
    pub fn try_catch_class() -> Header {
        let mut header = empty_header();
        let c = &mut header.collections;
        let object = add_type(c, "Ljava/lang/Object;");
        let void = add_type(c, "V");
        let throwable = add_type(c, "Ljava/lang/Throwable;");
        let main = add_type(c, "LGuarded;");
        let proto = add_proto(c, "V", void);
        let m0 = add_method(c, main, proto, "guarded");

        let debug_info = c.debug_info_items.push(DebugInfoItem {
            offset: OFFSET_UNASSIGNED,
            // line_start=1, no parameters, end-sequence.
            data: vec![1, 0, 0],
        });
        let code = c.code_items.push(CodeItem {
            offset: OFFSET_UNASSIGNED,
            size: 0,
            registers_size: 2,
            ins_size: 0,
            outs_size: 0,
            debug_info: Some(debug_info),
            insns: vec![0x0000, 0x0000, 0x0000, 0x000e],
            tries: vec![TryItem {
                start_addr: 0,
                insn_count: 3,
                handler_index: 0,
            }],
            handlers: vec![CatchHandler {
                catch_all: false,
                list_offset: 1,
                handlers: vec![TypeAddrPair {
                    type_idx: Some(throwable),
                    address: 3,
                }],
            }],
            fixups: None,
        });

        let class_data = c.class_datas.push(ClassData {
            direct_methods: vec![MethodItem {
                access_flags: modifiers::ACC_PUBLIC | modifiers::ACC_STATIC,
                method_idx: m0,
                code: Some(code),
            }],
            ..ClassData::default()
        });
        add_class(c, main, Some(object), Some(class_data));
        header
    }

    /// Invalid on purpose: two class-data entries bind the same method id
    /// to different code items, which compact generation must refuse.
    pub fn inconsistent_method_code() -> Header {
        let mut header = empty_header();
        let c = &mut header.collections;
        let object = add_type(c, "Ljava/lang/Object;");
        let void = add_type(c, "V");
        let first = add_type(c, "LFirst;");
        let second = add_type(c, "LSecond;");
        let proto = add_proto(c, "V", void);
        let m0 = add_method(c, first, proto, "go");

        let code0 = add_code(c, vec![0x000e], None);
        let code1 = add_code(c, vec![0x0000, 0x000e], None);
        let data0 = c.class_datas.push(ClassData {
            direct_methods: vec![MethodItem {
                access_flags: modifiers::ACC_PUBLIC,
                method_idx: m0,
                code: Some(code0),
            }],
            ..ClassData::default()
        });
        let data1 = c.class_datas.push(ClassData {
            direct_methods: vec![MethodItem {
                access_flags: modifiers::ACC_PUBLIC,
                method_idx: m0,
                code: Some(code1),
            }],
            ..ClassData::default()
        });
        add_class(c, first, Some(object), Some(data0));
        add_class(c, second, Some(object), Some(data1));
        header
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_order_is_permutable_without_breaking_refs() {
        let mut section: Section<StringData> = Section::default();
        let a = section.push(StringData {
            offset: 0,
            data: b"a".to_vec(),
        });
        let b = section.push(StringData {
            offset: 0,
            data: b"b".to_vec(),
        });
        section.order = vec![b, a];
        assert_eq!(section.get(a).data, b"a");
        let in_order: Vec<&[u8]> = section.iter_in_order().map(|s| &s.data[..]).collect();
        assert_eq!(in_order, vec![b"b".as_ref(), b"a".as_ref()]);
    }

    #[test]
    fn sort_order_by_key_is_stable_on_creation_id() {
        let mut section: Section<StringData> = Section::default();
        for name in [b"x".to_vec(), b"y".to_vec(), b"z".to_vec()] {
            section.push(StringData {
                offset: 0,
                data: name,
            });
        }
        section.sort_order_by_key(|_, _| 0u32);
        assert_eq!(section.order, vec![0, 1, 2]);
    }
}
