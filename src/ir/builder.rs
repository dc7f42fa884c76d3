//! Builds the IR from a parsed input file.
//!
//! Id tables are created in table order; by-offset sections materialize
//! on demand as their referencing items appear, keyed by the offset
//! stored in the file so re-entry returns the existing item. Code items
//! are keyed by `(code offset, debug-info offset)`: two methods may share
//! code bytes yet disagree on debug info, and those must stay distinct
//! items.

use std::collections::HashMap;

use log::{debug, warn};

use super::*;
use crate::file::structs::{debug_info_opcodes as dbg, value_types};
use crate::file::{
    feature_flags, ClassDataAccessor, DexContainer, DexFile, IndexType, MapItemType, RawMethod,
    SafeDexInstructionIterator, NO_INDEX,
};
use crate::leb128::{decode_sleb128, decode_uleb128, decode_uleb128p1};
use crate::options::Options;
use crate::Result;

pub fn build_ir<'a, C: DexContainer<'a>>(
    dex: &DexFile<'a, C>,
    options: &Options,
) -> Result<Header> {
    let disk_header = dex.get_header();
    let support_default_methods = match dex.get_compact_header() {
        Some(compact) => compact.feature_flags & feature_flags::DEFAULT_METHODS != 0,
        None => disk_header.get_version() >= 37,
    };
    let mut builder = Builder {
        dex,
        options,
        eager: options.eagerly_assign_offsets,
        collections: Collections::default(),
        string_datas_map: HashMap::new(),
        type_lists_map: HashMap::new(),
        encoded_array_items_map: HashMap::new(),
        annotation_items_map: HashMap::new(),
        annotation_set_items_map: HashMap::new(),
        annotation_set_ref_lists_map: HashMap::new(),
        annotations_directory_items_map: HashMap::new(),
        debug_info_items_map: HashMap::new(),
        class_datas_map: HashMap::new(),
        code_items_map: HashMap::new(),
    };
    builder.build()?;

    let collections = builder.collections;
    Ok(Header {
        magic: disk_header.magic,
        checksum: disk_header.checksum,
        signature: disk_header.signature,
        endian_tag: disk_header.endian_tag,
        file_size: disk_header.file_size,
        header_size: disk_header.header_size,
        link_size: disk_header.link_size,
        link_offset: disk_header.link_off,
        data_size: disk_header.data_size,
        data_offset: disk_header.data_off,
        support_default_methods,
        collections,
    })
}

struct Builder<'b, 'a, C: DexContainer<'a>> {
    dex: &'b DexFile<'a, C>,
    options: &'b Options,
    eager: bool,
    collections: Collections,

    // By-offset canonicalization maps, keyed by the raw offsets stored in
    // the file. Discarded once the build finishes.
    string_datas_map: HashMap<u32, StringDataRef>,
    type_lists_map: HashMap<u32, TypeListRef>,
    encoded_array_items_map: HashMap<u32, EncodedArrayRef>,
    annotation_items_map: HashMap<u32, AnnotationItemRef>,
    annotation_set_items_map: HashMap<u32, AnnotationSetRef>,
    annotation_set_ref_lists_map: HashMap<u32, AnnotationSetRefListRef>,
    annotations_directory_items_map: HashMap<u32, AnnotationsDirectoryRef>,
    debug_info_items_map: HashMap<u32, DebugInfoRef>,
    class_datas_map: HashMap<u32, ClassDataRef>,
    code_items_map: HashMap<(u32, u32), CodeItemRef>,
}

impl<'b, 'a, C: DexContainer<'a>> Builder<'b, 'a, C> {
    fn build(&mut self) -> Result<()> {
        let header = self.dex.get_header();

        self.collections.string_ids.offset = header.string_ids_off;
        for i in 0..self.dex.num_string_ids() {
            self.create_string_id(i)?;
        }
        self.collections.type_ids.offset = header.type_ids_off;
        for i in 0..self.dex.num_type_ids() {
            self.create_type_id(i)?;
        }
        self.collections.proto_ids.offset = header.proto_ids_off;
        for i in 0..self.dex.num_proto_ids() {
            self.create_proto_id(i)?;
        }
        self.collections.field_ids.offset = header.field_ids_off;
        for i in 0..self.dex.num_field_ids() {
            self.create_field_id(i)?;
        }
        self.collections.method_ids.offset = header.method_ids_off;
        for i in 0..self.dex.num_method_ids() {
            self.create_method_id(i)?;
        }
        self.collections.class_defs.offset = header.class_defs_off;
        for i in 0..self.dex.num_class_defs() {
            if !self.options.class_filter.is_empty() {
                // Filter out classes without a matching descriptor.
                let class_def = self.dex.get_class_def(i)?;
                let descriptor = self.dex.get_class_descriptor(class_def)?;
                if !self.options.class_filter.contains(&descriptor) {
                    continue;
                }
            }
            self.create_class_def(i)?;
        }
        self.collections.map_list_offset = header.map_off;

        self.create_call_sites_and_method_handles()?;
        self.set_remaining_offsets()?;
        self.sort_vectors_by_map_order();

        self.collections.link_data = self.dex.link_data().to_vec();
        debug!(
            "built IR: {} strings, {} types, {} methods, {} class defs, {} code items",
            self.collections.string_ids.len(),
            self.collections.type_ids.len(),
            self.collections.method_ids.len(),
            self.collections.class_defs.len(),
            self.collections.code_items.len(),
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Indexed items
    // ------------------------------------------------------------------

    fn eager_off(&self, offset: u32) -> u32 {
        if self.eager {
            offset
        } else {
            OFFSET_UNASSIGNED
        }
    }

    fn create_string_id(&mut self, i: u32) -> Result<()> {
        let disk_string_id = self.dex.get_string_id(i)?;
        let data_off = disk_string_id.offset();
        let existing = self.string_datas_map.get(&data_off).copied();
        let string_data = match existing {
            Some(existing) => existing,
            None => {
                let (_, data) = self.dex.get_string_data(disk_string_id)?;
                let item = StringData {
                    offset: self.eager_off(data_off),
                    data: data.to_vec(),
                };
                let id = self.collections.string_datas.push(item);
                self.string_datas_map.insert(data_off, id);
                id
            }
        };
        let offset = self.eager_off(self.collections.string_ids.offset + i * STRING_ID_ITEM_SIZE);
        self.collections.string_ids.items.push(StringId {
            offset,
            index: i,
            string_data,
        });
        Ok(())
    }

    fn create_type_id(&mut self, i: u32) -> Result<()> {
        let disk_type_id = self.dex.get_type_id(i as u16)?;
        let offset = self.eager_off(self.collections.type_ids.offset + i * TYPE_ID_ITEM_SIZE);
        self.collections.type_ids.items.push(TypeId {
            offset,
            index: i,
            descriptor_idx: disk_type_id.descriptor_idx,
        });
        Ok(())
    }

    fn create_proto_id(&mut self, i: u32) -> Result<()> {
        let disk_proto_id = self.dex.get_proto_id(i as u16)?;
        let parameters = self.create_type_list(disk_proto_id.parameters_off)?;
        let offset = self.eager_off(self.collections.proto_ids.offset + i * PROTO_ID_ITEM_SIZE);
        self.collections.proto_ids.items.push(ProtoId {
            offset,
            index: i,
            shorty_idx: disk_proto_id.shorty_idx,
            return_type_idx: disk_proto_id.return_type_idx as u32,
            parameters,
        });
        Ok(())
    }

    fn create_field_id(&mut self, i: u32) -> Result<()> {
        let disk_field_id = self.dex.get_field_id(i)?;
        let offset = self.eager_off(self.collections.field_ids.offset + i * FIELD_ID_ITEM_SIZE);
        self.collections.field_ids.items.push(FieldId {
            offset,
            index: i,
            class_idx: disk_field_id.class_idx as u32,
            type_idx: disk_field_id.type_idx as u32,
            name_idx: disk_field_id.name_idx,
        });
        Ok(())
    }

    fn create_method_id(&mut self, i: u32) -> Result<()> {
        let disk_method_id = self.dex.get_method_id(i)?;
        let offset = self.eager_off(self.collections.method_ids.offset + i * METHOD_ID_ITEM_SIZE);
        self.collections.method_ids.items.push(MethodId {
            offset,
            index: i,
            class_idx: disk_method_id.class_idx as u32,
            proto_idx: disk_method_id.proto_idx as u32,
            name_idx: disk_method_id.name_idx,
        });
        Ok(())
    }

    fn create_class_def(&mut self, i: u32) -> Result<()> {
        let disk_class_def = self.dex.get_class_def(i)?.clone();
        let interfaces = self.create_type_list(disk_class_def.interfaces_off)?;
        let annotations = self.create_annotations_directory_item(disk_class_def.annotations_off)?;
        let static_values = self.create_encoded_array_item(disk_class_def.static_values_off)?;
        let class_data = self.create_class_data(disk_class_def.class_data_off)?;
        let offset = self.eager_off(self.collections.class_defs.offset + i * CLASS_DEF_ITEM_SIZE);
        self.collections.class_defs.items.push(ClassDef {
            offset,
            index: i,
            class_idx: disk_class_def.class_idx as u32,
            access_flags: disk_class_def.access_flags,
            superclass_idx: match disk_class_def.superclass_idx {
                NO_INDEX => None,
                idx => Some(idx),
            },
            interfaces,
            source_file_idx: match disk_class_def.source_file_idx {
                NO_INDEX => None,
                idx => Some(idx),
            },
            annotations,
            class_data,
            static_values,
        });
        Ok(())
    }

    fn create_call_sites_and_method_handles(&mut self) -> Result<()> {
        for map_item in self.dex.get_map_items() {
            match MapItemType::from_raw(map_item.type_) {
                Some(MapItemType::CallSiteIdItem) => {
                    self.collections.call_site_ids.offset = map_item.off;
                }
                Some(MapItemType::MethodHandleItem) => {
                    self.collections.method_handle_items.offset = map_item.off;
                }
                _ => {}
            }
        }
        // Method handles first, call sites may reference them.
        for i in 0..self.dex.num_method_handles() {
            self.create_method_handle_item(i)?;
        }
        for i in 0..self.dex.num_call_site_ids() {
            self.create_call_site_id(i)?;
        }
        Ok(())
    }

    fn create_method_handle_item(&mut self, i: u32) -> Result<()> {
        let disk_item = &self.dex.get_method_handles()[i as usize];
        let offset = self.eager_off(
            self.collections.method_handle_items.offset + i * METHOD_HANDLE_ITEM_SIZE,
        );
        self.collections.method_handle_items.items.push(MethodHandleItem {
            offset,
            index: i,
            method_handle_type: disk_item.method_handle_type,
            field_or_method_idx: disk_item.field_or_method_idx as u32,
        });
        Ok(())
    }

    fn create_call_site_id(&mut self, i: u32) -> Result<()> {
        let disk_item = &self.dex.get_call_site_ids()[i as usize];
        let call_site_item = match self.create_encoded_array_item(disk_item.data_off)? {
            Some(item) => item,
            None => {
                return Err(crate::error::DexError::DexFileError(format!(
                    "call site id {i} has no encoded array"
                )))
            }
        };
        let offset =
            self.eager_off(self.collections.call_site_ids.offset + i * CALL_SITE_ID_ITEM_SIZE);
        self.collections.call_site_ids.items.push(CallSiteId {
            offset,
            index: i,
            call_site_item,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // By-offset items
    // ------------------------------------------------------------------

    fn create_type_list(&mut self, offset: u32) -> Result<Option<TypeListRef>> {
        if offset == 0 {
            return Ok(None);
        }
        if let Some(existing) = self.type_lists_map.get(&offset) {
            return Ok(Some(*existing));
        }
        let raw = self
            .dex
            .get_type_list(offset)?
            .unwrap_or_default();
        let types = raw.iter().map(|item| item.type_idx as u32).collect();
        let id = self.collections.type_lists.push(TypeList {
            offset: self.eager_off(offset),
            types,
        });
        self.type_lists_map.insert(offset, id);
        Ok(Some(id))
    }

    fn create_encoded_array_item(&mut self, offset: u32) -> Result<Option<EncodedArrayRef>> {
        if offset == 0 {
            return Ok(None);
        }
        if let Some(existing) = self.encoded_array_items_map.get(&offset) {
            return Ok(Some(*existing));
        }
        let data = self.dex.raw_data();
        let mut pos = self.dex.resolve_data_off(offset) as usize;
        let size = decode_uleb128(data, &mut pos)?;
        let mut values = Vec::with_capacity(size as usize);
        for _ in 0..size {
            values.push(self.read_encoded_value(data, &mut pos)?);
        }
        let id = self.collections.encoded_array_items.push(EncodedArrayItem {
            offset: self.eager_off(offset),
            values,
        });
        self.encoded_array_items_map.insert(offset, id);
        Ok(Some(id))
    }

    fn read_encoded_value(&mut self, data: &[u8], pos: &mut usize) -> Result<EncodedValue> {
        if *pos >= data.len() {
            return Err(crate::error::DexError::TruncatedFile);
        }
        let header_byte = data[*pos];
        *pos += 1;
        let value_type = header_byte & 0x1f;
        let value_arg = header_byte >> 5;
        self.read_encoded_value_payload(data, pos, value_type, value_arg)
    }

    fn read_encoded_value_payload(
        &mut self,
        data: &[u8],
        pos: &mut usize,
        value_type: u8,
        length: u8,
    ) -> Result<EncodedValue> {
        Ok(match value_type {
            value_types::BYTE => EncodedValue::Byte(read_var_width(data, pos, length, true) as i8),
            value_types::SHORT => {
                EncodedValue::Short(read_var_width(data, pos, length, true) as i16)
            }
            value_types::CHAR => {
                EncodedValue::Char(read_var_width(data, pos, length, false) as u16)
            }
            value_types::INT => EncodedValue::Int(read_var_width(data, pos, length, true) as i32),
            value_types::LONG => EncodedValue::Long(read_var_width(data, pos, length, true) as i64),
            value_types::FLOAT => {
                // Fill on the right.
                let bits = (read_var_width(data, pos, length, false) as u32)
                    << ((3 - length as u32) * 8);
                EncodedValue::Float(f32::from_bits(bits))
            }
            value_types::DOUBLE => {
                let bits = read_var_width(data, pos, length, false) << ((7 - length as u64) * 8);
                EncodedValue::Double(f64::from_bits(bits))
            }
            value_types::METHOD_TYPE => {
                EncodedValue::MethodType(read_var_width(data, pos, length, false) as u32)
            }
            value_types::METHOD_HANDLE => {
                EncodedValue::MethodHandle(read_var_width(data, pos, length, false) as u32)
            }
            value_types::STRING => {
                EncodedValue::String(read_var_width(data, pos, length, false) as u32)
            }
            value_types::TYPE => {
                EncodedValue::Type(read_var_width(data, pos, length, false) as u32)
            }
            value_types::FIELD => {
                EncodedValue::Field(read_var_width(data, pos, length, false) as u32)
            }
            value_types::ENUM => {
                EncodedValue::Enum(read_var_width(data, pos, length, false) as u32)
            }
            value_types::METHOD => {
                EncodedValue::Method(read_var_width(data, pos, length, false) as u32)
            }
            value_types::ARRAY => {
                let size = decode_uleb128(data, pos)?;
                let mut values = Vec::with_capacity(size as usize);
                for _ in 0..size {
                    values.push(self.read_encoded_value(data, pos)?);
                }
                EncodedValue::Array(values)
            }
            value_types::ANNOTATION => {
                EncodedValue::Annotation(self.read_encoded_annotation(data, pos)?)
            }
            value_types::NULL => EncodedValue::Null,
            value_types::BOOLEAN => EncodedValue::Boolean(length != 0),
            _ => {
                warn!("unknown encoded value type {value_type:#x}");
                EncodedValue::Null
            }
        })
    }

    fn read_encoded_annotation(
        &mut self,
        data: &[u8],
        pos: &mut usize,
    ) -> Result<EncodedAnnotation> {
        let type_idx = decode_uleb128(data, pos)?;
        let size = decode_uleb128(data, pos)?;
        let mut elements = Vec::with_capacity(size as usize);
        for _ in 0..size {
            let name_idx = decode_uleb128(data, pos)?;
            let value = self.read_encoded_value(data, pos)?;
            elements.push(AnnotationElement { name_idx, value });
        }
        Ok(EncodedAnnotation { type_idx, elements })
    }

    fn create_annotation_item(&mut self, offset: u32) -> Result<AnnotationItemRef> {
        if let Some(existing) = self.annotation_items_map.get(&offset) {
            return Ok(*existing);
        }
        let data = self.dex.raw_data();
        let start = self.dex.resolve_data_off(offset) as usize;
        if start >= data.len() {
            return Err(crate::error::DexError::TruncatedFile);
        }
        let mut pos = start;
        let visibility = data[pos];
        pos += 1;
        let annotation = self.read_encoded_annotation(data, &mut pos)?;
        let id = self.collections.annotation_items.push(AnnotationItem {
            offset: self.eager_off(offset),
            size: (pos - start) as u32,
            visibility,
            annotation,
        });
        self.annotation_items_map.insert(offset, id);
        Ok(id)
    }

    fn create_annotation_set_item(&mut self, offset: u32) -> Result<Option<AnnotationSetRef>> {
        if offset == 0 {
            return Ok(None);
        }
        if let Some(existing) = self.annotation_set_items_map.get(&offset) {
            return Ok(Some(*existing));
        }
        let resolved = self.dex.resolve_data_off(offset);
        let size: u32 = *self.dex.non_null_data_ptr(resolved)?;
        let entries: &[u32] = self
            .dex
            .non_null_array_data_ptr(resolved + 4, size as usize)?;
        // Copy out, the borrow must end before items are created.
        let entries: Vec<u32> = entries.to_vec();
        let mut items = Vec::with_capacity(entries.len());
        for annotation_off in entries {
            if annotation_off == 0 {
                continue;
            }
            items.push(self.create_annotation_item(annotation_off)?);
        }
        let id = self.collections.annotation_set_items.push(AnnotationSetItem {
            offset: self.eager_off(offset),
            items,
        });
        self.annotation_set_items_map.insert(offset, id);
        Ok(Some(id))
    }

    fn create_annotation_set_ref_list(
        &mut self,
        offset: u32,
    ) -> Result<Option<AnnotationSetRefListRef>> {
        if offset == 0 {
            return Ok(None);
        }
        if let Some(existing) = self.annotation_set_ref_lists_map.get(&offset) {
            return Ok(Some(*existing));
        }
        let resolved = self.dex.resolve_data_off(offset);
        let size: u32 = *self.dex.non_null_data_ptr(resolved)?;
        let entries: Vec<u32> = self
            .dex
            .non_null_array_data_ptr::<u32>(resolved + 4, size as usize)?
            .to_vec();
        let mut items = Vec::with_capacity(entries.len());
        for set_off in entries {
            items.push(self.create_annotation_set_item(set_off)?);
        }
        let id = self
            .collections
            .annotation_set_ref_lists
            .push(AnnotationSetRefList {
                offset: self.eager_off(offset),
                items,
            });
        self.annotation_set_ref_lists_map.insert(offset, id);
        Ok(Some(id))
    }

    fn create_annotations_directory_item(
        &mut self,
        offset: u32,
    ) -> Result<Option<AnnotationsDirectoryRef>> {
        if offset == 0 {
            return Ok(None);
        }
        if let Some(existing) = self.annotations_directory_items_map.get(&offset) {
            return Ok(Some(*existing));
        }
        let resolved = self.dex.resolve_data_off(offset);
        let disk_item: crate::file::AnnotationsDirectoryItem =
            self.dex.non_null_data_ptr::<crate::file::AnnotationsDirectoryItem>(resolved)?.clone();
        let class_annotation = self.create_annotation_set_item(disk_item.class_annotations_off)?;

        let mut cursor = resolved + std::mem::size_of::<crate::file::AnnotationsDirectoryItem>() as u32;
        let fields: Vec<crate::file::FieldAnnotationsItem> = self
            .dex
            .non_null_array_data_ptr::<crate::file::FieldAnnotationsItem>(
                cursor,
                disk_item.fields_size as usize,
            )?
            .to_vec();
        cursor += disk_item.fields_size * 8;
        let methods: Vec<crate::file::MethodAnnotationsItem> = self
            .dex
            .non_null_array_data_ptr::<crate::file::MethodAnnotationsItem>(
                cursor,
                disk_item.methods_size as usize,
            )?
            .to_vec();
        cursor += disk_item.methods_size * 8;
        let parameters: Vec<crate::file::ParameterAnnotationsItem> = self
            .dex
            .non_null_array_data_ptr::<crate::file::ParameterAnnotationsItem>(
                cursor,
                disk_item.parameters_size as usize,
            )?
            .to_vec();

        let mut field_annotations = Vec::with_capacity(fields.len());
        for field in fields {
            if let Some(set) = self.create_annotation_set_item(field.annotations_off)? {
                field_annotations.push(FieldAnnotation {
                    field_idx: field.field_idx,
                    annotations: set,
                });
            }
        }
        let mut method_annotations = Vec::with_capacity(methods.len());
        for method in methods {
            if let Some(set) = self.create_annotation_set_item(method.annotations_off)? {
                method_annotations.push(MethodAnnotation {
                    method_idx: method.method_idx,
                    annotations: set,
                });
            }
        }
        let mut parameter_annotations = Vec::with_capacity(parameters.len());
        for parameter in parameters {
            if let Some(list) = self.create_annotation_set_ref_list(parameter.annotations_off)? {
                parameter_annotations.push(ParameterAnnotation {
                    method_idx: parameter.method_idx,
                    annotations: list,
                });
            }
        }

        let id = self
            .collections
            .annotations_directory_items
            .push(AnnotationsDirectoryItem {
                offset: self.eager_off(offset),
                class_annotation,
                field_annotations,
                method_annotations,
                parameter_annotations,
            });
        self.annotations_directory_items_map.insert(offset, id);
        Ok(Some(id))
    }

    fn create_class_data(&mut self, offset: u32) -> Result<Option<ClassDataRef>> {
        if offset == 0 {
            return Ok(None);
        }
        if let Some(existing) = self.class_datas_map.get(&offset) {
            return Ok(Some(*existing));
        }
        let resolved = self.dex.resolve_data_off(offset);
        let accessor = ClassDataAccessor::parse(self.dex.raw_data(), resolved)?;

        let static_fields = accessor
            .static_fields
            .iter()
            .map(|f| FieldItem {
                access_flags: f.access_flags,
                field_idx: f.field_idx,
            })
            .collect();
        let instance_fields = accessor
            .instance_fields
            .iter()
            .map(|f| FieldItem {
                access_flags: f.access_flags,
                field_idx: f.field_idx,
            })
            .collect();
        let mut direct_methods = Vec::with_capacity(accessor.direct_methods.len());
        for method in &accessor.direct_methods {
            direct_methods.push(self.generate_method_item(method)?);
        }
        let mut virtual_methods = Vec::with_capacity(accessor.virtual_methods.len());
        for method in &accessor.virtual_methods {
            virtual_methods.push(self.generate_method_item(method)?);
        }

        let id = self.collections.class_datas.push(ClassData {
            offset: self.eager_off(offset),
            size: accessor.size,
            static_fields,
            instance_fields,
            direct_methods,
            virtual_methods,
        });
        self.class_datas_map.insert(offset, id);
        Ok(Some(id))
    }

    fn generate_method_item(&mut self, method: &RawMethod) -> Result<MethodItem> {
        let code = self.dedupe_or_create_code_item(method.code_off, method.method_idx)?;
        Ok(MethodItem {
            access_flags: method.access_flags,
            method_idx: method.method_idx,
            code,
        })
    }

    fn dedupe_or_create_code_item(
        &mut self,
        code_off: u32,
        method_idx: u32,
    ) -> Result<Option<CodeItemRef>> {
        if code_off == 0 {
            return Ok(None);
        }
        let accessor = self.dex.get_code_item_accessor(code_off)?;
        let debug_info_off = self.dex.get_debug_info_offset(&accessor, method_idx)?;

        // Pair key: same code bytes with different debug info must remain
        // distinct items.
        if let Some(existing) = self.code_items_map.get(&(code_off, debug_info_off)) {
            return Ok(Some(*existing));
        }

        let debug_info = if debug_info_off != 0 {
            Some(self.create_debug_info_item(debug_info_off)?)
        } else {
            None
        };

        let data = self.dex.raw_data();
        let insns = accessor.insns().to_vec();
        let mut tries = Vec::new();
        let mut handlers: Vec<CatchHandler> = Vec::new();
        if accessor.tries_size() > 0 {
            let handlers_base = accessor.handlers_off() as usize;
            for disk_try in accessor.try_items(data)? {
                let handler_off = disk_try.handler_off;
                let handler_index = match handlers
                    .iter()
                    .position(|h| h.list_offset == handler_off)
                {
                    Some(index) => index,
                    None => {
                        let handler = parse_catch_handler(data, handlers_base, handler_off)?;
                        handlers.push(handler);
                        handlers.len() - 1
                    }
                };
                tries.push(TryItem {
                    start_addr: disk_try.start_addr,
                    insn_count: disk_try.insn_count,
                    handler_index: handler_index as u16,
                });
            }
            // Pick up handlers no try item references so the handler table
            // round-trips whole.
            let mut pos = handlers_base;
            let handlers_size = decode_uleb128(data, &mut pos)?;
            for _ in 0..handlers_size {
                let handler_off = (pos - handlers_base) as u16;
                if handlers.iter().any(|h| h.list_offset == handler_off) {
                    skip_catch_handler(data, &mut pos)?;
                } else {
                    handlers.push(parse_catch_handler(data, handlers_base, handler_off)?);
                }
            }
        }

        let size = accessor.code_item_size(data)?;
        let fixups = self.collect_code_fixups(&insns);
        let item = CodeItem {
            offset: self.eager_off(code_off),
            size,
            registers_size: accessor.registers_size(),
            ins_size: accessor.ins_size(),
            outs_size: accessor.outs_size(),
            debug_info,
            insns,
            tries,
            handlers,
            fixups,
        };
        let id = self.collections.code_items.push(item);
        self.code_items_map.insert((code_off, debug_info_off), id);
        Ok(Some(id))
    }

    fn create_debug_info_item(&mut self, debug_info_off: u32) -> Result<DebugInfoRef> {
        if let Some(existing) = self.debug_info_items_map.get(&debug_info_off) {
            return Ok(*existing);
        }
        let resolved = self.dex.resolve_data_off(debug_info_off);
        let stream = self.dex.data_at(resolved)?;
        let size = debug_info_stream_size(stream)?;
        let id = self.collections.debug_info_items.push(DebugInfoItem {
            offset: self.eager_off(debug_info_off),
            data: stream[..size].to_vec(),
        });
        self.debug_info_items_map.insert(debug_info_off, id);
        Ok(id)
    }

    /// Records the id-table references the bytecode touches. A malformed
    /// opcode ends the scan for this item; unknown index formats are
    /// skipped (forward compatibility).
    fn collect_code_fixups(&self, insns: &[u16]) -> Option<CodeFixups> {
        let mut fixups = CodeFixups::default();
        let mut has_id = false;
        for inst in SafeDexInstructionIterator::new(insns) {
            let carried = match inst.carried_index() {
                Ok(carried) => carried,
                Err(_) => break,
            };
            let Some((index_type, index)) = carried else {
                continue;
            };
            match index_type {
                IndexType::TypeRef => {
                    if (index as usize) < self.collections.type_ids.len() {
                        fixups.type_ids.push(index);
                        has_id = true;
                    }
                }
                IndexType::StringRef => {
                    if (index as usize) < self.collections.string_ids.len() {
                        fixups.string_ids.push(index);
                        has_id = true;
                    }
                }
                IndexType::MethodRef | IndexType::MethodAndProtoRef => {
                    if (index as usize) < self.collections.method_ids.len() {
                        fixups.method_ids.push(index);
                        has_id = true;
                    }
                }
                IndexType::FieldRef => {
                    if (index as usize) < self.collections.field_ids.len() {
                        fixups.field_ids.push(index);
                        has_id = true;
                    }
                }
                _ => {}
            }
        }
        has_id.then_some(fixups)
    }

    // ------------------------------------------------------------------
    // Map-list processing
    // ------------------------------------------------------------------

    fn set_remaining_offsets(&mut self) -> Result<()> {
        let map_items = self.dex.get_map_items().to_vec();
        for item in map_items {
            match MapItemType::from_raw(item.type_) {
                Some(MapItemType::TypeList) => self.collections.type_lists.offset = item.off,
                Some(MapItemType::AnnotationSetRefList) => {
                    self.collections.annotation_set_ref_lists.offset = item.off
                }
                Some(MapItemType::AnnotationSetItem) => {
                    self.collections.annotation_set_items.offset = item.off
                }
                Some(MapItemType::ClassDataItem) => {
                    self.collections.class_datas.offset = item.off
                }
                Some(MapItemType::CodeItem) => self.collections.code_items.offset = item.off,
                Some(MapItemType::StringDataItem) => {
                    self.collections.string_datas.offset = item.off
                }
                Some(MapItemType::DebugInfoItem) => {
                    self.collections.debug_info_items.offset = item.off
                }
                Some(MapItemType::AnnotationItem) => {
                    self.collections.annotation_items.offset = item.off;
                    self.add_annotations_from_map_list_section(item.off, item.size)?;
                }
                Some(MapItemType::EncodedArrayItem) => {
                    self.collections.encoded_array_items.offset = item.off
                }
                Some(MapItemType::AnnotationsDirectoryItem) => {
                    self.collections.annotations_directory_items.offset = item.off
                }
                Some(_) => {}
                None => warn!("unknown map list item type {:#x}", item.type_),
            }
        }
        Ok(())
    }

    /// Annotation items are packed back to back; walking the section from
    /// the map list catches items nothing else references.
    fn add_annotations_from_map_list_section(&mut self, start_offset: u32, count: u32) -> Result<()> {
        let mut current_offset = start_offset;
        for _ in 0..count {
            let id = self.create_annotation_item(current_offset)?;
            current_offset += self.collections.annotation_items.get(id).size;
        }
        Ok(())
    }

    /// Re-sorts every by-offset collection into the order the input laid
    /// it out, so re-emission without layout changes stays byte-stable
    /// modulo padding.
    fn sort_vectors_by_map_order(&mut self) {
        sort_section_by_map(&mut self.collections.string_datas, &self.string_datas_map);
        sort_section_by_map(&mut self.collections.type_lists, &self.type_lists_map);
        sort_section_by_map(
            &mut self.collections.encoded_array_items,
            &self.encoded_array_items_map,
        );
        sort_section_by_map(
            &mut self.collections.annotation_items,
            &self.annotation_items_map,
        );
        sort_section_by_map(
            &mut self.collections.annotation_set_items,
            &self.annotation_set_items_map,
        );
        sort_section_by_map(
            &mut self.collections.annotation_set_ref_lists,
            &self.annotation_set_ref_lists_map,
        );
        sort_section_by_map(
            &mut self.collections.annotations_directory_items,
            &self.annotations_directory_items_map,
        );
        sort_section_by_map(
            &mut self.collections.debug_info_items,
            &self.debug_info_items_map,
        );
        sort_section_by_map(&mut self.collections.class_datas, &self.class_datas_map);

        // Code items key on (code offset, debug-info offset).
        let mut input_offsets: HashMap<u32, (u32, u32)> = HashMap::new();
        for (key, id) in &self.code_items_map {
            input_offsets.insert(*id, *key);
        }
        self.collections
            .code_items
            .sort_order_by_key(|id, _| input_offsets.get(&id).copied().unwrap_or((u32::MAX, 0)));
    }
}

fn sort_section_by_map<T>(section: &mut Section<T>, map: &HashMap<u32, u32>) {
    let mut input_offsets: HashMap<u32, u32> = HashMap::with_capacity(map.len());
    for (offset, id) in map {
        input_offsets.insert(*id, *offset);
    }
    section.sort_order_by_key(|id, _| input_offsets.get(&id).copied().unwrap_or(u32::MAX));
}

/// Reads a little-endian value of `length + 1` bytes, optionally
/// sign-extending from its top bit.
fn read_var_width(data: &[u8], pos: &mut usize, length: u8, sign_extend: bool) -> u64 {
    let mut value: u64 = 0;
    for i in 0..=length as u32 {
        value |= (data[*pos] as u64) << (i * 8);
        *pos += 1;
    }
    if sign_extend {
        let shift = (7 - length as u32) * 8;
        return (((value as i64) << shift) >> shift) as u64;
    }
    value
}

fn parse_catch_handler(data: &[u8], handlers_base: usize, handler_off: u16) -> Result<CatchHandler> {
    let mut pos = handlers_base + handler_off as usize;
    let size = decode_sleb128(data, &mut pos)?;
    let catch_all = size <= 0;
    let pair_count = size.unsigned_abs();
    let mut pairs = Vec::with_capacity(pair_count as usize + catch_all as usize);
    for _ in 0..pair_count {
        let type_idx = decode_uleb128(data, &mut pos)?;
        let address = decode_uleb128(data, &mut pos)?;
        pairs.push(TypeAddrPair {
            type_idx: Some(type_idx),
            address,
        });
    }
    if catch_all {
        let address = decode_uleb128(data, &mut pos)?;
        pairs.push(TypeAddrPair {
            type_idx: None,
            address,
        });
    }
    Ok(CatchHandler {
        catch_all,
        list_offset: handler_off,
        handlers: pairs,
    })
}

fn skip_catch_handler(data: &[u8], pos: &mut usize) -> Result<()> {
    let size = decode_sleb128(data, pos)?;
    for _ in 0..size.unsigned_abs() {
        decode_uleb128(data, pos)?;
        decode_uleb128(data, pos)?;
    }
    if size <= 0 {
        decode_uleb128(data, pos)?;
    }
    Ok(())
}

/// Advances a cursor through a debug-info stream until DBG_END_SEQUENCE
/// and reports the byte count. Unknown opcodes advance one byte, like
/// every consumer of this stream.
pub fn debug_info_stream_size(stream: &[u8]) -> Result<usize> {
    let mut pos = 0usize;
    decode_uleb128(stream, &mut pos)?; // line_start
    let parameters_size = decode_uleb128(stream, &mut pos)?;
    for _ in 0..parameters_size {
        decode_uleb128p1(stream, &mut pos)?; // parameter name
    }

    loop {
        if pos >= stream.len() {
            return Err(crate::error::DexError::TruncatedFile);
        }
        let opcode = stream[pos];
        pos += 1;
        match opcode {
            dbg::DBG_END_SEQUENCE => return Ok(pos),
            dbg::DBG_ADVANCE_PC => {
                decode_uleb128(stream, &mut pos)?; // addr_diff
            }
            dbg::DBG_ADVANCE_LINE => {
                decode_sleb128(stream, &mut pos)?; // line_diff
            }
            dbg::DBG_START_LOCAL => {
                decode_uleb128(stream, &mut pos)?; // register_num
                decode_uleb128p1(stream, &mut pos)?; // name_idx
                decode_uleb128p1(stream, &mut pos)?; // type_idx
            }
            dbg::DBG_START_LOCAL_EXTENDED => {
                decode_uleb128(stream, &mut pos)?; // register_num
                decode_uleb128p1(stream, &mut pos)?; // name_idx
                decode_uleb128p1(stream, &mut pos)?; // type_idx
                decode_uleb128p1(stream, &mut pos)?; // sig_idx
            }
            dbg::DBG_END_LOCAL | dbg::DBG_RESTART_LOCAL => {
                decode_uleb128(stream, &mut pos)?; // register_num
            }
            dbg::DBG_SET_PROLOGUE_END | dbg::DBG_SET_EPILOGUE_BEGIN => {}
            dbg::DBG_SET_FILE => {
                decode_uleb128p1(stream, &mut pos)?; // name_idx
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leb128::encode_uleb128p1;

    #[test]
    fn debug_info_size_stops_at_end_sequence() {
        // line_start=1, parameters_size=1, one p1-encoded name, then
        // advance-pc(5), end.
        let mut stream = vec![1, 1];
        let (buf, len) = encode_uleb128p1(3);
        stream.extend_from_slice(&buf[..len]);
        stream.extend_from_slice(&[dbg::DBG_ADVANCE_PC, 5, dbg::DBG_END_SEQUENCE]);
        stream.extend_from_slice(&[0xAA, 0xBB]); // trailing garbage
        assert_eq!(debug_info_stream_size(&stream).unwrap(), stream.len() - 2);
    }

    #[test]
    fn debug_info_size_skips_unknown_opcodes() {
        let stream = [0, 0, 0x20, 0x21, dbg::DBG_END_SEQUENCE];
        assert_eq!(debug_info_stream_size(&stream).unwrap(), stream.len());
    }

    #[test]
    fn var_width_reads_sign_extend() {
        let data = [0xFF];
        let mut pos = 0;
        assert_eq!(read_var_width(&data, &mut pos, 0, true) as i64, -1);
        let data = [0x7F, 0x00];
        let mut pos = 0;
        assert_eq!(read_var_width(&data, &mut pos, 1, true) as i64, 0x7F);
    }

    #[test]
    fn catch_handler_parsing() {
        // handlers list: count=2; handler A at off 1: size=1, (type 4,
        // addr 2); handler B at off 4: size=-1 -> catch-all addr 9.
        let data = [2u8, 1, 4, 2, 0x7F, 9];
        let a = parse_catch_handler(&data, 0, 1).unwrap();
        assert!(!a.catch_all);
        assert_eq!(a.handlers, vec![TypeAddrPair { type_idx: Some(4), address: 2 }]);
        let b = parse_catch_handler(&data, 0, 4).unwrap();
        assert!(b.catch_all);
        assert_eq!(b.handlers, vec![TypeAddrPair { type_idx: None, address: 9 }]);
    }
}
