//! Compact dex emission.
//!
//! Id tables go to the main section, everything else to the data section
//! whose offsets are section-relative (the first 8 bytes stay reserved so
//! 0 keeps meaning "absent"). Code items get a pre-header and both code
//! items and data items are deduplicated against bytes already resident
//! in the section.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::Hasher;

use log::debug;

use super::{section_alignment, DexWriter, DATA_SECTION_ALIGNMENT};
use crate::container::{is_aligned, DexOutputContainer, ScopedSeek, Stream};
use crate::file::structs::compact_code_item;
use crate::file::{MapItemType, SafeDexInstructionIterator, CDEX_MAGIC, CDEX_MAGIC_VERSIONS};
use crate::ir;
use crate::offset_table;
use crate::options::Options;
use crate::writer::put_u32;
use crate::{dex_err, error::DexError, Result};

pub const COMPACT_HEADER_SIZE: u32 = 0x88;

/// Content-addressed cache over ranges already written to one section.
/// Keys hash the live bytes; equality re-reads them, so the first
/// occurrence of a range must stay materialized.
pub struct Deduper {
    enabled: bool,
    map: HashMap<u64, Vec<(u32, u32, u32)>>,
}

impl Deduper {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            map: HashMap::new(),
        }
    }

    /// Returns the offset of an identical prior range, or records
    /// `item_offset` for `[start, end)` and returns `None`.
    pub fn dedupe(&mut self, section: &[u8], start: u32, end: u32, item_offset: u32) -> Option<u32> {
        if !self.enabled {
            return None;
        }
        let bytes = &section[start as usize..end as usize];
        let mut hasher = DefaultHasher::new();
        hasher.write(bytes);
        let hash = hasher.finish();

        if let Some(bucket) = self.map.get(&hash) {
            for (other_start, other_len, other_offset) in bucket {
                if *other_len == end - start
                    && section[*other_start as usize..(*other_start + *other_len) as usize]
                        == *bytes
                {
                    return Some(*other_offset);
                }
            }
        }
        self.map
            .entry(hash)
            .or_default()
            .push((start, end - start, item_offset));
        None
    }

    /// Drops all remembered ranges; used between files so output files
    /// never share byte ranges.
    pub fn clear(&mut self) {
        self.map.clear();
    }
}

pub struct CompactDexWriter<'a> {
    base: DexWriter<'a>,
    code_item_dedupe: Deduper,
    data_item_dedupe: Deduper,
    owned_data_begin: u32,
    owned_data_end: u32,
    debug_info_offsets_pos: u32,
    debug_info_offsets_table_offset: u32,
    debug_info_base: u32,
}

impl<'a> CompactDexWriter<'a> {
    pub fn new(header: &'a mut ir::Header, options: &'a Options) -> Self {
        Self {
            base: DexWriter::new(header, options, /*compute_offsets*/ true),
            code_item_dedupe: Deduper::new(options.dedupe_code_items),
            data_item_dedupe: Deduper::new(true),
            owned_data_begin: 0,
            owned_data_end: 0,
            debug_info_offsets_pos: 0,
            debug_info_offsets_table_offset: 0,
            debug_info_base: 0,
        }
    }

    /// Compact generation needs every class-data entry of a method id to
    /// agree on its code item and debug info; the side table has one slot
    /// per method.
    pub fn can_generate_compact_dex(&self) -> Result<()> {
        let collections = &self.base.header.collections;
        let num_methods = collections.method_ids.len();
        let mut method_code: Vec<Option<Option<ir::CodeItemRef>>> = vec![None; num_methods];
        let mut method_debug: Vec<Option<Option<ir::DebugInfoRef>>> = vec![None; num_methods];
        for virtual_methods in [false, true] {
            for class_def in &collections.class_defs.items {
                let Some(class_data) = class_def.class_data else {
                    continue;
                };
                let class_data = collections.class_datas.get(class_data);
                let methods = if virtual_methods {
                    &class_data.virtual_methods
                } else {
                    &class_data.direct_methods
                };
                for method in methods {
                    let idx = method.method_idx as usize;
                    let debug_info = method
                        .code
                        .and_then(|code| collections.code_items.get(code).debug_info);
                    if let Some(saw_code) = method_code[idx] {
                        if saw_code != method.code {
                            return dex_err!(InconsistentMethodCode {
                                method_idx: method.method_idx
                            });
                        }
                        if method_debug[idx] != Some(debug_info) {
                            return dex_err!(InconsistentMethodCode {
                                method_idx: method.method_idx
                            });
                        }
                    }
                    method_code[idx] = Some(method.code);
                    method_debug[idx] = Some(debug_info);
                }
            }
        }
        Ok(())
    }

    pub fn write(&mut self, output: &mut DexOutputContainer) -> Result<()> {
        self.can_generate_compact_dex()?;

        let (main, data) = output.sections_mut();
        main.try_reserve(self.base.header.file_size as usize)?;
        data.try_reserve(self.base.header.data_size as usize)?;
        let mut main_storage = Stream::new(main);
        let mut data_storage = Stream::new(data);
        let main_stream = &mut main_storage;
        let data_stream = &mut data_storage;

        // Offset 0 within the data section stays reserved for "absent".
        data_stream.seek(DATA_SECTION_ALIGNMENT);

        // Starting offset is right after the header.
        main_stream.seek(self.get_header_size());

        let string_ids_offset = main_stream.tell();
        self.base.write_string_ids(main_stream, /*reserve_only*/ true);
        self.base.write_type_ids(main_stream);
        let proto_ids_offset = main_stream.tell();
        self.base.write_proto_ids(main_stream, /*reserve_only*/ true);
        self.base.write_field_ids(main_stream);
        self.base.write_method_ids(main_stream);
        let class_defs_offset = main_stream.tell();
        self.base.write_class_defs(main_stream, /*reserve_only*/ true);
        let call_site_ids_offset = main_stream.tell();
        self.base.write_call_site_ids(main_stream, /*reserve_only*/ true);
        self.base.write_method_handles(main_stream);

        data_stream.align_to(DATA_SECTION_ALIGNMENT);
        self.owned_data_begin = data_stream.tell();

        // Code items first to minimize the space required for encoded
        // methods; compact code items don't depend on debug-info offsets.
        self.write_code_items(data_stream);

        // Sorting debug infos by method index shrinks the offset table's
        // deltas.
        self.sort_debug_infos_by_method_index();
        self.write_debug_info_items(data_stream);

        self.base.write_encoded_arrays(data_stream);
        self.base.write_annotations(data_stream);
        self.base.write_annotation_sets(data_stream);
        self.base.write_annotation_set_refs(data_stream);
        self.base.write_annotations_directories(data_stream);
        self.base.write_type_lists(data_stream);
        self.base.write_class_datas(data_stream);
        self.write_string_datas(data_stream);

        // Commit the delayed id sections that depend on data sections.
        {
            let mut seek = ScopedSeek::new(main_stream, string_ids_offset);
            self.base.write_string_ids(&mut seek, /*reserve_only*/ false);
        }
        {
            let mut seek = ScopedSeek::new(main_stream, proto_ids_offset);
            self.base.write_proto_ids(&mut seek, /*reserve_only*/ false);
        }
        {
            let mut seek = ScopedSeek::new(main_stream, class_defs_offset);
            self.base.write_class_defs(&mut seek, /*reserve_only*/ false);
        }
        {
            let mut seek = ScopedSeek::new(main_stream, call_site_ids_offset);
            self.base.write_call_site_ids(&mut seek, /*reserve_only*/ false);
        }

        // Map items live in the data section.
        data_stream.align_to(section_alignment(MapItemType::MapList));
        self.base.header.collections.map_list_offset = data_stream.tell();
        self.base.generate_and_write_map_items(data_stream);

        // Write link data if it exists.
        if !self.base.header.collections.link_data.is_empty() {
            self.base.header.link_offset = data_stream.tell();
            let link_data = std::mem::take(&mut self.base.header.collections.link_data);
            data_stream.write(&link_data);
            self.base.header.collections.link_data = link_data;
        }

        // The debug-info offset table goes last.
        self.write_debug_info_offset_table(data_stream);

        data_stream.align_to(DATA_SECTION_ALIGNMENT);
        self.owned_data_end = data_stream.tell();
        self.base.header.data_size = data_stream.tell();
        if self.base.header.data_size != 0 {
            // The data section follows the main section on disk.
            main_stream.align_to(DATA_SECTION_ALIGNMENT);
            self.base.header.data_offset = main_stream.tell();
        } else {
            self.base.header.data_offset = 0;
        }

        self.base.header.file_size = main_stream.tell();
        self.write_header(main_stream);

        let file_size = self.base.header.file_size as usize;
        let data_size = data_stream.tell() as usize;
        drop(main_storage);
        drop(data_storage);
        output.main_section_mut().resize(file_size);
        output.data_section_mut().resize(data_size);

        if self.base.options.update_checksum {
            // The compact checksum covers both sections.
            let mut adler = adler32::RollingAdler32::new();
            adler.update_buffer(&output.main_section().data()[12..]);
            adler.update_buffer(output.data_section().data());
            self.base.header.checksum = adler.hash();
            let mut stream = Stream::new(output.main_section_mut());
            self.write_header(&mut stream);
        }
        debug!(
            "compact dex written: main {} bytes, data {} bytes",
            file_size, data_size
        );

        // Drop remembered ranges so a later file cannot dedupe against
        // this one.
        self.code_item_dedupe.clear();
        self.data_item_dedupe.clear();
        Ok(())
    }

    fn get_header_size(&self) -> u32 {
        COMPACT_HEADER_SIZE
    }

    // ------------------------------------------------------------------
    // Deduped data items
    // ------------------------------------------------------------------

    fn write_code_items(&mut self, stream: &mut Stream<'_>) {
        let start = stream.tell();
        let collections = &mut self.base.header.collections;
        for id in collections.code_items.order.clone() {
            let code_item = collections.code_items.get_mut(id);
            Self::write_code_item(stream, code_item, &mut self.code_item_dedupe);
        }
        if start != stream.tell() {
            collections.code_items.offset = start;
        }
    }

    fn write_code_item(stream: &mut Stream<'_>, code_item: &mut ir::CodeItem, dedupe: &mut Deduper) {
        use compact_code_item::*;

        let start_offset = stream.tell();
        stream.align_to(ALIGNMENT);

        let (fields, insns_count_and_flags, preheader) = Self::create_preheader(code_item);
        let preheader_bytes = preheader.len() as u32 * 2;

        const PAYLOAD_INSTRUCTION_REQUIRED_ALIGNMENT: u32 = 4;
        let current_code_item_start = stream.tell() + preheader_bytes;
        if !is_aligned(current_code_item_start, PAYLOAD_INSTRUCTION_REQUIRED_ALIGNMENT) {
            // If the pre-header would misalign the code, a payload
            // instruction's data needs 2 bytes of padding in front.
            let has_payload = SafeDexInstructionIterator::new(&code_item.insns)
                .any(|inst| inst.is_payload_reference());
            if has_payload {
                stream.skip(
                    round_up(current_code_item_start, PAYLOAD_INSTRUCTION_REQUIRED_ALIGNMENT)
                        - current_code_item_start,
                );
            }
        }

        // Pre-header first; the registered offset is the struct itself.
        for value in &preheader {
            stream.write_u16(*value);
        }
        code_item.offset = stream.tell();
        stream.write_u16(fields);
        stream.write_u16(insns_count_and_flags);
        for unit in &code_item.insns {
            stream.write_u16(*unit);
        }
        DexWriter::write_code_item_post_instruction_data(stream, code_item);

        // Maybe dedupe the whole item, padding included. A hit only
        // sticks when the stored offset meets the alignment requirement.
        let end = stream.tell();
        if let Some(deduped) = dedupe.dedupe(stream.data(), start_offset, end, code_item.offset) {
            if is_aligned(deduped, ALIGNMENT) {
                code_item.offset = deduped;
                stream.clear(start_offset, end - start_offset);
                stream.seek(start_offset);
            }
        }
    }

    /// Packs the code-item counts. Values that fit keep their 4-bit (or
    /// 11-bit, for the instruction count) slot; the rest spill into the
    /// pre-header in file order registers, ins, outs, tries, count.
    fn create_preheader(code_item: &ir::CodeItem) -> (u16, u16, Vec<u16>) {
        use compact_code_item::*;

        let mut fields = 0u16;
        let mut insns_count_and_flags = 0u16;
        let mut preheader = Vec::with_capacity(MAX_PREHEADER_SIZE);

        let mut pack = |value: u16, shift: u16, flag: u16, fields: &mut u16, flags: &mut u16,
                        preheader: &mut Vec<u16>| {
            if value <= SIZE_MASK {
                *fields |= value << shift;
            } else {
                *flags |= flag;
                preheader.push(value);
            }
        };
        pack(
            code_item.registers_size,
            REGISTERS_SIZE_SHIFT,
            FLAG_PREHEADER_REGISTERS_SIZE,
            &mut fields,
            &mut insns_count_and_flags,
            &mut preheader,
        );
        pack(
            code_item.ins_size,
            INS_SIZE_SHIFT,
            FLAG_PREHEADER_INS_SIZE,
            &mut fields,
            &mut insns_count_and_flags,
            &mut preheader,
        );
        pack(
            code_item.outs_size,
            OUTS_SIZE_SHIFT,
            FLAG_PREHEADER_OUTS_SIZE,
            &mut fields,
            &mut insns_count_and_flags,
            &mut preheader,
        );
        pack(
            code_item.tries_size(),
            TRIES_SIZE_SHIFT,
            FLAG_PREHEADER_TRIES_SIZE,
            &mut fields,
            &mut insns_count_and_flags,
            &mut preheader,
        );

        let insns_size = code_item.insns_size();
        if insns_size < (1 << INSNS_SIZE_BITS) {
            insns_count_and_flags |= (insns_size as u16) << INSNS_SIZE_SHIFT;
        } else {
            insns_count_and_flags |= FLAG_PREHEADER_INSNS_SIZE;
            preheader.push((insns_size >> 16) as u16);
            preheader.push(insns_size as u16);
        }
        (fields, insns_count_and_flags, preheader)
    }

    fn write_debug_info_items(&mut self, stream: &mut Stream<'_>) {
        let start = stream.tell();
        let collections = &mut self.base.header.collections;
        for id in collections.debug_info_items.order.clone() {
            let item = collections.debug_info_items.get_mut(id);
            let item_start = stream.tell();
            stream.align_to(section_alignment(MapItemType::DebugInfoItem));
            item.offset = stream.tell();
            stream.write(&item.data);
            let end = stream.tell();
            if let Some(deduped) =
                self.data_item_dedupe
                    .dedupe(stream.data(), item_start, end, item.offset)
            {
                item.offset = deduped;
                stream.clear(item_start, end - item_start);
                stream.seek(item_start);
            }
        }
        if start != stream.tell() {
            collections.debug_info_items.offset = start;
        }
    }

    fn write_string_datas(&mut self, stream: &mut Stream<'_>) {
        let start = stream.tell();
        let collections = &mut self.base.header.collections;
        for id in collections.string_datas.order.clone() {
            let item = collections.string_datas.get_mut(id);
            let item_start = stream.tell();
            stream.align_to(section_alignment(MapItemType::StringDataItem));
            item.offset = stream.tell();
            stream.write_uleb128(crate::utf::mutf8_len(&item.data) as u32);
            stream.write(&item.data);
            // Null terminator; the backing storage is already zeroed.
            stream.skip(1);
            let end = stream.tell();
            if let Some(deduped) =
                self.data_item_dedupe
                    .dedupe(stream.data(), item_start, end, item.offset)
            {
                item.offset = deduped;
                stream.clear(item_start, end - item_start);
                stream.seek(item_start);
            }
        }
        if start != stream.tell() {
            collections.string_datas.offset = start;
        }
    }

    /// Reorders debug-info items by the lowest method index that uses
    /// them, which keeps the offset-table deltas small.
    fn sort_debug_infos_by_method_index(&mut self) {
        let collections = &mut self.base.header.collections;
        let mut method_idx_map: HashMap<ir::DebugInfoRef, u32> = HashMap::new();
        for virtual_methods in [false, true] {
            for class_def in &collections.class_defs.items {
                let Some(class_data) = class_def.class_data else {
                    continue;
                };
                let class_data = collections.class_datas.get(class_data);
                let methods = if virtual_methods {
                    &class_data.virtual_methods
                } else {
                    &class_data.direct_methods
                };
                for method in methods {
                    let Some(code) = method.code else {
                        continue;
                    };
                    if let Some(debug_info) = collections.code_items.get(code).debug_info {
                        method_idx_map.entry(debug_info).or_insert(method.method_idx);
                    }
                }
            }
        }
        collections
            .debug_info_items
            .sort_order_by_key(|id, _| method_idx_map.get(&id).copied().unwrap_or(0));
    }

    /// Builds the method-index → debug-info-offset table and appends it
    /// to the data section.
    fn write_debug_info_offset_table(&mut self, stream: &mut Stream<'_>) {
        let collections = &self.base.header.collections;
        let mut debug_info_offsets = vec![0u32; collections.method_ids.len()];

        for virtual_methods in [false, true] {
            for class_def in &collections.class_defs.items {
                let Some(class_data) = class_def.class_data else {
                    continue;
                };
                let class_data = collections.class_datas.get(class_data);
                let methods = if virtual_methods {
                    &class_data.virtual_methods
                } else {
                    &class_data.direct_methods
                };
                for method in methods {
                    let Some(code) = method.code else {
                        continue;
                    };
                    if let Some(debug_info) = collections.code_items.get(code).debug_info {
                        let offset = collections.debug_info_items.get(debug_info).offset;
                        let slot = &mut debug_info_offsets[method.method_idx as usize];
                        // A method id visited twice must resolve to the
                        // same stream; can_generate checked this.
                        debug_assert!(*slot == 0 || *slot == offset);
                        *slot = offset;
                    }
                }
            }
        }

        if debug_info_offsets.is_empty() {
            return;
        }
        let table = offset_table::build(&debug_info_offsets);
        stream.align_to(offset_table::ALIGNMENT);
        self.debug_info_offsets_pos = stream.tell();
        stream.write(&table.data);
        self.debug_info_base = table.minimum_offset;
        self.debug_info_offsets_table_offset = table.table_offset;
    }

    fn write_header(&mut self, stream: &mut Stream<'_>) {
        let mut buffer = [0u8; COMPACT_HEADER_SIZE as usize];
        let header = &self.base.header;
        let collections = &header.collections;
        buffer[0..4].copy_from_slice(CDEX_MAGIC);
        buffer[4..8].copy_from_slice(CDEX_MAGIC_VERSIONS[0]);
        put_u32(&mut buffer, 8, header.checksum);
        buffer[12..32].copy_from_slice(&header.signature);
        put_u32(&mut buffer, 32, header.file_size);
        // Not necessarily the same format as the input, so never reuse
        // the stored header size.
        put_u32(&mut buffer, 36, self.get_header_size());
        put_u32(&mut buffer, 40, header.endian_tag);
        put_u32(&mut buffer, 44, header.link_size);
        put_u32(&mut buffer, 48, header.link_offset);
        put_u32(&mut buffer, 52, collections.map_list_offset);
        put_u32(&mut buffer, 56, collections.string_ids.len() as u32);
        put_u32(&mut buffer, 60, collections.string_ids.offset);
        put_u32(&mut buffer, 64, collections.type_ids.len() as u32);
        put_u32(&mut buffer, 68, collections.type_ids.offset);
        put_u32(&mut buffer, 72, collections.proto_ids.len() as u32);
        put_u32(&mut buffer, 76, collections.proto_ids.offset);
        put_u32(&mut buffer, 80, collections.field_ids.len() as u32);
        put_u32(&mut buffer, 84, collections.field_ids.offset);
        put_u32(&mut buffer, 88, collections.method_ids.len() as u32);
        put_u32(&mut buffer, 92, collections.method_ids.offset);
        put_u32(&mut buffer, 96, collections.class_defs.len() as u32);
        put_u32(&mut buffer, 100, collections.class_defs.offset);
        put_u32(&mut buffer, 104, header.data_size);
        put_u32(&mut buffer, 108, header.data_offset);
        let feature_flags = if header.support_default_methods {
            crate::file::header::feature_flags::DEFAULT_METHODS
        } else {
            0
        };
        put_u32(&mut buffer, 112, feature_flags);
        put_u32(&mut buffer, 116, self.debug_info_offsets_pos);
        put_u32(&mut buffer, 120, self.debug_info_offsets_table_offset);
        put_u32(&mut buffer, 124, self.debug_info_base);
        put_u32(&mut buffer, 128, self.owned_data_begin);
        put_u32(&mut buffer, 132, self.owned_data_end);

        stream.seek(0);
        stream.overwrite(&buffer);
    }
}

fn round_up(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{DexFile, DexLocation};
    use crate::ir::builder::build_ir;
    use crate::ir::fixtures;
    use crate::options::CompactDexLevel;
    use crate::verify::verify_output_dex_file;

    fn compact_options() -> Options {
        Options {
            compact_dex_level: CompactDexLevel::Fast,
            ..Options::default()
        }
    }

    fn emit(header: &mut ir::Header, options: &Options) -> DexOutputContainer {
        let mut container = DexOutputContainer::new();
        super::super::output_dex_file(header, options, true, &mut container).unwrap();
        container
    }

    fn reparse_and_verify(header: &ir::Header, bytes: &[u8]) {
        let dex = DexFile::from_raw_parts(&bytes, DexLocation::InMemory).unwrap();
        assert!(dex.is_compact_dex());
        dex.check_header().unwrap();
        dex.verify(true).unwrap();
        let mut options = Options::default();
        options.eagerly_assign_offsets = true;
        let reparsed = build_ir(&dex, &options).unwrap();
        verify_output_dex_file(header, &reparsed).unwrap();
    }

    #[test]
    fn deduper_reports_prior_ranges() {
        let section = [1u8, 2, 3, 1, 2, 3, 9];
        let mut deduper = Deduper::new(true);
        assert_eq!(deduper.dedupe(&section, 0, 3, 0), None);
        assert_eq!(deduper.dedupe(&section, 3, 6, 3), Some(0));
        // Different content misses.
        assert_eq!(deduper.dedupe(&section, 4, 7, 4), None);
        // Disabled deduper never reports.
        let mut disabled = Deduper::new(false);
        assert_eq!(disabled.dedupe(&section, 0, 3, 0), None);
        assert_eq!(disabled.dedupe(&section, 3, 6, 3), None);
    }

    #[test]
    fn misaligned_dedupe_hit_is_declined() {
        use crate::container::Section;

        // First occurrence lands at an odd offset; an identical range
        // written later must keep its own bytes when the caller needs
        // 4-byte alignment.
        let mut section = Section::new();
        let mut stream = Stream::new(&mut section);
        stream.skip(1);
        let mut deduper = Deduper::new(true);

        let first = stream.tell();
        stream.write(&[7, 7, 7, 7]);
        assert_eq!(deduper.dedupe(stream.data(), first, stream.tell(), first), None);

        stream.align_to(4);
        let second = stream.tell();
        stream.write(&[7, 7, 7, 7]);
        let hit = deduper
            .dedupe(stream.data(), second, stream.tell(), second)
            .unwrap();
        assert_eq!(hit, first);
        // The stored offset misses the alignment requirement, so the
        // caller declines and both copies stay resident.
        assert!(!is_aligned(hit, 4));
        assert_eq!(&stream.data()[second as usize..], &[7, 7, 7, 7]);
    }

    #[test]
    fn preheader_spills_large_fields() {
        use compact_code_item::*;

        let mut header = fixtures::two_method_class();
        let code = header.collections.class_datas.items[0].direct_methods[0]
            .code
            .unwrap();
        let code_item = header.collections.code_items.get_mut(code);
        code_item.registers_size = 200;
        let (fields, flags, preheader) = CompactDexWriter::create_preheader(code_item);
        assert_eq!(fields & (SIZE_MASK << REGISTERS_SIZE_SHIFT), 0);
        assert!(flags & FLAG_PREHEADER_REGISTERS_SIZE != 0);
        assert_eq!(preheader, vec![200]);

        code_item.registers_size = 3;
        let (fields, flags, preheader) = CompactDexWriter::create_preheader(code_item);
        assert_eq!(fields >> REGISTERS_SIZE_SHIFT, 3);
        assert!(flags & FLAG_PREHEADER_REGISTERS_SIZE == 0);
        assert!(preheader.is_empty());
    }

    #[test]
    fn compact_round_trip() {
        let mut header = fixtures::two_method_class();
        let container = emit(&mut header, &compact_options());
        reparse_and_verify(&header, &container.serialize());
    }

    #[test]
    fn compact_round_trip_with_tries_and_debug_info() {
        let mut header = fixtures::try_catch_class();
        let container = emit(&mut header, &compact_options());
        reparse_and_verify(&header, &container.serialize());
    }

    #[test]
    fn duplicate_code_items_share_an_offset() {
        let mut header = fixtures::duplicate_code_classes();
        let container = emit(&mut header, &compact_options());

        let code0 = header.collections.class_datas.items[0].direct_methods[0]
            .code
            .unwrap();
        let code1 = header.collections.class_datas.items[1].direct_methods[0]
            .code
            .unwrap();
        assert_eq!(
            header.collections.code_items.get(code0).offset,
            header.collections.code_items.get(code1).offset
        );

        // Without dedup the data section carries the second copy.
        let mut fat_header = fixtures::duplicate_code_classes();
        let mut no_dedupe = compact_options();
        no_dedupe.dedupe_code_items = false;
        let fat = emit(&mut fat_header, &no_dedupe);
        assert!(fat.data_section().len() > container.data_section().len());
        let fat0 = fat_header.collections.class_datas.items[0].direct_methods[0]
            .code
            .unwrap();
        let fat1 = fat_header.collections.class_datas.items[1].direct_methods[0]
            .code
            .unwrap();
        assert_ne!(
            fat_header.collections.code_items.get(fat0).offset,
            fat_header.collections.code_items.get(fat1).offset
        );

        reparse_and_verify(&header, &container.serialize());
    }

    #[test]
    fn inconsistent_method_code_refuses_generation() {
        let mut header = fixtures::inconsistent_method_code();
        let mut container = DexOutputContainer::new();
        let options = compact_options();
        let err = super::super::output_dex_file(&mut header, &options, true, &mut container)
            .unwrap_err();
        assert!(matches!(err, DexError::InconsistentMethodCode { .. }));
        // Nothing was produced.
        assert!(container.main_section().is_empty());
        assert!(container.data_section().is_empty());
    }

    #[test]
    fn data_offsets_are_section_relative() {
        let mut header = fixtures::two_method_class();
        let container = emit(&mut header, &compact_options());
        assert_eq!(
            header.data_offset as usize,
            container.main_section().len()
        );
        // No data item may claim the reserved null offset.
        for code_item in &header.collections.code_items.items {
            assert!(code_item.offset >= DATA_SECTION_ALIGNMENT);
        }
    }
}
