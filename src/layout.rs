//! Profile-driven reordering of the IR's non-indexed collections.
//!
//! Three passes: string data partitioned by how hot methods reach it,
//! class data reordered by a profile-first class-def walk, and code items
//! stably sorted so cold categories precede hot ones. Indexed tables are
//! never permuted.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::file::modifiers;
use crate::ir::{ClassDataRef, CodeItemRef, Header, StringDataRef};
use crate::profile::{ProfileFileId, ProfileInfo};

/// Usage category of a code item. The variant order is the emission
/// order: ascending stable sort lays cold items out before hot ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LayoutType {
    #[default]
    Unused,
    SometimesUsed,
    UsedOnce,
    StartupOnly,
    Hot,
}

/// Reordering class defs themselves easily breaks the requirement that a
/// class precedes its subclasses, so only the class-data walk follows the
/// profile-first order.
const LAYOUT_CLASS_DEFS: bool = false;

pub fn layout_output_file(header: &mut Header, info: &dyn ProfileInfo, file: ProfileFileId) {
    layout_string_data(header, info, file);
    layout_class_defs_and_class_data(header, info, file);
    layout_code_items(header, info, file);
}

/// Partitions string data so strings reached from hot methods land at the
/// end, with shortys of hot methods just before them. String ids keep
/// their indices; only the data order moves.
pub fn layout_string_data(header: &mut Header, info: &dyn ProfileInfo, file: ProfileFileId) {
    let collections = &header.collections;
    let num_strings = collections.string_ids.len();
    let mut is_shorty = vec![false; num_strings];
    let mut from_hot_method = vec![false; num_strings];

    for class_def in &collections.class_defs.items {
        // A profile class's name is going to get looked up during class
        // resolution, mark it as hot. Its super class and interfaces are
        // used during initialization as well.
        let is_profile_class = info.class_in_profile(file, class_def.class_idx);
        if is_profile_class {
            let descriptor_of = |type_idx: u32| {
                collections.type_ids.items[type_idx as usize].descriptor_idx as usize
            };
            from_hot_method[descriptor_of(class_def.class_idx)] = true;
            if let Some(superclass) = class_def.superclass_idx {
                from_hot_method[descriptor_of(superclass)] = true;
            }
            if let Some(interfaces) = class_def.interfaces {
                for interface in &collections.type_lists.get(interfaces).types {
                    from_hot_method[descriptor_of(*interface)] = true;
                }
            }
        }
        let Some(class_data) = class_def.class_data else {
            continue;
        };
        let class_data = collections.class_datas.get(class_data);
        for method in class_data
            .direct_methods
            .iter()
            .chain(class_data.virtual_methods.iter())
        {
            let Some(code) = method.code else {
                continue;
            };
            let is_clinit = is_profile_class && modifiers::is_clinit(method.access_flags);
            let method_executed =
                is_clinit || info.method_hotness(file, method.method_idx).in_profile();
            if !method_executed {
                continue;
            }
            let method_id = &collections.method_ids.items[method.method_idx as usize];
            let proto_id = &collections.proto_ids.items[method_id.proto_idx as usize];
            is_shorty[proto_id.shorty_idx as usize] = true;
            let Some(fixups) = &collections.code_items.get(code).fixups else {
                continue;
            };
            // Constant pool strings.
            for string_idx in &fixups.string_ids {
                from_hot_method[*string_idx as usize] = true;
            }
            // Field classes, names, and types.
            for field_idx in &fixups.field_ids {
                let field_id = &collections.field_ids.items[*field_idx as usize];
                from_hot_method
                    [collections.type_ids.items[field_id.class_idx as usize].descriptor_idx
                        as usize] = true;
                from_hot_method[field_id.name_idx as usize] = true;
                from_hot_method[collections.type_ids.items[field_id.type_idx as usize]
                    .descriptor_idx as usize] = true;
            }
            // For clinits, add referenced method classes, names, and
            // shortys.
            if is_clinit {
                for called_idx in &fixups.method_ids {
                    let called = &collections.method_ids.items[*called_idx as usize];
                    from_hot_method[collections.type_ids.items[called.class_idx as usize]
                        .descriptor_idx as usize] = true;
                    from_hot_method[called.name_idx as usize] = true;
                    let called_proto = &collections.proto_ids.items[called.proto_idx as usize];
                    is_shorty[called_proto.shorty_idx as usize] = true;
                }
            }
        }
    }

    // Sort string ids by the partition, then lay the data out in that
    // order. Ties keep the original index order.
    let mut sorted_ids: Vec<u32> = (0..num_strings as u32).collect();
    sorted_ids.sort_by_key(|idx| {
        (
            from_hot_method[*idx as usize],
            is_shorty[*idx as usize],
            *idx,
        )
    });

    let collections = &mut header.collections;
    let mut new_order: Vec<StringDataRef> = Vec::with_capacity(collections.string_datas.len());
    let mut visited: HashSet<StringDataRef> = HashSet::with_capacity(collections.string_datas.len());
    for string_idx in sorted_ids {
        let data_ref = collections.string_ids.items[string_idx as usize].string_data;
        if visited.insert(data_ref) {
            new_order.push(data_ref);
        }
    }
    debug_assert_eq!(new_order.len(), collections.string_datas.len());
    collections.string_datas.order = new_order;
}

/// Walks class defs profile-first and lays class data out in the visit
/// order. The class-def table itself only moves behind the debug flag.
pub fn layout_class_defs_and_class_data(
    header: &mut Header,
    info: &dyn ProfileInfo,
    file: ProfileFileId,
) {
    let collections = &header.collections;
    let mut new_class_def_order: Vec<u32> = Vec::with_capacity(collections.class_defs.len());
    for (i, class_def) in collections.class_defs.items.iter().enumerate() {
        if info.class_in_profile(file, class_def.class_idx) {
            new_class_def_order.push(i as u32);
        }
    }
    for (i, class_def) in collections.class_defs.items.iter().enumerate() {
        if !info.class_in_profile(file, class_def.class_idx) {
            new_class_def_order.push(i as u32);
        }
    }

    let mut visited: HashSet<ClassDataRef> = HashSet::with_capacity(collections.class_datas.len());
    let mut new_class_data_order: Vec<ClassDataRef> =
        Vec::with_capacity(collections.class_datas.len());
    for class_def_pos in &new_class_def_order {
        let class_def = &collections.class_defs.items[*class_def_pos as usize];
        if let Some(class_data) = class_def.class_data {
            if visited.insert(class_data) {
                new_class_data_order.push(class_data);
            }
        }
    }
    // Filtered builds can leave class data nothing references; keep those
    // rows in their old relative order.
    let collections = &mut header.collections;
    for id in std::mem::take(&mut collections.class_datas.order) {
        if !visited.contains(&id) {
            new_class_data_order.push(id);
        }
    }
    collections.class_datas.order = new_class_data_order;

    if LAYOUT_CLASS_DEFS {
        let items = std::mem::take(&mut collections.class_defs.items);
        let mut by_pos: Vec<Option<crate::ir::ClassDef>> = items.into_iter().map(Some).collect();
        for pos in new_class_def_order {
            if let Some(class_def) = by_pos[pos as usize].take() {
                collections.class_defs.items.push(class_def);
            }
        }
    }
}

/// Assigns each code item the maximum layout category over every method
/// reaching it, then stably sorts cold-first.
pub fn layout_code_items(header: &mut Header, info: &dyn ProfileInfo, file: ProfileFileId) {
    let collections = &header.collections;
    let mut code_item_layout: HashMap<CodeItemRef, LayoutType> =
        HashMap::with_capacity(collections.code_items.len());

    for virtual_methods in [false, true] {
        for class_def in &collections.class_defs.items {
            let is_profile_class = info.class_in_profile(file, class_def.class_idx);
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
                // Separate executed methods (clinits and profiled methods)
                // from unexecuted methods.
                let is_clinit = modifiers::is_clinit(method.access_flags);
                let is_startup_clinit = is_profile_class && is_clinit;
                let hotness = info.method_hotness(file, method.method_idx);
                let state = if hotness.is_hot() {
                    LayoutType::Hot
                } else if is_startup_clinit || hotness == crate::profile::Hotness::Startup {
                    LayoutType::StartupOnly
                } else if is_clinit {
                    LayoutType::UsedOnce
                } else if hotness.in_profile() {
                    LayoutType::SometimesUsed
                } else {
                    LayoutType::Unused
                };
                code_item_layout
                    .entry(code)
                    .and_modify(|existing| *existing = (*existing).max(state))
                    .or_insert(state);
            }
        }
    }

    if log::log_enabled!(log::Level::Debug) {
        let mut counts = [0usize; 5];
        for layout_type in code_item_layout.values() {
            counts[*layout_type as usize] += 1;
        }
        debug!("code item layout categories: {counts:?}");
    }

    // Stable sort: same-category items keep their relative order to
    // preserve any locality already there.
    let collections = &mut header.collections;
    collections.code_items.sort_order_by_key(|id, _| {
        code_item_layout.get(&id).copied().unwrap_or_default()
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::fixtures;
    use crate::profile::{Hotness, SimpleProfile};

    #[test]
    fn code_items_sort_cold_before_hot() {
        let mut header = fixtures::two_method_class();
        let mut profile = SimpleProfile::default();
        // Method 0 hot, method 1 unused.
        profile.methods.insert((0, 0), Hotness::Hot);
        layout_code_items(&mut header, &profile, 0);

        let hot_code = header.collections.class_datas.items[0].direct_methods[0]
            .code
            .unwrap();
        let order = &header.collections.code_items.order;
        assert_eq!(order.last().copied(), Some(hot_code));
    }

    #[test]
    fn category_merging_takes_the_maximum() {
        let mut header = fixtures::shared_code_class();
        let mut profile = SimpleProfile::default();
        profile.methods.insert((0, 0), Hotness::Hot);
        // Method 1 shares the code item and stays unused; the shared item
        // must still sort as hot, after the genuinely unused item.
        layout_code_items(&mut header, &profile, 0);
        let shared_code = header.collections.class_datas.items[0].direct_methods[0]
            .code
            .unwrap();
        assert_eq!(
            header.collections.code_items.order.last().copied(),
            Some(shared_code)
        );
    }

    #[test]
    fn hot_strings_move_to_the_end() {
        let mut header = fixtures::two_method_class();
        let mut profile = SimpleProfile::default();
        profile.methods.insert((0, 0), Hotness::Hot);
        layout_string_data(&mut header, &profile, 0);

        // Method 0's code references the "hot" string via its fixups.
        let hot_code = header.collections.class_datas.items[0].direct_methods[0]
            .code
            .unwrap();
        let hot_string_idx =
            header.collections.code_items.get(hot_code).fixups.as_ref().unwrap().string_ids[0];
        let hot_data = header.collections.string_ids.items[hot_string_idx as usize].string_data;
        assert_eq!(
            header.collections.string_datas.order.last().copied(),
            Some(hot_data)
        );
        // String ids keep pointing at the same data.
        assert_eq!(
            header.collections.string_ids.items[hot_string_idx as usize].string_data,
            hot_data
        );
    }

    #[test]
    fn class_data_follows_profile_first_walk() {
        let mut header = fixtures::two_class_file();
        let mut profile = SimpleProfile::default();
        // The second class is the profile class.
        let second_class_type = header.collections.class_defs.items[1].class_idx;
        profile.classes.insert((0, second_class_type));
        layout_class_defs_and_class_data(&mut header, &profile, 0);

        let second_data = header.collections.class_defs.items[1].class_data.unwrap();
        assert_eq!(header.collections.class_datas.order[0], second_data);
        // Class defs themselves stay put.
        assert_eq!(header.collections.class_defs.items[0].index, 0);
    }
}
