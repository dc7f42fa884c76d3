use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::ir;
use crate::utf;

/// Identifies one dex file towards a profile shared across several.
pub type ProfileFileId = u32;

/// Observed usage class of a method, totally ordered by "heat".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Hotness {
    #[default]
    Unused,
    /// Only seen during startup.
    Startup,
    /// In the profile but neither hot nor startup-only.
    InProfile,
    Hot,
}

impl Hotness {
    #[inline(always)]
    pub fn is_hot(self) -> bool {
        self == Hotness::Hot
    }

    #[inline(always)]
    pub fn in_profile(self) -> bool {
        self != Hotness::Unused
    }
}

/// Resolved profile queries the layout planner consumes. Implementations
/// must be pure, deterministic and cheap; the planner calls them once per
/// method and class per pass.
pub trait ProfileInfo {
    fn class_in_profile(&self, file: ProfileFileId, type_idx: u32) -> bool;
    fn method_hotness(&self, file: ProfileFileId, method_idx: u32) -> Hotness;
    fn method_in_profile(&self, file: ProfileFileId, method_idx: u32) -> bool {
        self.method_hotness(file, method_idx).in_profile()
    }
}

/// In-memory profile over resolved indices; what the engine actually
/// queries.
#[derive(Debug, Default)]
pub struct SimpleProfile {
    pub classes: HashSet<(ProfileFileId, u32)>,
    pub methods: HashMap<(ProfileFileId, u32), Hotness>,
}

impl ProfileInfo for SimpleProfile {
    fn class_in_profile(&self, file: ProfileFileId, type_idx: u32) -> bool {
        self.classes.contains(&(file, type_idx))
    }

    fn method_hotness(&self, file: ProfileFileId, method_idx: u32) -> Hotness {
        self.methods
            .get(&(file, method_idx))
            .copied()
            .unwrap_or_default()
    }
}

/// On-disk profile shape consumed by the CLI: class descriptors plus
/// method indices bucketed by hotness.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ProfileData {
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub hot_methods: Vec<u32>,
    #[serde(default)]
    pub startup_methods: Vec<u32>,
    #[serde(default)]
    pub profile_methods: Vec<u32>,
}

impl ProfileData {
    /// Resolves descriptors against one file's type table.
    pub fn resolve(&self, file: ProfileFileId, header: &ir::Header) -> SimpleProfile {
        let mut profile = SimpleProfile::default();
        let wanted: HashSet<&str> = self.classes.iter().map(String::as_str).collect();
        for type_id in &header.collections.type_ids.items {
            let descriptor = descriptor_of(header, type_id.index);
            if wanted.contains(descriptor.as_str()) {
                profile.classes.insert((file, type_id.index));
            }
        }
        for idx in &self.profile_methods {
            profile.methods.insert((file, *idx), Hotness::InProfile);
        }
        for idx in &self.startup_methods {
            profile.methods.insert((file, *idx), Hotness::Startup);
        }
        for idx in &self.hot_methods {
            profile.methods.insert((file, *idx), Hotness::Hot);
        }
        profile
    }
}

/// Descriptor string of a type, decoded from its string data.
pub fn descriptor_of(header: &ir::Header, type_idx: u32) -> String {
    let collections = &header.collections;
    let type_id = &collections.type_ids.items[type_idx as usize];
    let string_id = &collections.string_ids.items[type_id.descriptor_idx as usize];
    let data = collections.string_datas.get(string_id.string_data);
    utf::mutf8_to_str_lossy(&data.data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hotness_total_order() {
        assert!(Hotness::Unused < Hotness::Startup);
        assert!(Hotness::Startup < Hotness::InProfile);
        assert!(Hotness::InProfile < Hotness::Hot);
        assert!(Hotness::Hot.is_hot());
        assert!(!Hotness::Startup.is_hot());
        assert!(Hotness::Startup.in_profile());
        assert!(!Hotness::Unused.in_profile());
    }

    #[test]
    fn simple_profile_defaults_to_unused() {
        let profile = SimpleProfile::default();
        assert_eq!(profile.method_hotness(0, 42), Hotness::Unused);
        assert!(!profile.method_in_profile(0, 42));
        assert!(!profile.class_in_profile(0, 1));
    }

    #[test]
    fn profile_data_deserializes_with_missing_buckets() {
        let data: ProfileData = serde_json::from_str(r#"{"classes": ["LMain;"]}"#).unwrap();
        assert_eq!(data.classes, vec!["LMain;".to_string()]);
        assert!(data.hot_methods.is_empty());
    }
}
