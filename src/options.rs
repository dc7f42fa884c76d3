use std::collections::HashSet;

/// Output density. `Fast` is the deduplicating compact writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompactDexLevel {
    #[default]
    None,
    Fast,
}

/// Engine configuration, threaded by reference through the builder, the
/// layout passes and the writers.
#[derive(Debug, Clone)]
pub struct Options {
    pub compact_dex_level: CompactDexLevel,
    /// Only meaningful with a compact output level.
    pub dedupe_code_items: bool,
    pub update_checksum: bool,
    /// Re-parse the emitted file and compare its IR against the source IR.
    pub verify_output: bool,
    /// When non-empty, class defs whose descriptor is not listed are
    /// dropped during IR construction.
    pub class_filter: HashSet<String>,
    /// Copy input offsets onto IR items; the standard writer then honors
    /// them instead of computing fresh ones.
    pub eagerly_assign_offsets: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            compact_dex_level: CompactDexLevel::None,
            dedupe_code_items: true,
            update_checksum: true,
            verify_output: false,
            class_filter: HashSet::new(),
            eagerly_assign_offsets: false,
        }
    }
}
