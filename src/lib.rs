use std::result;

pub mod container;
pub mod error;
pub mod file;
pub mod ir;
pub mod layout;
pub mod leb128;
pub mod offset_table;
pub mod options;
pub mod profile;
pub mod utf;
pub mod verify;
pub mod writer;

pub type Result<T> = result::Result<T, error::DexError>;

use log::debug;

use crate::container::DexOutputContainer;
use crate::file::{DexFile, DexLocation};
use crate::ir::builder::build_ir;
use crate::options::{CompactDexLevel, Options};
use crate::profile::ProfileInfo;

/// Drives a full rewrite of one dex file: parse, build the IR, reorder it
/// according to the profile, emit, and optionally verify the output
/// against the source IR.
pub struct DexLayout<'a> {
    options: &'a Options,
    profile: Option<&'a dyn ProfileInfo>,
}

impl<'a> DexLayout<'a> {
    pub fn new(options: &'a Options, profile: Option<&'a dyn ProfileInfo>) -> Self {
        Self { options, profile }
    }

    pub fn options(&self) -> &Options {
        self.options
    }

    /// Rewrites `data` and returns the filled output container.
    pub fn process_dex(&self, data: &[u8], location: DexLocation) -> Result<DexOutputContainer> {
        let dex = DexFile::from_raw_parts(&data, location)?;
        dex.check_header()?;

        let mut header = build_ir(&dex, self.options)?;
        let do_layout = self.profile.is_some();
        if let Some(info) = self.profile {
            layout::layout_output_file(&mut header, info, 0);
        }

        // Offsets from the input are only trustworthy when nothing moved,
        // and the compact writer always computes its own.
        let compute_offsets =
            do_layout || !self.options.eagerly_assign_offsets || self.writes_compact_dex();
        let mut container = DexOutputContainer::new();
        writer::output_dex_file(&mut header, self.options, compute_offsets, &mut container)?;

        if self.options.verify_output {
            debug!("re-parsing output for IR verification");
            let out_bytes = container.serialize();
            let out_dex = DexFile::from_raw_parts(&out_bytes, DexLocation::InMemory)?;
            let mut verify_options = self.options.clone();
            verify_options.eagerly_assign_offsets = true;
            let out_header = build_ir(&out_dex, &verify_options)?;
            verify::verify_output_dex_file(&header, &out_header)?;
        }
        Ok(container)
    }

    /// True when the configured output format is compact dex.
    pub fn writes_compact_dex(&self) -> bool {
        self.options.compact_dex_level != CompactDexLevel::None
    }
}
