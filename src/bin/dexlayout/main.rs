use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use comfy_table::Table;

use dexlayout::file::{DexFile, DexLocation, InMemoryDexContainer};
use dexlayout::ir::builder::build_ir;
use dexlayout::options::{CompactDexLevel, Options};
use dexlayout::profile::{Hotness, ProfileData, SimpleProfile};
use dexlayout::DexLayout;

/// Reads a dex file, optionally reorders it by profile, and writes it
/// back out as standard or compact dex.
#[derive(Parser, Debug)]
#[command(name = "dexlayout", version)]
struct Args {
    /// Input dex file.
    input: PathBuf,

    /// Where to write the rewritten file. Defaults to `<input>.new`.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Emit compact dex instead of standard dex.
    #[arg(long)]
    compact: bool,

    /// Disable code-item deduplication (compact output only).
    #[arg(long)]
    no_dedupe_code_items: bool,

    /// Leave the checksum field untouched.
    #[arg(long)]
    no_checksum: bool,

    /// Re-parse the output and compare it against the input at the IR
    /// level.
    #[arg(long)]
    verify: bool,

    /// JSON profile guiding the layout (classes, hot/startup/profile
    /// method indices).
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Keep only classes with these descriptors.
    #[arg(long = "class-filter")]
    class_filter: Vec<String>,

    /// Print a table of the output file's sections.
    #[arg(long)]
    sections: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let data = fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;

    let mut options = Options::default();
    options.compact_dex_level = if args.compact {
        CompactDexLevel::Fast
    } else {
        CompactDexLevel::None
    };
    options.dedupe_code_items = !args.no_dedupe_code_items;
    options.update_checksum = !args.no_checksum;
    options.verify_output = args.verify;
    options.class_filter = args.class_filter.iter().cloned().collect();

    let profile = match &args.profile {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read profile {}", path.display()))?;
            let profile_data: ProfileData =
                serde_json::from_str(&text).context("malformed profile")?;
            Some(resolve_profile(&data, &profile_data)?)
        }
        None => None,
    };

    let layout = DexLayout::new(
        &options,
        profile.as_ref().map(|p| p as &dyn dexlayout::profile::ProfileInfo),
    );
    let location = DexLocation::Path(args.input.display().to_string());
    let container = layout
        .process_dex(&data, location)
        .with_context(|| format!("failed to rewrite {}", args.input.display()))?;

    let out_path = args
        .output
        .clone()
        .unwrap_or_else(|| args.input.with_extension("dex.new"));
    let out_bytes = container.serialize();
    fs::write(&out_path, &out_bytes)
        .with_context(|| format!("failed to write {}", out_path.display()))?;
    println!(
        "wrote {} ({} bytes{})",
        out_path.display(),
        out_bytes.len(),
        if layout.writes_compact_dex() {
            ", compact"
        } else {
            ""
        }
    );

    if args.sections {
        print_sections(&out_bytes)?;
    }
    Ok(())
}

/// Maps the profile's class descriptors onto this file's type indices.
fn resolve_profile(data: &[u8], profile_data: &ProfileData) -> Result<SimpleProfile> {
    let container = InMemoryDexContainer::new(data);
    let dex = DexFile::from_raw_parts(&container, DexLocation::InMemory)?;
    dex.check_header()?;

    let mut profile = SimpleProfile::default();
    for type_idx in 0..dex.num_type_ids() {
        let descriptor = dex.get_type_desc_at(type_idx as u16)?;
        if profile_data.classes.iter().any(|c| *c == descriptor) {
            profile.classes.insert((0, type_idx));
        }
    }
    for idx in &profile_data.profile_methods {
        profile.methods.insert((0, *idx), Hotness::InProfile);
    }
    for idx in &profile_data.startup_methods {
        profile.methods.insert((0, *idx), Hotness::Startup);
    }
    for idx in &profile_data.hot_methods {
        profile.methods.insert((0, *idx), Hotness::Hot);
    }
    Ok(profile)
}

fn print_sections(bytes: &[u8]) -> Result<()> {
    let container = InMemoryDexContainer::new(bytes);
    let dex = DexFile::from_raw_parts(&container, DexLocation::InMemory)?;
    if dex.check_header().is_err() {
        bail!("output file failed to re-parse");
    }
    let mut options = Options::default();
    options.eagerly_assign_offsets = true;
    let header = build_ir(&dex, &options)?;

    let mut table = Table::new();
    table.set_header(vec!["Section", "Items", "Offset"]);
    for section in dexlayout::ir::file_sections(&header) {
        if section.size == 0 {
            continue;
        }
        table.add_row(vec![
            section.name.to_string(),
            section.size.to_string(),
            format!("{:#x}", section.offset),
        ]);
    }
    println!("{table}");
    Ok(())
}
