//! `resume`: apply a saved stream to a blank simulated device.

use std::fs::File;

use anyhow::{Context, Result};
use gpumig_core::MigrationConfig;
use gpumig_stream::{MigrationSession, SimDevice};
use memmap2::Mmap;

use super::{feed, layout_for, print_stats, walk, Options};

pub fn run(config: &MigrationConfig, path: &str, opts: &Options) -> Result<()> {
    let file = File::open(path).with_context(|| format!("failed to open {path}"))?;
    // SAFETY: the file is opened read-only and not modified while mapped.
    let stream = unsafe { Mmap::map(&file) }.with_context(|| format!("failed to map {path}"))?;

    // The simulated destination is sized from the stream itself.
    let items = walk(&stream)?;
    let tiles = match opts.tiles {
        Some(n) => n,
        None => items.iter().map(|i| i.tile() + 1).max().unwrap_or(1),
    };
    let layout = layout_for(&items);
    tracing::info!(path, tiles, items = items.len(), ?layout, "resuming");

    let device = SimDevice::new(tiles as usize, layout);
    let mut session = MigrationSession::new(device, config)?;
    feed(&mut session, &stream, opts.write_size)?;

    let digest = session.device().digest();
    if opts.json {
        let report = serde_json::json!({
            "path": path,
            "tiles": tiles,
            "stats": session.stats(),
            "digest": hex::encode(digest),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_stats(&format!("Resumed {path}"), &session.stats(), &digest);
    }
    Ok(())
}
