//! `save`: stream a simulated device into a file.

use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::{Context, Result};
use gpumig_core::MigrationConfig;

use super::{drain_into, print_stats, save_session, Options};

pub fn run(config: &MigrationConfig, path: &str, opts: &Options) -> Result<()> {
    let mut session = save_session(config, opts)?;

    let file = File::create(path).with_context(|| format!("failed to create {path}"))?;
    let mut out = BufWriter::new(file);
    let written = drain_into(&mut session, &mut out, opts.read_size)?;
    out.flush().with_context(|| format!("failed to flush {path}"))?;
    tracing::info!(path, bytes = written, "save stream written");

    let digest = session.device().digest();
    if opts.json {
        let report = serde_json::json!({
            "path": path,
            "bytes": written,
            "stats": session.stats(),
            "digest": hex::encode(digest),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_stats(&format!("Saved {written} bytes to {path}"), &session.stats(), &digest);
    }
    Ok(())
}
