//! `loopback`: save and resume in memory, then compare device digests.

use anyhow::{bail, Result};
use gpumig_core::MigrationConfig;
use gpumig_stream::MigrationSession;

use super::{drain_into, feed, print_stats, save_session, Options};

pub fn run(config: &MigrationConfig, opts: &Options) -> Result<()> {
    let mut save = save_session(config, opts)?;
    let mut stream = Vec::new();
    drain_into(&mut save, &mut stream, opts.read_size)?;

    let mut resume = MigrationSession::new(save.device().blank_like(), config)?;
    feed(&mut resume, &stream, opts.write_size)?;

    let source = save.device().digest();
    let destination = resume.device().digest();

    if opts.json {
        let report = serde_json::json!({
            "bytes": stream.len(),
            "save": save.stats(),
            "resume": resume.stats(),
            "source_digest": hex::encode(source),
            "destination_digest": hex::encode(destination),
            "match": source == destination,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_stats("Save", &save.stats(), &source);
        print_stats("Resume", &resume.stats(), &destination);
    }

    if source != destination {
        bail!("device digests differ after loopback");
    }
    tracing::info!(bytes = stream.len(), "loopback digests match");
    Ok(())
}
