//! `inspect`: list the items framed in a saved stream.

use std::fs::File;

use anyhow::{Context, Result};
use gpumig_core::wire::{DescriptorRecord, ResourceType};
use memmap2::Mmap;
use serde::Serialize;
use zerocopy::AsBytes;

use super::{walk, Options, StreamItem};

#[derive(Serialize)]
struct ItemReport {
    offset: u64,
    kind: &'static str,
    tile: u64,
    size: u64,
    header: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    descriptor: Option<DescriptorReport>,
}

#[derive(Serialize)]
struct DescriptorReport {
    magic: String,
    version: u64,
    vendor: String,
    device: String,
}

fn describe(stream: &[u8], item: &StreamItem) -> ItemReport {
    let descriptor = if item.kind == ResourceType::Descriptor {
        DescriptorRecord::parse(&stream[item.body_range()])
            .ok()
            .map(|record| {
                let identity = record.identity();
                DescriptorReport {
                    magic: format!("{:#018x}", record.magic.get()),
                    version: record.version.get(),
                    vendor: format!("{:#06x}", identity.vendor),
                    device: format!("{:#06x}", identity.device),
                }
            })
    } else {
        None
    };
    ItemReport {
        offset: item.offset,
        kind: item.kind.name(),
        tile: item.tile(),
        size: item.size(),
        header: hex::encode(item.header.as_bytes()),
        descriptor,
    }
}

pub fn run(path: &str, opts: &Options) -> Result<()> {
    let file = File::open(path).with_context(|| format!("failed to open {path}"))?;
    // SAFETY: the file is opened read-only and not modified while mapped.
    let stream = unsafe { Mmap::map(&file) }.with_context(|| format!("failed to map {path}"))?;

    let reports: Vec<ItemReport> = walk(&stream)?
        .iter()
        .map(|item| describe(&stream, item))
        .collect();

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  {path} ({} items, {} bytes)", reports.len(), stream.len());
    println!("═══════════════════════════════════════");
    for r in &reports {
        println!("  ┌─ {:<10} tile {}", r.kind, r.tile);
        println!("  │  offset : {}", r.offset);
        println!("  │  size   : {}", r.size);
        if let Some(d) = &r.descriptor {
            println!("  │  magic  : {} (v{})", d.magic, d.version);
            println!("  │  pci id : {}:{}", d.vendor, d.device);
        }
        println!("  └─ header : {}", r.header);
    }
    Ok(())
}
