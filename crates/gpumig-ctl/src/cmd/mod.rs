//! CLI command modules and the helpers they share.

pub mod inspect;
pub mod loopback;
pub mod resume;
pub mod save;

use std::io::{Read, Write};

use anyhow::{bail, Context, Result};
use gpumig_core::wire::{Header, ResourceType, TileId, HEADER_SIZE};
use gpumig_core::MigrationConfig;
use gpumig_stream::sim::SimLayout;
use gpumig_stream::{MigrationSession, SimDevice, StreamReader, StreamStats, StreamWriter};

pub const DEFAULT_TILES: u64 = 2;
pub const DEFAULT_SEED: u64 = 1;
pub const DEFAULT_IO_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct Options {
    /// `None` = derive from the stream (resume) or use [`DEFAULT_TILES`].
    pub tiles: Option<u64>,
    pub seed: u64,
    pub read_size: usize,
    pub write_size: usize,
    pub json: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            tiles: None,
            seed: DEFAULT_SEED,
            read_size: DEFAULT_IO_SIZE,
            write_size: DEFAULT_IO_SIZE,
            json: false,
        }
    }
}

/// One framed item found while walking a stream.
#[derive(Debug, Clone)]
pub struct StreamItem {
    /// Byte offset of the header.
    pub offset: u64,
    pub header: Header,
    pub kind: ResourceType,
}

impl StreamItem {
    pub fn tile(&self) -> TileId {
        self.header.tile()
    }

    pub fn size(&self) -> u64 {
        self.header.size()
    }

    pub fn body_range(&self) -> std::ops::Range<usize> {
        let start = self.offset as usize + HEADER_SIZE;
        start..start + self.size() as usize
    }
}

/// Walk every header in a complete stream without applying anything.
pub fn walk(bytes: &[u8]) -> Result<Vec<StreamItem>> {
    let mut items = Vec::new();
    let mut pos = 0usize;
    while pos < bytes.len() {
        if bytes.len() - pos < HEADER_SIZE {
            bail!("truncated header at offset {pos} ({} bytes left)", bytes.len() - pos);
        }
        let header = Header::parse(&bytes[pos..])
            .with_context(|| format!("bad header at offset {pos}"))?;
        let kind = header.resource_type()?;
        let Some(end) = ((pos + HEADER_SIZE) as u64).checked_add(header.size()) else {
            bail!("{kind} item at offset {pos} has impossible size {}", header.size());
        };
        if end > bytes.len() as u64 {
            bail!(
                "{kind} item at offset {pos} needs {} body bytes, stream has {}",
                header.size(),
                bytes.len() - pos - HEADER_SIZE
            );
        }
        items.push(StreamItem {
            offset: pos as u64,
            header,
            kind,
        });
        pos = end as usize;
    }
    Ok(items)
}

/// Smallest simulated layout able to receive `items`.
pub fn layout_for(items: &[StreamItem]) -> SimLayout {
    let mut layout = SimLayout {
        ggtt_bytes: 0,
        lmem_bytes: 0,
        firmware_bytes: 0,
        ccs_bytes: 0,
    };
    for item in items {
        let slot = match item.kind {
            ResourceType::Descriptor => continue,
            ResourceType::Ggtt => &mut layout.ggtt_bytes,
            ResourceType::Lmem => &mut layout.lmem_bytes,
            ResourceType::Firmware => &mut layout.firmware_bytes,
            ResourceType::CcsMetadata => &mut layout.ccs_bytes,
        };
        *slot = (*slot).max(item.size());
    }
    layout
}

/// Build a seeded simulated device and queue every tile for save.
pub fn save_session(
    config: &MigrationConfig,
    opts: &Options,
) -> Result<MigrationSession<SimDevice>> {
    let tiles = opts.tiles.unwrap_or(DEFAULT_TILES) as usize;
    let device = SimDevice::seeded(tiles, SimLayout::default(), opts.seed);
    let mut session = MigrationSession::new(device, config)?;
    let items = session.prepare_save_all()?;
    tracing::info!(tiles, items, seed = opts.seed, "save prepared");
    Ok(session)
}

/// Pull the whole save stream into `out`, `read_size` bytes per call.
pub fn drain_into(
    session: &mut MigrationSession<SimDevice>,
    out: &mut impl Write,
    read_size: usize,
) -> Result<u64> {
    let mut reader = StreamReader::new(session);
    let mut buf = vec![0u8; read_size];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).context("save stream read failed")?;
        if n == 0 {
            return Ok(total);
        }
        out.write_all(&buf[..n]).context("failed to write stream output")?;
        total += n as u64;
    }
}

/// Push `stream` into the session, `write_size` bytes per call.
pub fn feed(
    session: &mut MigrationSession<SimDevice>,
    stream: &[u8],
    write_size: usize,
) -> Result<()> {
    let mut writer = StreamWriter::new(session);
    for piece in stream.chunks(write_size) {
        writer.write_all(piece).context("resume stream write failed")?;
    }
    writer.finish()?;
    Ok(())
}

pub fn print_stats(title: &str, stats: &StreamStats, digest: &[u8; 32]) {
    println!("═══════════════════════════════════════");
    println!("  {title}");
    println!("═══════════════════════════════════════");
    println!("  Items sent       : {}", stats.items_sent);
    println!("  Items received   : {}", stats.items_received);
    println!("  Items discarded  : {}", stats.items_discarded);
    println!("  Header bytes     : {}", stats.header_bytes);
    println!(
        "  Body bytes       : {} ({:.1} KB)",
        stats.body_bytes,
        stats.body_bytes as f64 / 1024.0
    );
    println!("  Device calls     : {}", stats.chunk_ops);
    println!("  Peak buffers     : {} bytes", stats.peak_buffer_bytes);
    println!("  Digest           : {}", hex::encode(digest));
}
