//! Migration session: the pull/push byte-stream adapter.
//!
//! A [`MigrationSession`] owns one device, its save queue and its single
//! active resume item. Callers drive it with [`read`](MigrationSession::read)
//! (save direction) and [`write`](MigrationSession::write) (resume
//! direction) using any slicing they like, with one rule: a header is
//! always transferred whole within one call.
//!
//! One call serves at most one item. When an item completes, the call
//! returns and the next item's header goes out (or comes in) on the
//! following call.

use std::collections::VecDeque;

use gpumig_core::config::{MigrationConfig, ProtocolConfig};
use gpumig_core::wire::{Header, ResourceType, TileId, HEADER_SIZE};
use serde::Serialize;
use zerocopy::AsBytes;

use crate::buffer::BufferAllocator;
use crate::consumer::{self, ResumeProgress};
use crate::device::MigrationDevice;
use crate::error::{Mismatch, MigrationError, Result};
use crate::item::MigrationDataItem;
use crate::producer;
use crate::resource::DescriptorTable;

/// Running totals for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub items_sent: u64,
    pub items_received: u64,
    /// Items dropped after a device or protocol failure.
    pub items_discarded: u64,
    pub header_bytes: u64,
    pub body_bytes: u64,
    /// Device save/load calls issued.
    pub chunk_ops: u64,
    pub peak_buffer_bytes: u64,
}

/// Body bytes of a discarded resume item that are still on the wire.
#[derive(Debug, Clone, Copy)]
struct Skip {
    kind: ResourceType,
    tile: TileId,
    remaining: u64,
}

pub struct MigrationSession<D> {
    device: D,
    table: DescriptorTable,
    allocator: BufferAllocator,
    protocol: ProtocolConfig,
    queue: VecDeque<MigrationDataItem>,
    active: Option<MigrationDataItem>,
    skip: Option<Skip>,
    /// Load failure to report on the next resume call.
    deferred: Option<MigrationError>,
    descriptor_accepted: bool,
    aborted: bool,
    stats: StreamStats,
}

impl<D: MigrationDevice> MigrationSession<D> {
    pub fn new(device: D, config: &MigrationConfig) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            tiles = device.tile_count(),
            lmem_chunk = config.chunking.lmem_chunk_bytes,
            ccs_chunk = config.chunking.ccs_chunk_bytes,
            budget = config.memory.buffer_budget_bytes,
            "migration session created"
        );
        Ok(Self {
            device,
            table: DescriptorTable::new(&config.chunking),
            allocator: BufferAllocator::new(config.memory.buffer_budget_bytes),
            protocol: config.protocol.clone(),
            queue: VecDeque::new(),
            active: None,
            skip: None,
            deferred: None,
            descriptor_accepted: false,
            aborted: false,
            stats: StreamStats::default(),
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    pub fn allocator(&self) -> &BufferAllocator {
        &self.allocator
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            peak_buffer_bytes: self.allocator.peak_bytes(),
            ..self.stats
        }
    }

    // ── Save direction ────────────────────────────────────────────────────────

    /// Build the save queue for `tiles`. Returns the number of items queued.
    ///
    /// Replaces any queue left over from an earlier save. On error nothing
    /// is queued.
    pub fn prepare_save(&mut self, tiles: &[TileId]) -> Result<usize> {
        if !self.queue.is_empty() {
            tracing::warn!(discarded = self.queue.len(), "replacing unfinished save queue");
            self.queue.clear();
        }
        self.queue = producer::prepare_save(&self.device, &self.table, &self.allocator, tiles)?;
        Ok(self.queue.len())
    }

    /// Build the save queue for every tile of the device.
    pub fn prepare_save_all(&mut self) -> Result<usize> {
        let tiles: Vec<TileId> = (0..self.device.tile_count()).collect();
        self.prepare_save(&tiles)
    }

    /// Headers still waiting in the save queue, head first.
    pub fn pending(&self) -> impl Iterator<Item = &Header> {
        self.queue.iter().map(MigrationDataItem::header)
    }

    /// Copy the next stream bytes into `out`. Returns 0 at end of stream.
    ///
    /// If the head item's header is unsent, `out` must hold at least
    /// [`HEADER_SIZE`] bytes; otherwise `ShortBuffer` is returned and nothing
    /// changes.
    ///
    /// On a device failure nothing from this call reaches the caller. If the
    /// item's header went out in this call, the item is dropped and the next
    /// call starts the following item. If the header went out earlier, the
    /// reader already holds part of the item, so the save stream is aborted.
    pub fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        if self.aborted {
            return Err(MigrationError::Aborted);
        }
        let Some(item) = self.queue.front_mut() else {
            return Ok(0);
        };
        if out.is_empty() {
            return Ok(0);
        }

        let fresh = !item.header_done();
        let mut written = 0;
        if fresh {
            if out.len() < HEADER_SIZE {
                return Err(MigrationError::ShortBuffer {
                    needed: HEADER_SIZE,
                    got: out.len(),
                });
            }
            out[..HEADER_SIZE].copy_from_slice(item.header().as_bytes());
            item.mark_header_done();
            written = HEADER_SIZE;
        }

        while written < out.len() && !item.is_complete() {
            if item.needs_fill() {
                if let Err(e) = producer::produce_body(&mut self.device, &self.table, item) {
                    tracing::warn!(
                        error = %e,
                        kind = %item.kind(),
                        tile = item.tile(),
                        position = item.position(),
                        "save failed"
                    );
                    return Err(self.fail_save(e, fresh));
                }
                self.stats.chunk_ops += 1;
            }

            let n = item.filled_remaining().min(out.len() - written);
            let start = item.buf_pos();
            if let Some(buffer) = item.buffer() {
                out[written..written + n].copy_from_slice(buffer.window(start..start + n));
            }
            item.advance(n);
            written += n;
        }

        let header = if fresh { HEADER_SIZE } else { 0 };
        self.stats.header_bytes += header as u64;
        self.stats.body_bytes += (written - header) as u64;

        if item.is_complete() {
            tracing::debug!(
                kind = %item.kind(),
                tile = item.tile(),
                size = item.size(),
                "item sent"
            );
            item.release();
            self.queue.pop_front();
            self.stats.items_sent += 1;
            if self.queue.is_empty() {
                tracing::info!(
                    items = self.stats.items_sent,
                    bytes = self.stats.body_bytes,
                    "save stream complete"
                );
            }
        }

        tracing::trace!(written, "read");
        Ok(written)
    }

    /// Drop what a failed save leaves behind and hand the error back.
    fn fail_save(&mut self, error: MigrationError, fresh: bool) -> MigrationError {
        if fresh {
            self.queue.pop_front();
            self.stats.items_discarded += 1;
            tracing::warn!("item header not yet delivered, skipping to next item");
        } else {
            self.stats.items_discarded += self.queue.len() as u64;
            self.queue.clear();
            self.aborted = true;
            tracing::warn!("item partially delivered, aborting save stream");
        }
        error
    }

    // ── Resume direction ──────────────────────────────────────────────────────

    /// True while the stream is inside an item body, received or skipped.
    pub fn resume_in_progress(&self) -> bool {
        self.active.is_some() || self.skip.is_some()
    }

    /// Whether a valid descriptor has been received.
    pub fn descriptor_accepted(&self) -> bool {
        self.descriptor_accepted
    }

    /// Feed stream bytes into the device. Returns how many were consumed.
    ///
    /// With no active item, `data` must start with a whole header. Each
    /// window is handed to the device only once it is completely received.
    /// An `Err` return consumed nothing, and a fatal error aborts the session.
    ///
    /// When a load fails, the item is discarded and the rest of its body is
    /// swallowed without touching the device, so the stream stays framed.
    /// The call that hit the failure reports the bytes it took; the failure
    /// itself is returned by the next call (or by
    /// [`finish_resume`](Self::finish_resume)).
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.aborted {
            return Err(MigrationError::Aborted);
        }
        if let Some(e) = self.deferred.take() {
            return Err(e);
        }
        if data.is_empty() {
            return Ok(0);
        }
        if self.skip.is_some() {
            return Ok(self.skip_body(data));
        }

        let result = self.write_inner(data);
        if let Err(e) = &result {
            if self.active.take().is_some() {
                self.stats.items_discarded += 1;
            }
            if e.is_fatal() {
                tracing::warn!(error = %e, "fatal protocol error, aborting resume stream");
                self.aborted = true;
            } else {
                tracing::warn!(error = %e, "resume write failed");
            }
        }
        result
    }

    fn write_inner(&mut self, data: &[u8]) -> Result<usize> {
        let mut consumed = 0;

        if self.active.is_none() {
            let progress = ResumeProgress {
                descriptor_accepted: self.descriptor_accepted,
                require_descriptor_first: self.protocol.require_descriptor_first,
            };
            let item = consumer::consume_header(
                &self.device,
                &self.table,
                &self.allocator,
                progress,
                data,
            )?;
            consumed = HEADER_SIZE;
            self.stats.header_bytes += HEADER_SIZE as u64;
            self.active = Some(item);
        }
        let Some(item) = self.active.as_mut() else {
            return Ok(consumed);
        };

        while consumed < data.len() && !item.is_complete() {
            let start = item.buf_pos();
            let n = (item.window_len() - start).min(data.len() - consumed);
            if let Some(buffer) = item.buffer_mut() {
                buffer
                    .window_mut(start..start + n)
                    .copy_from_slice(&data[consumed..consumed + n]);
            }
            consumed += n;
            self.stats.body_bytes += n as u64;

            if start + n == item.window_len() {
                if let Err(e) = consumer::consume_chunk(&mut self.device, &self.table, item) {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    let remaining = item.remaining() - n as u64;
                    return Ok(consumed + self.fail_load(e, remaining, &data[consumed..]));
                }
                self.stats.chunk_ops += 1;
            }
            item.advance(n);
        }

        if item.is_complete() {
            let kind = item.kind();
            tracing::debug!(%kind, tile = item.tile(), size = item.size(), "item applied");
            if kind == ResourceType::Descriptor {
                self.descriptor_accepted = true;
                tracing::info!("source descriptor accepted");
            }
            self.active = None;
            self.stats.items_received += 1;
        }

        tracing::trace!(consumed, "write");
        Ok(consumed)
    }

    /// Discard the active item after a load failure and start skipping its
    /// remaining `remaining` body bytes, beginning with `rest`.
    fn fail_load(&mut self, error: MigrationError, remaining: u64, rest: &[u8]) -> usize {
        if let Some(item) = self.active.take() {
            tracing::warn!(
                error = %error,
                kind = %item.kind(),
                tile = item.tile(),
                remaining,
                "load failed, skipping rest of item"
            );
            self.stats.items_discarded += 1;
            self.skip = Some(Skip {
                kind: item.kind(),
                tile: item.tile(),
                remaining,
            });
        }
        self.deferred = Some(error);
        self.skip_body(rest)
    }

    fn skip_body(&mut self, data: &[u8]) -> usize {
        let Some(skip) = self.skip.as_mut() else {
            return 0;
        };
        let n = skip.remaining.min(data.len() as u64);
        skip.remaining -= n;
        self.stats.body_bytes += n;
        if skip.remaining == 0 {
            tracing::debug!(kind = %skip.kind, tile = skip.tile, "skipped discarded item");
            self.skip = None;
        }
        n as usize
    }

    /// Check that the resume stream ended on an item boundary, and report a
    /// load failure the last write left pending.
    pub fn finish_resume(&mut self) -> Result<()> {
        if self.aborted {
            return Err(MigrationError::Aborted);
        }
        if let Some(e) = self.deferred.take() {
            return Err(e);
        }
        if let Some(skip) = self.skip {
            return Err(Mismatch::Truncated {
                kind: skip.kind,
                tile: skip.tile,
                remaining: skip.remaining,
            }
            .into());
        }
        match &self.active {
            Some(item) => Err(Mismatch::Truncated {
                kind: item.kind(),
                tile: item.tile(),
                remaining: item.remaining(),
            }
            .into()),
            None => Ok(()),
        }
    }
}
