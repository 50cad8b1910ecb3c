//! Transfer buffers and the allocator that accounts for them.
//!
//! A [`TransferBuffer`] stages one item's bytes (or one chunk window of
//! them). Its accounting is released when it is dropped, so a completed or
//! discarded item frees its memory without any explicit call.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{MigrationError, Result};

#[derive(Debug, Default)]
struct Accounting {
    /// 0 = unlimited.
    budget: u64,
    live: AtomicU64,
    peak: AtomicU64,
}

/// Hands out transfer buffers, optionally within a byte budget.
#[derive(Debug, Clone, Default)]
pub struct BufferAllocator {
    inner: Arc<Accounting>,
}

impl BufferAllocator {
    /// `budget` caps live buffer bytes. 0 = unlimited.
    pub fn new(budget: u64) -> Self {
        Self {
            inner: Arc::new(Accounting {
                budget,
                ..Accounting::default()
            }),
        }
    }

    /// Allocate a zeroed buffer of exactly `capacity` bytes.
    pub fn allocate(&self, capacity: u64) -> Result<TransferBuffer> {
        let oom = || MigrationError::OutOfMemory {
            requested: capacity,
        };
        let len = usize::try_from(capacity).map_err(|_| oom())?;

        let budget = self.inner.budget;
        let reserved = self
            .inner
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                let next = live.checked_add(capacity)?;
                (budget == 0 || next <= budget).then_some(next)
            });
        let live = match reserved {
            Ok(prev) => prev + capacity,
            Err(live) => {
                tracing::warn!(
                    requested = capacity,
                    live,
                    budget,
                    "transfer buffer budget exhausted"
                );
                return Err(oom());
            }
        };

        let mut data = Vec::new();
        if data.try_reserve_exact(len).is_err() {
            self.inner.live.fetch_sub(capacity, Ordering::AcqRel);
            tracing::warn!(requested = capacity, "host allocation failed");
            return Err(oom());
        }
        data.resize(len, 0);
        self.inner.peak.fetch_max(live, Ordering::AcqRel);

        tracing::trace!(capacity, live, "transfer buffer allocated");
        Ok(TransferBuffer {
            data,
            owner: self.inner.clone(),
        })
    }

    /// Bytes held by buffers that are still alive.
    pub fn live_bytes(&self) -> u64 {
        self.inner.live.load(Ordering::Acquire)
    }

    /// High-water mark of [`live_bytes`](Self::live_bytes).
    pub fn peak_bytes(&self) -> u64 {
        self.inner.peak.load(Ordering::Acquire)
    }
}

/// Fixed-capacity staging buffer owned by one migration data item.
#[derive(Debug)]
pub struct TransferBuffer {
    data: Vec<u8>,
    owner: Arc<Accounting>,
}

impl TransferBuffer {
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes `range` of the current window. Panics if out of bounds.
    pub fn window(&self, range: Range<usize>) -> &[u8] {
        &self.data[range]
    }

    pub fn window_mut(&mut self, range: Range<usize>) -> &mut [u8] {
        &mut self.data[range]
    }
}

impl Drop for TransferBuffer {
    fn drop(&mut self) {
        self.owner
            .live
            .fetch_sub(self.data.len() as u64, Ordering::AcqRel);
    }
}
