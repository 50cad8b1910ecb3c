//! Migration data item: one resource instance for one tile in flight.

use gpumig_core::wire::{Header, ResourceType, TileId};

use crate::buffer::TransferBuffer;

/// The unit of transfer: header, body cursor and staging buffer.
///
/// `position` counts body bytes produced (save) or received (resume) so far.
/// The buffer holds one window of the body: the whole body for atomic
/// resources, at most one chunk for chunkable ones. Windows always start
/// at a multiple of the buffer capacity.
#[derive(Debug)]
pub struct MigrationDataItem {
    header: Header,
    kind: ResourceType,
    position: u64,
    header_done: bool,
    buffer: Option<TransferBuffer>,
    /// Bytes of the current window already copied in or out.
    buf_pos: usize,
    /// Save side: bytes of the current window filled by the device.
    /// 0 = the window has not been produced yet.
    filled: usize,
}

impl MigrationDataItem {
    pub fn new(header: Header, kind: ResourceType, buffer: TransferBuffer) -> Self {
        Self {
            header,
            kind,
            position: 0,
            header_done: false,
            buffer: Some(buffer),
            buf_pos: 0,
            filled: 0,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn kind(&self) -> ResourceType {
        self.kind
    }

    pub fn tile(&self) -> TileId {
        self.header.tile()
    }

    pub fn size(&self) -> u64 {
        self.header.size()
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn remaining(&self) -> u64 {
        self.size() - self.position
    }

    pub fn is_complete(&self) -> bool {
        self.position == self.size()
    }

    pub fn header_done(&self) -> bool {
        self.header_done
    }

    pub fn mark_header_done(&mut self) {
        self.header_done = true;
    }

    pub fn capacity(&self) -> usize {
        self.buffer.as_ref().map_or(0, TransferBuffer::capacity)
    }

    /// Body offset where the current window starts.
    pub fn window_start(&self) -> u64 {
        self.position - self.buf_pos as u64
    }

    /// Length of the window starting at [`window_start`](Self::window_start).
    /// Only the last window of a resource may be shorter than the capacity.
    pub fn window_len(&self) -> usize {
        let left = self.size() - self.window_start();
        left.min(self.capacity() as u64) as usize
    }

    pub fn buf_pos(&self) -> usize {
        self.buf_pos
    }

    /// True when the save side must produce the next window before copying.
    pub fn needs_fill(&self) -> bool {
        self.filled == 0 && !self.is_complete()
    }

    /// Record that the device filled `len` bytes of a fresh window.
    pub fn set_filled(&mut self, len: usize) {
        debug_assert_eq!(self.buf_pos, 0);
        self.filled = len;
    }

    /// Bytes of the produced window not yet copied out.
    pub fn filled_remaining(&self) -> usize {
        self.filled - self.buf_pos
    }

    /// Move the cursor `n` bytes forward within the current window. When
    /// the window is exhausted, the next one starts empty.
    pub fn advance(&mut self, n: usize) -> bool {
        self.buf_pos += n;
        self.position += n as u64;
        let window_done = self.buf_pos == self.window_len();
        if window_done {
            self.buf_pos = 0;
            self.filled = 0;
        }
        window_done
    }

    pub fn buffer(&self) -> Option<&TransferBuffer> {
        self.buffer.as_ref()
    }

    pub fn buffer_mut(&mut self) -> Option<&mut TransferBuffer> {
        self.buffer.as_mut()
    }

    /// Give the buffer back. Called once the item is complete.
    pub fn release(&mut self) {
        self.buffer = None;
    }
}
