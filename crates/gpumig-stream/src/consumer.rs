//! Consumer pipeline: parses incoming headers and applies completed
//! windows to the device.
//!
//! Resume is strictly sequential. The next header is only locatable once
//! the current item's body has been fully received, so there is at most
//! one active item at a time.

use gpumig_core::wire::{Header, ResourceType, DESCRIPTOR_SIZE, HEADER_SIZE};

use crate::buffer::{BufferAllocator, TransferBuffer};
use crate::device::MigrationDevice;
use crate::error::{Mismatch, MigrationError, Result};
use crate::item::MigrationDataItem;
use crate::resource::{DescriptorTable, ResourceDescriptor};

/// What the consumer has accepted so far, for header validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResumeProgress {
    pub descriptor_accepted: bool,
    pub require_descriptor_first: bool,
}

/// Parse and validate the header at the front of `bytes` and allocate the
/// item that will receive its body.
///
/// Nothing is consumed on error. A descriptor must be exactly one record
/// long, arrive once, and (when required) precede every other item.
pub fn consume_header<D: MigrationDevice>(
    device: &D,
    table: &DescriptorTable,
    allocator: &BufferAllocator,
    progress: ResumeProgress,
    bytes: &[u8],
) -> Result<MigrationDataItem> {
    if bytes.len() < HEADER_SIZE {
        return Err(MigrationError::ShortBuffer {
            needed: HEADER_SIZE,
            got: bytes.len(),
        });
    }
    let header = Header::parse(bytes)?;
    let desc = table.resolve_raw(header.kind.get())?;
    let kind = desc.kind;
    let tile = header.tile();

    if kind == ResourceType::Descriptor {
        if progress.descriptor_accepted {
            return Err(Mismatch::DuplicateDescriptor.into());
        }
        if header.size() != DESCRIPTOR_SIZE as u64 {
            return Err(Mismatch::DescriptorSize {
                expected: DESCRIPTOR_SIZE as u64,
                found: header.size(),
            }
            .into());
        }
    } else {
        if progress.require_descriptor_first && !progress.descriptor_accepted {
            return Err(Mismatch::DescriptorNotFirst { kind }.into());
        }
        let tiles = device.tile_count();
        if tile >= tiles {
            return Err(Mismatch::TileOutOfRange { kind, tile, tiles }.into());
        }
    }

    let buffer = prepare_buffer(desc, &header, allocator)?;
    tracing::debug!(
        %kind,
        tile,
        size = header.size(),
        capacity = buffer.capacity(),
        "header received"
    );

    let mut item = MigrationDataItem::new(header, kind, buffer);
    item.mark_header_done();
    Ok(item)
}

/// Allocate the staging buffer for an incoming item.
///
/// Atomic resources get the whole body; chunkable ones the same chunk
/// capacity the producer uses, so windows line up with the same device
/// calls on both sides.
pub fn prepare_buffer(
    desc: &ResourceDescriptor,
    header: &Header,
    allocator: &BufferAllocator,
) -> Result<TransferBuffer> {
    allocator.allocate(desc.buffer_capacity(header.size()))
}

/// Hand the item's current window to the device.
///
/// Called once the window is completely received; the item's cursor is
/// advanced by the caller only after this returns `Ok`.
pub fn consume_chunk<D: MigrationDevice>(
    device: &mut D,
    table: &DescriptorTable,
    item: &MigrationDataItem,
) -> Result<()> {
    let desc = table.resolve(item.kind());
    let offset = item.window_start();
    let len = item.window_len();
    let tile = item.tile();

    let Some(buffer) = item.buffer() else {
        return Ok(());
    };
    desc.load(device, tile, offset, buffer.window(0..len))?;

    tracing::debug!(kind = %desc.kind, tile, offset, len, "window loaded");
    Ok(())
}
