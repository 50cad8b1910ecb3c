//! Producer pipeline: builds the save queue and fills item bodies on demand.

use std::collections::VecDeque;

use gpumig_core::wire::{Header, ResourceType, TileId};

use crate::buffer::BufferAllocator;
use crate::device::MigrationDevice;
use crate::error::Result;
use crate::item::MigrationDataItem;
use crate::resource::DescriptorTable;

/// Enumerate every present resource of `tiles` into an ordered save queue.
///
/// Order is the descriptor first, then tile-major, type-minor over
/// [`ResourceType::ALL`]. Absent resources (size 0 or not present) produce no
/// item. Any failure drops every item prepared so far, releasing their
/// buffers, and returns the error.
pub fn prepare_save<D: MigrationDevice>(
    device: &D,
    table: &DescriptorTable,
    allocator: &BufferAllocator,
    tiles: &[TileId],
) -> Result<VecDeque<MigrationDataItem>> {
    let mut queue = VecDeque::new();

    let prepared = enqueue(device, table, allocator, &mut queue, ResourceType::Descriptor, 0)
        .and_then(|()| {
            for &tile in tiles {
                for kind in ResourceType::ALL {
                    if kind == ResourceType::Descriptor {
                        continue;
                    }
                    enqueue(device, table, allocator, &mut queue, kind, tile)?;
                }
            }
            Ok(())
        });

    if let Err(e) = prepared {
        tracing::warn!(
            error = %e,
            discarded = queue.len(),
            "save prepare failed, rolling back"
        );
        return Err(e);
    }

    tracing::info!(
        items = queue.len(),
        tiles = tiles.len(),
        body_bytes = queue.iter().map(MigrationDataItem::size).sum::<u64>(),
        "save queue prepared"
    );
    Ok(queue)
}

fn enqueue<D: MigrationDevice>(
    device: &D,
    table: &DescriptorTable,
    allocator: &BufferAllocator,
    queue: &mut VecDeque<MigrationDataItem>,
    kind: ResourceType,
    tile: TileId,
) -> Result<()> {
    let desc = table.resolve(kind);
    let size = desc.query_size(device, tile)?;
    if size == 0 {
        tracing::debug!(%kind, tile, "resource absent, skipping");
        return Ok(());
    }

    let buffer = allocator.allocate(desc.buffer_capacity(size))?;
    tracing::debug!(
        %kind,
        tile,
        size,
        capacity = buffer.capacity(),
        "item prepared"
    );
    queue.push_back(MigrationDataItem::new(Header::new(kind, tile, size), kind, buffer));
    Ok(())
}

/// Fill the item's next window from the device.
///
/// Called the first time a byte of the window is about to be read. Atomic
/// resources have a single window covering the whole body; chunkable ones
/// get one save call per window, at the window's body offset.
pub fn produce_body<D: MigrationDevice>(
    device: &mut D,
    table: &DescriptorTable,
    item: &mut MigrationDataItem,
) -> Result<usize> {
    let desc = table.resolve(item.kind());
    let offset = item.window_start();
    let len = item.window_len();
    let tile = item.tile();

    let Some(buffer) = item.buffer_mut() else {
        return Ok(0);
    };
    desc.save(device, tile, offset, buffer.window_mut(0..len))?;
    item.set_filled(len);

    tracing::debug!(kind = %desc.kind, tile, offset, len, "window saved");
    Ok(len)
}
