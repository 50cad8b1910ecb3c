//! Resource descriptor table: transfer strategy and device dispatch per
//! resource type.
//!
//! The set of resource types is closed, so dispatch is an exhaustive match
//! onto [`MigrationDevice`] methods instead of a table of callbacks.

use gpumig_core::config::ChunkingConfig;
use gpumig_core::wire::{
    DescriptorRecord, ResourceType, TileId, CCS_COMPRESSION_RATIO, DESCRIPTOR_SIZE,
};
use zerocopy::AsBytes;

use crate::device::MigrationDevice;
use crate::error::{ChunkOp, DeviceError, Mismatch, MigrationError, Result};

/// How a resource's body moves through a transfer buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Staged whole, one save/load call.
    Atomic,
    /// Staged in windows of at most `max_chunk` bytes.
    Chunked { max_chunk: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub kind: ResourceType,
    pub transfer: Transfer,
    /// Multiplier from body offsets to device offsets.
    pub offset_scale: u64,
}

impl ResourceDescriptor {
    pub fn chunkable(&self) -> bool {
        matches!(self.transfer, Transfer::Chunked { .. })
    }

    /// Buffer capacity for an item of `size` body bytes.
    pub fn buffer_capacity(&self, size: u64) -> u64 {
        match self.transfer {
            Transfer::Atomic => size,
            Transfer::Chunked { max_chunk } => max_chunk.min(size),
        }
    }

    /// Body size of this resource on `tile`. 0 means absent.
    pub fn query_size<D: MigrationDevice>(&self, device: &D, tile: TileId) -> Result<u64> {
        let size = match self.kind {
            // Emitted once per device, under tile 0.
            ResourceType::Descriptor => Ok(if tile == 0 { DESCRIPTOR_SIZE as u64 } else { 0 }),
            ResourceType::Ggtt => device.ggtt_size(tile),
            ResourceType::Lmem => device.lmem_size(tile),
            ResourceType::Firmware => device.firmware_size(tile),
            ResourceType::CcsMetadata => device.ccs_size(tile),
        };
        match size {
            Ok(n) => Ok(n),
            Err(DeviceError::NotPresent) => Ok(0),
            Err(source) => Err(MigrationError::SizeQueryFailed {
                kind: self.kind,
                tile,
                source,
            }),
        }
    }

    /// Fill `dst` with the body bytes starting at body `offset`.
    pub fn save<D: MigrationDevice>(
        &self,
        device: &mut D,
        tile: TileId,
        offset: u64,
        dst: &mut [u8],
    ) -> Result<()> {
        let result = match self.kind {
            ResourceType::Descriptor => {
                let record = DescriptorRecord::for_device(device.identity());
                if offset == 0 && dst.len() == DESCRIPTOR_SIZE {
                    dst.copy_from_slice(record.as_bytes());
                    Ok(())
                } else {
                    Err(DeviceError::failed(
                        "descriptor_save",
                        "window must cover the whole record",
                    ))
                }
            }
            ResourceType::Ggtt => device.ggtt_save(tile, dst),
            ResourceType::Lmem => device.lmem_save(tile, offset, dst),
            ResourceType::Firmware => device.firmware_save(tile, dst),
            ResourceType::CcsMetadata => {
                let data_len = dst.len() as u64 * self.offset_scale;
                device.ccs_save(tile, offset * self.offset_scale, data_len, dst)
            }
        };
        result.map_err(|source| self.op_failed(ChunkOp::Save, tile, offset, source))
    }

    /// Apply `src`, the body bytes starting at body `offset`, to the device.
    ///
    /// For the descriptor this validates the record against the device
    /// instead of touching device state.
    pub fn load<D: MigrationDevice>(
        &self,
        device: &mut D,
        tile: TileId,
        offset: u64,
        src: &[u8],
    ) -> Result<()> {
        let result = match self.kind {
            ResourceType::Descriptor => {
                let record = DescriptorRecord::parse(src).map_err(Mismatch::from)?;
                record.check(device.identity()).map_err(Mismatch::from)?;
                return Ok(());
            }
            ResourceType::Ggtt => device.ggtt_load(tile, src),
            ResourceType::Lmem => device.lmem_load(tile, offset, src),
            ResourceType::Firmware => device.firmware_load(tile, src),
            ResourceType::CcsMetadata => {
                let data_len = src.len() as u64 * self.offset_scale;
                device.ccs_load(tile, offset * self.offset_scale, data_len, src)
            }
        };
        result.map_err(|source| self.op_failed(ChunkOp::Load, tile, offset, source))
    }

    fn op_failed(
        &self,
        op: ChunkOp,
        tile: TileId,
        offset: u64,
        source: DeviceError,
    ) -> MigrationError {
        MigrationError::DeviceOperationFailed {
            op,
            kind: self.kind,
            tile,
            offset,
            source,
        }
    }
}

/// Lookup from resource type to its descriptor. Immutable once built.
#[derive(Debug, Clone)]
pub struct DescriptorTable {
    entries: [ResourceDescriptor; 5],
}

impl DescriptorTable {
    pub fn new(chunking: &ChunkingConfig) -> Self {
        let atomic = |kind| ResourceDescriptor {
            kind,
            transfer: Transfer::Atomic,
            offset_scale: 1,
        };
        Self {
            entries: [
                atomic(ResourceType::Descriptor),
                atomic(ResourceType::Ggtt),
                ResourceDescriptor {
                    kind: ResourceType::Lmem,
                    transfer: Transfer::Chunked {
                        max_chunk: chunking.lmem_chunk_bytes,
                    },
                    offset_scale: 1,
                },
                atomic(ResourceType::Firmware),
                ResourceDescriptor {
                    kind: ResourceType::CcsMetadata,
                    transfer: Transfer::Chunked {
                        max_chunk: chunking.ccs_chunk_bytes,
                    },
                    offset_scale: CCS_COMPRESSION_RATIO,
                },
            ],
        }
    }

    pub fn resolve(&self, kind: ResourceType) -> &ResourceDescriptor {
        &self.entries[kind as usize]
    }

    /// Resolve a raw header discriminant.
    pub fn resolve_raw(&self, discriminant: u32) -> Result<&ResourceDescriptor> {
        let kind = ResourceType::try_from(discriminant)?;
        Ok(self.resolve(kind))
    }
}
