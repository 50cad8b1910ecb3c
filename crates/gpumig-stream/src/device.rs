//! Device trait: the hardware/firmware primitives the stream drives.
//!
//! The stream never touches device state directly. Every resource type maps
//! onto one size/save/load triple here, implemented by the surrounding
//! driver (or by [`crate::sim::SimDevice`] in tests and tooling).
//!
//! Every method returns only once the underlying operation has completed.
//! An implementation that submits GPU work must wait for its completion
//! before returning; the stream advances its position and reuses buffers
//! as soon as a call returns `Ok`.

use gpumig_core::wire::{DeviceIdentity, TileId};

use crate::error::DeviceError;

/// Per-resource primitives of a migratable multi-tile device.
///
/// Size queries return [`DeviceError::NotPresent`] (or `Ok(0)`) for a
/// resource the tile does not have. Offsets and lengths address the
/// logical resource, except for CCS where they address the described data
/// (metadata offset × compression ratio).
pub trait MigrationDevice {
    /// PCI identity written into, and checked against, the descriptor.
    fn identity(&self) -> DeviceIdentity;

    /// Number of tiles. Valid tile ids are `0..tile_count()`.
    fn tile_count(&self) -> u64;

    fn ggtt_size(&self, tile: TileId) -> Result<u64, DeviceError>;
    fn ggtt_save(&mut self, tile: TileId, dst: &mut [u8]) -> Result<(), DeviceError>;
    fn ggtt_load(&mut self, tile: TileId, src: &[u8]) -> Result<(), DeviceError>;

    fn lmem_size(&self, tile: TileId) -> Result<u64, DeviceError>;
    fn lmem_save(&mut self, tile: TileId, offset: u64, dst: &mut [u8]) -> Result<(), DeviceError>;
    fn lmem_load(&mut self, tile: TileId, offset: u64, src: &[u8]) -> Result<(), DeviceError>;

    fn firmware_size(&self, tile: TileId) -> Result<u64, DeviceError>;
    fn firmware_save(&mut self, tile: TileId, dst: &mut [u8]) -> Result<(), DeviceError>;
    fn firmware_load(&mut self, tile: TileId, src: &[u8]) -> Result<(), DeviceError>;

    /// Size of the CCS metadata in bytes.
    fn ccs_size(&self, tile: TileId) -> Result<u64, DeviceError>;

    /// Save the metadata describing `data_len` bytes of data starting at
    /// `data_offset`. `dst.len() * ratio == data_len`.
    fn ccs_save(
        &mut self,
        tile: TileId,
        data_offset: u64,
        data_len: u64,
        dst: &mut [u8],
    ) -> Result<(), DeviceError>;

    fn ccs_load(
        &mut self,
        tile: TileId,
        data_offset: u64,
        data_len: u64,
        src: &[u8],
    ) -> Result<(), DeviceError>;
}
