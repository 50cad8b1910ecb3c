//! Simulated multi-tile device.
//!
//! Holds every resource in host memory, records each save/load it serves,
//! and can be told to fail specific calls. Used by the test suites and by
//! `gpumig-ctl` to exercise the stream without hardware.

use gpumig_core::wire::{DeviceIdentity, ResourceType, TileId, CCS_COMPRESSION_RATIO};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::device::MigrationDevice;
use crate::error::DeviceError;

/// Identity used when none is given.
pub const SIM_IDENTITY: DeviceIdentity = DeviceIdentity {
    vendor: 0x8086,
    device: 0xe20b,
};

/// Per-tile resource sizes. 0 = not present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimLayout {
    pub ggtt_bytes: u64,
    pub lmem_bytes: u64,
    pub firmware_bytes: u64,
    /// CCS metadata bytes.
    pub ccs_bytes: u64,
}

impl Default for SimLayout {
    fn default() -> Self {
        Self {
            ggtt_bytes: 4096,
            lmem_bytes: 64 * 1024,
            firmware_bytes: 2048,
            ccs_bytes: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOp {
    Save,
    Load,
}

/// One save/load served by the device. For CCS, `offset` and `len` are the
/// described data range, i.e. already scaled by the compression ratio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCall {
    pub op: CallOp,
    pub kind: ResourceType,
    pub tile: TileId,
    pub offset: u64,
    pub len: u64,
}

/// Injected failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Every size query for (kind, tile) fails.
    SizeQuery { kind: ResourceType, tile: TileId },
    /// Save calls for (kind, tile) fail after `skip` successful ones.
    Save {
        kind: ResourceType,
        tile: TileId,
        skip: usize,
    },
    /// Load calls for (kind, tile) fail after `skip` successful ones.
    Load {
        kind: ResourceType,
        tile: TileId,
        skip: usize,
    },
}

#[derive(Debug, Clone, Default)]
struct SimTile {
    ggtt: Vec<u8>,
    lmem: Vec<u8>,
    firmware: Vec<u8>,
    ccs: Vec<u8>,
}

impl SimTile {
    fn zeroed(layout: &SimLayout) -> Self {
        Self {
            ggtt: vec![0; layout.ggtt_bytes as usize],
            lmem: vec![0; layout.lmem_bytes as usize],
            firmware: vec![0; layout.firmware_bytes as usize],
            ccs: vec![0; layout.ccs_bytes as usize],
        }
    }

    fn resource(&self, kind: ResourceType) -> Option<&Vec<u8>> {
        match kind {
            ResourceType::Descriptor => None,
            ResourceType::Ggtt => Some(&self.ggtt),
            ResourceType::Lmem => Some(&self.lmem),
            ResourceType::Firmware => Some(&self.firmware),
            ResourceType::CcsMetadata => Some(&self.ccs),
        }
    }

    fn resource_mut(&mut self, kind: ResourceType) -> Option<&mut Vec<u8>> {
        match kind {
            ResourceType::Descriptor => None,
            ResourceType::Ggtt => Some(&mut self.ggtt),
            ResourceType::Lmem => Some(&mut self.lmem),
            ResourceType::Firmware => Some(&mut self.firmware),
            ResourceType::CcsMetadata => Some(&mut self.ccs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimDevice {
    identity: DeviceIdentity,
    layout: SimLayout,
    tiles: Vec<SimTile>,
    faults: Vec<(Fault, usize)>,
    calls: Vec<DeviceCall>,
}

impl SimDevice {
    /// Zero-filled device with [`SIM_IDENTITY`].
    pub fn new(tiles: usize, layout: SimLayout) -> Self {
        Self::with_identity(SIM_IDENTITY, tiles, layout)
    }

    pub fn with_identity(identity: DeviceIdentity, tiles: usize, layout: SimLayout) -> Self {
        Self {
            identity,
            layout,
            tiles: (0..tiles).map(|_| SimTile::zeroed(&layout)).collect(),
            faults: Vec::new(),
            calls: Vec::new(),
        }
    }

    /// Device whose resources hold deterministic pseudo-random bytes.
    pub fn seeded(tiles: usize, layout: SimLayout, seed: u64) -> Self {
        let mut device = Self::new(tiles, layout);
        let mut rng = StdRng::seed_from_u64(seed);
        for tile in &mut device.tiles {
            rng.fill_bytes(&mut tile.ggtt);
            rng.fill_bytes(&mut tile.lmem);
            rng.fill_bytes(&mut tile.firmware);
            rng.fill_bytes(&mut tile.ccs);
        }
        device
    }

    /// Zeroed device with the same identity and layout, as a resume target.
    pub fn blank_like(&self) -> Self {
        Self::with_identity(self.identity, self.tiles.len(), self.layout)
    }

    pub fn layout(&self) -> SimLayout {
        self.layout
    }

    pub fn inject(&mut self, fault: Fault) {
        self.faults.push((fault, 0));
    }

    /// Every save/load served so far, in order.
    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Current contents of a resource.
    pub fn resource(&self, kind: ResourceType, tile: TileId) -> Option<&[u8]> {
        self.tiles
            .get(tile as usize)
            .and_then(|t| t.resource(kind))
            .map(Vec::as_slice)
    }

    /// BLAKE3 over identity and every resource of every tile.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.identity.vendor.to_le_bytes());
        hasher.update(&self.identity.device.to_le_bytes());
        for tile in &self.tiles {
            for data in [&tile.ggtt, &tile.lmem, &tile.firmware, &tile.ccs] {
                hasher.update(&(data.len() as u64).to_le_bytes());
                hasher.update(data);
            }
        }
        *hasher.finalize().as_bytes()
    }

    fn size_of(&self, kind: ResourceType, tile: TileId) -> Result<u64, DeviceError> {
        let faulted = self.faults.iter().any(|(f, _)| {
            matches!(f, Fault::SizeQuery { kind: k, tile: t } if *k == kind && *t == tile)
        });
        if faulted {
            return Err(DeviceError::failed(
                "size_query",
                format!("injected fault on {kind} tile {tile}"),
            ));
        }
        let tiles = self.tiles.len();
        let data = self
            .tiles
            .get(tile as usize)
            .and_then(|t| t.resource(kind))
            .ok_or_else(|| {
                DeviceError::failed("size_query", format!("no tile {tile} (device has {tiles})"))
            })?;
        if data.is_empty() {
            return Err(DeviceError::NotPresent);
        }
        Ok(data.len() as u64)
    }

    fn check_fault(
        &mut self,
        op: CallOp,
        kind: ResourceType,
        tile: TileId,
    ) -> Result<(), DeviceError> {
        for (fault, seen) in &mut self.faults {
            let (k, t, skip) = match (*fault, op) {
                (Fault::Save { kind, tile, skip }, CallOp::Save) => (kind, tile, skip),
                (Fault::Load { kind, tile, skip }, CallOp::Load) => (kind, tile, skip),
                _ => continue,
            };
            if k != kind || t != tile {
                continue;
            }
            if *seen >= skip {
                return Err(DeviceError::failed(
                    if op == CallOp::Save { "save" } else { "load" },
                    format!("injected fault on {kind} tile {tile}"),
                ));
            }
            *seen += 1;
        }
        Ok(())
    }

    fn save_range(
        &mut self,
        kind: ResourceType,
        tile: TileId,
        offset: u64,
        dst: &mut [u8],
    ) -> Result<(), DeviceError> {
        self.check_fault(CallOp::Save, kind, tile)?;
        let data = self
            .tiles
            .get(tile as usize)
            .and_then(|t| t.resource(kind))
            .ok_or_else(|| DeviceError::failed("save", format!("{kind} missing on tile {tile}")))?;
        let start = offset as usize;
        let src = data
            .get(start..start + dst.len())
            .ok_or_else(|| {
                let len = dst.len();
                DeviceError::failed("save", format!("{kind} range {start}+{len} out of bounds"))
            })?;
        dst.copy_from_slice(src);
        Ok(())
    }

    fn load_range(
        &mut self,
        kind: ResourceType,
        tile: TileId,
        offset: u64,
        src: &[u8],
    ) -> Result<(), DeviceError> {
        self.check_fault(CallOp::Load, kind, tile)?;
        let data = self
            .tiles
            .get_mut(tile as usize)
            .and_then(|t| t.resource_mut(kind))
            .ok_or_else(|| DeviceError::failed("load", format!("{kind} missing on tile {tile}")))?;
        let start = offset as usize;
        let dst = data
            .get_mut(start..start + src.len())
            .ok_or_else(|| {
                let len = src.len();
                DeviceError::failed("load", format!("{kind} range {start}+{len} out of bounds"))
            })?;
        dst.copy_from_slice(src);
        Ok(())
    }

    fn record(&mut self, op: CallOp, kind: ResourceType, tile: TileId, offset: u64, len: u64) {
        self.calls.push(DeviceCall {
            op,
            kind,
            tile,
            offset,
            len,
        });
    }

    fn ccs_meta_offset(
        data_offset: u64,
        data_len: u64,
        meta_len: usize,
    ) -> Result<u64, DeviceError> {
        let expected = meta_len as u64 * CCS_COMPRESSION_RATIO;
        if data_offset % CCS_COMPRESSION_RATIO != 0 || data_len != expected {
            return Err(DeviceError::failed(
                "ccs",
                format!(
                    "data range {data_offset}+{data_len} does not match {meta_len} metadata bytes"
                ),
            ));
        }
        Ok(data_offset / CCS_COMPRESSION_RATIO)
    }
}

impl MigrationDevice for SimDevice {
    fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    fn tile_count(&self) -> u64 {
        self.tiles.len() as u64
    }

    fn ggtt_size(&self, tile: TileId) -> Result<u64, DeviceError> {
        self.size_of(ResourceType::Ggtt, tile)
    }

    fn ggtt_save(&mut self, tile: TileId, dst: &mut [u8]) -> Result<(), DeviceError> {
        self.record(CallOp::Save, ResourceType::Ggtt, tile, 0, dst.len() as u64);
        self.save_range(ResourceType::Ggtt, tile, 0, dst)
    }

    fn ggtt_load(&mut self, tile: TileId, src: &[u8]) -> Result<(), DeviceError> {
        self.record(CallOp::Load, ResourceType::Ggtt, tile, 0, src.len() as u64);
        self.load_range(ResourceType::Ggtt, tile, 0, src)
    }

    fn lmem_size(&self, tile: TileId) -> Result<u64, DeviceError> {
        self.size_of(ResourceType::Lmem, tile)
    }

    fn lmem_save(&mut self, tile: TileId, offset: u64, dst: &mut [u8]) -> Result<(), DeviceError> {
        self.record(CallOp::Save, ResourceType::Lmem, tile, offset, dst.len() as u64);
        self.save_range(ResourceType::Lmem, tile, offset, dst)
    }

    fn lmem_load(&mut self, tile: TileId, offset: u64, src: &[u8]) -> Result<(), DeviceError> {
        self.record(CallOp::Load, ResourceType::Lmem, tile, offset, src.len() as u64);
        self.load_range(ResourceType::Lmem, tile, offset, src)
    }

    fn firmware_size(&self, tile: TileId) -> Result<u64, DeviceError> {
        self.size_of(ResourceType::Firmware, tile)
    }

    fn firmware_save(&mut self, tile: TileId, dst: &mut [u8]) -> Result<(), DeviceError> {
        self.record(CallOp::Save, ResourceType::Firmware, tile, 0, dst.len() as u64);
        self.save_range(ResourceType::Firmware, tile, 0, dst)
    }

    fn firmware_load(&mut self, tile: TileId, src: &[u8]) -> Result<(), DeviceError> {
        self.record(CallOp::Load, ResourceType::Firmware, tile, 0, src.len() as u64);
        self.load_range(ResourceType::Firmware, tile, 0, src)
    }

    fn ccs_size(&self, tile: TileId) -> Result<u64, DeviceError> {
        self.size_of(ResourceType::CcsMetadata, tile)
    }

    fn ccs_save(
        &mut self,
        tile: TileId,
        data_offset: u64,
        data_len: u64,
        dst: &mut [u8],
    ) -> Result<(), DeviceError> {
        self.record(CallOp::Save, ResourceType::CcsMetadata, tile, data_offset, data_len);
        let meta_offset = Self::ccs_meta_offset(data_offset, data_len, dst.len())?;
        self.save_range(ResourceType::CcsMetadata, tile, meta_offset, dst)
    }

    fn ccs_load(
        &mut self,
        tile: TileId,
        data_offset: u64,
        data_len: u64,
        src: &[u8],
    ) -> Result<(), DeviceError> {
        self.record(CallOp::Load, ResourceType::CcsMetadata, tile, data_offset, data_len);
        let meta_offset = Self::ccs_meta_offset(data_offset, data_len, src.len())?;
        self.load_range(ResourceType::CcsMetadata, tile, meta_offset, src)
    }
}
