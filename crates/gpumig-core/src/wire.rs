//! gpumig wire format: on-wire types for the migration stream.
//!
//! These types ARE the protocol. Every field, every size, every reserved byte
//! is part of the wire format. A source and destination that disagree on any
//! of it cannot migrate between each other.
//!
//! All multi-byte fields are little-endian regardless of host order. Types are
//! built from zerocopy's byte-order wrappers, which have alignment 1, so the
//! `#[repr(C)]` layout has no padding and is identical on every target.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

type Le16 = U16<LittleEndian>;
type Le32 = U32<LittleEndian>;
type Le64 = U64<LittleEndian>;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Protocol/device family constant carried in every descriptor body.
pub const MIGRATION_MAGIC: u64 = 0x4750_554d_4947_5246; // "GPUMIGRF"

/// Protocol version. Must match exactly between source and destination.
pub const PROTOCOL_VERSION: u64 = 1;

/// Bytes of CCS data described by one byte of CCS metadata.
pub const CCS_COMPRESSION_RATIO: u64 = 256;

/// Size of [`Header`] on the wire.
pub const HEADER_SIZE: usize = 36;

/// Size of [`DescriptorRecord`] on the wire.
pub const DESCRIPTOR_SIZE: usize = 32;

/// Index of a device tile.
pub type TileId = u64;

// ── Resource Type ─────────────────────────────────────────────────────────────

/// Kind of device state carried by one migration data item.
///
/// The discriminant is the `type` field of [`Header`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum ResourceType {
    /// Device identity record, validated before any other state is applied.
    Descriptor = 0,
    /// Global graphics translation table.
    Ggtt = 1,
    /// Local (device) memory.
    Lmem = 2,
    /// Embedded-controller firmware state.
    Firmware = 3,
    /// Compression control surface metadata.
    CcsMetadata = 4,
}

impl ResourceType {
    /// Fixed producer enumeration order.
    pub const ALL: [ResourceType; 5] = [
        ResourceType::Descriptor,
        ResourceType::Ggtt,
        ResourceType::Lmem,
        ResourceType::Firmware,
        ResourceType::CcsMetadata,
    ];

    /// Stable lowercase name for logs and tooling.
    pub fn name(self) -> &'static str {
        match self {
            ResourceType::Descriptor => "descriptor",
            ResourceType::Ggtt => "ggtt",
            ResourceType::Lmem => "lmem",
            ResourceType::Firmware => "firmware",
            ResourceType::CcsMetadata => "ccs",
        }
    }
}

impl TryFrom<u32> for ResourceType {
    type Error = WireError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ResourceType::Descriptor),
            1 => Ok(ResourceType::Ggtt),
            2 => Ok(ResourceType::Lmem),
            3 => Ok(ResourceType::Firmware),
            4 => Ok(ResourceType::CcsMetadata),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

impl From<ResourceType> for u32 {
    fn from(t: ResourceType) -> u32 {
        t as u32
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Header ────────────────────────────────────────────────────────────────────

/// Precedes the body of every migration data item.
///
/// The receiver can allocate for and route an item before reading a single
/// byte of its body. Chunk boundaries never appear on the wire; the body is
/// exactly `size` contiguous bytes.
///
/// Wire size: 36 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct Header {
    /// [`ResourceType`] discriminant.
    pub kind: Le32,

    /// Tile the item belongs to.
    pub tile: Le64,

    /// Reserved. Always 0 when a header is written.
    pub offset: Le64,

    /// Logical body length in bytes.
    pub size: Le64,

    /// Reserved, must be zero.
    pub flags: Le64,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(Header, [u8; HEADER_SIZE]);

impl Header {
    pub fn new(kind: ResourceType, tile: TileId, size: u64) -> Self {
        Self {
            kind: Le32::new(kind.into()),
            tile: Le64::new(tile),
            offset: Le64::new(0),
            size: Le64::new(size),
            flags: Le64::new(0),
        }
    }

    /// Parse a header from the front of `bytes`.
    ///
    /// Rejects short input, unknown resource types and non-zero reserved
    /// fields.
    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        let header = Self::read_from_prefix(bytes).ok_or(WireError::Truncated {
            needed: HEADER_SIZE,
            got: bytes.len(),
        })?;
        header.resource_type()?;
        if header.offset.get() != 0 {
            return Err(WireError::ReservedOffset(header.offset.get()));
        }
        if header.flags.get() != 0 {
            return Err(WireError::ReservedFlagsSet(header.flags.get()));
        }
        Ok(header)
    }

    pub fn resource_type(&self) -> Result<ResourceType, WireError> {
        ResourceType::try_from(self.kind.get())
    }

    pub fn tile(&self) -> TileId {
        self.tile.get()
    }

    pub fn size(&self) -> u64 {
        self.size.get()
    }
}

// ── Descriptor ────────────────────────────────────────────────────────────────

/// PCI identity of a migratable device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vendor: u16,
    pub device: u16,
}

/// Body of the descriptor item.
///
/// Lets the destination fail fast on a source that is not the same device
/// family, protocol version and PCI identity.
///
/// Wire size: 32 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct DescriptorRecord {
    pub magic: Le64,
    pub version: Le64,
    pub vendor: Le16,
    pub device: Le16,
    /// Reserved, must be zero.
    pub reserved: Le32,
    /// Reserved, must be zero.
    pub flags: Le64,
}

assert_eq_size!(DescriptorRecord, [u8; DESCRIPTOR_SIZE]);

impl DescriptorRecord {
    pub fn for_device(identity: DeviceIdentity) -> Self {
        Self {
            magic: Le64::new(MIGRATION_MAGIC),
            version: Le64::new(PROTOCOL_VERSION),
            vendor: Le16::new(identity.vendor),
            device: Le16::new(identity.device),
            reserved: Le32::new(0),
            flags: Le64::new(0),
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        Self::read_from(bytes).ok_or(WireError::Truncated {
            needed: DESCRIPTOR_SIZE,
            got: bytes.len(),
        })
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            vendor: self.vendor.get(),
            device: self.device.get(),
        }
    }

    /// Check that this record describes a stream `expected` can accept.
    pub fn check(&self, expected: DeviceIdentity) -> Result<(), WireError> {
        if self.magic.get() != MIGRATION_MAGIC {
            return Err(WireError::BadMagic(self.magic.get()));
        }
        if self.version.get() != PROTOCOL_VERSION {
            return Err(WireError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                found: self.version.get(),
            });
        }
        let found = self.identity();
        if found.vendor != expected.vendor {
            return Err(WireError::VendorMismatch {
                expected: expected.vendor,
                found: found.vendor,
            });
        }
        if found.device != expected.device {
            return Err(WireError::DeviceMismatch {
                expected: expected.device,
                found: found.device,
            });
        }
        if self.reserved.get() != 0 || self.flags.get() != 0 {
            return Err(WireError::ReservedFlagsSet(self.flags.get()));
        }
        Ok(())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown resource type: {0}")]
    UnknownType(u32),

    #[error("truncated record: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("reserved offset is non-zero: {0}")]
    ReservedOffset(u64),

    #[error("reserved flags are non-zero: 0x{0:x}")]
    ReservedFlagsSet(u64),

    #[error("bad descriptor magic: 0x{0:016x}")]
    BadMagic(u64),

    #[error("protocol version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u64, found: u64 },

    #[error("vendor mismatch: expected 0x{expected:04x}, found 0x{found:04x}")]
    VendorMismatch { expected: u16, found: u16 },

    #[error("device mismatch: expected 0x{expected:04x}, found 0x{found:04x}")]
    DeviceMismatch { expected: u16, found: u16 },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
