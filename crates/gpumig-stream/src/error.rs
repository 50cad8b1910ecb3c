//! Error types for the migration stream and its device collaborators.

use gpumig_core::config::ConfigError;
use gpumig_core::wire::{ResourceType, TileId, WireError};

/// Failure reported by a device save/load/size primitive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// The resource does not exist on this device or tile.
    /// Size queries report absence this way; it is not a failure.
    #[error("resource not present")]
    NotPresent,

    #[error("{op} failed: {reason}")]
    Failed { op: &'static str, reason: String },

    #[error("{op} timed out waiting for completion")]
    Timeout { op: &'static str },
}

impl DeviceError {
    pub fn failed(op: &'static str, reason: impl Into<String>) -> Self {
        DeviceError::Failed {
            op,
            reason: reason.into(),
        }
    }
}

/// Direction of a chunk operation, for error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOp {
    Save,
    Load,
}

impl std::fmt::Display for ChunkOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkOp::Save => f.write_str("save"),
            ChunkOp::Load => f.write_str("load"),
        }
    }
}

/// Source and destination disagree about the stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Mismatch {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("{kind} item arrived before the device descriptor")]
    DescriptorNotFirst { kind: ResourceType },

    #[error("duplicate device descriptor")]
    DuplicateDescriptor,

    #[error("descriptor item has size {found}, expected {expected}")]
    DescriptorSize { expected: u64, found: u64 },

    #[error("{kind} item for tile {tile}, device has {tiles} tiles")]
    TileOutOfRange {
        kind: ResourceType,
        tile: TileId,
        tiles: u64,
    },

    #[error("stream ended inside {kind} item for tile {tile} ({remaining} bytes missing)")]
    Truncated {
        kind: ResourceType,
        tile: TileId,
        remaining: u64,
    },
}

/// Errors surfaced by the migration stream.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// A size query failed while preparing the save queue. Prepare is rolled back.
    #[error("size query for {kind} on tile {tile} failed: {source}")]
    SizeQueryFailed {
        kind: ResourceType,
        tile: TileId,
        #[source]
        source: DeviceError,
    },

    /// The header names a resource type this build does not know.
    #[error("unsupported resource type {0}")]
    UnsupportedType(u32),

    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(#[from] Mismatch),

    /// The caller's buffer cannot hold a whole header. Nothing was transferred.
    #[error("short buffer: a header needs {needed} bytes, got {got}")]
    ShortBuffer { needed: usize, got: usize },

    #[error("{op} of {kind} on tile {tile} at offset {offset} failed: {source}")]
    DeviceOperationFailed {
        op: ChunkOp,
        kind: ResourceType,
        tile: TileId,
        offset: u64,
        #[source]
        source: DeviceError,
    },

    #[error("out of memory allocating a {requested} byte transfer buffer")]
    OutOfMemory { requested: u64 },

    /// A fatal error already tore the stream down.
    #[error("stream aborted after a fatal error")]
    Aborted,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<WireError> for MigrationError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::UnknownType(t) => MigrationError::UnsupportedType(t),
            other => MigrationError::ProtocolMismatch(Mismatch::Wire(other)),
        }
    }
}

impl MigrationError {
    /// Fatal errors mean version skew or a torn-down stream; nothing more
    /// may be written to the session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MigrationError::UnsupportedType(_)
                | MigrationError::ProtocolMismatch(_)
                | MigrationError::Aborted
        )
    }

    /// Negative errno for the raw read/write surface.
    pub fn errno(&self) -> isize {
        let code = match self {
            MigrationError::ShortBuffer { .. } | MigrationError::Config(_) => libc::EINVAL,
            MigrationError::OutOfMemory { .. } => libc::ENOMEM,
            MigrationError::SizeQueryFailed { .. }
            | MigrationError::DeviceOperationFailed { .. } => libc::EIO,
            MigrationError::UnsupportedType(_) | MigrationError::ProtocolMismatch(_) => {
                libc::EPROTO
            }
            MigrationError::Aborted => libc::EBADF,
        };
        -(code as isize)
    }
}

pub type Result<T> = std::result::Result<T, MigrationError>;
