//! gpumig-core: wire format and configuration shared by every gpumig crate.
//! All other gpumig crates depend on this one.

pub mod config;
pub mod wire;

pub use config::MigrationConfig;
pub use wire::{DeviceIdentity, Header, ResourceType, TileId};
