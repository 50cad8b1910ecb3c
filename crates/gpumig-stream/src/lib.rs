//! gpumig-stream: serializes multi-tile device state into a byte stream
//! on the source and applies it back on the destination.
//!
//! The save side walks a queue of [`MigrationDataItem`]s built by the
//! producer; the resume side parses one header at a time and hands
//! completed windows to the device. [`MigrationSession`] ties both to a
//! [`MigrationDevice`], and [`fops`] exposes it as a raw read/write pair.

pub mod buffer;
pub mod consumer;
pub mod device;
pub mod error;
pub mod fops;
pub mod item;
pub mod producer;
pub mod resource;
pub mod session;
pub mod sim;

pub use buffer::{BufferAllocator, TransferBuffer};
pub use device::MigrationDevice;
pub use error::{DeviceError, MigrationError, Mismatch, Result};
pub use fops::{StreamReader, StreamWriter};
pub use item::MigrationDataItem;
pub use resource::{DescriptorTable, ResourceDescriptor, Transfer};
pub use session::{MigrationSession, StreamStats};
pub use sim::SimDevice;
