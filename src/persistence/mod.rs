//! The persisted-data device (design §5, §6): stable file names, and the
//! mutex-guarded registration store shared by the remote coordinator.

pub mod files;
pub mod staging;
pub mod store;

pub use staging::{DeviceRegistry, StagingSink};
pub use store::{HubIdentity, PersistedStore, SharedStore};
