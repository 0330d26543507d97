//! # tracker-store
//!
//! SQLite persistence for the waypoint history and the device directory.
//! The server depends on the [`WaypointStore`] and [`DeviceDirectory`]
//! traits; [`WaypointRepo`] and [`DeviceRepo`] are the SQLite-backed
//! implementations.

#![deny(unsafe_code)]

pub mod database;
pub mod devices;
pub mod error;
pub mod row_helpers;
pub mod schema;
pub mod waypoints;

pub use database::Database;
pub use devices::{DeviceRepo, DeviceRow};
pub use error::StoreError;
pub use waypoints::WaypointRepo;

use tracker_core::Waypoint;

/// Durable waypoint history.
pub trait WaypointStore: Send + Sync {
    fn list(&self) -> Result<Vec<Waypoint>, StoreError>;
    /// Store the whole batch or nothing.
    fn append_batch(&self, waypoints: &[Waypoint]) -> Result<(), StoreError>;
}

/// Authoritative source of device secrets.
pub trait DeviceDirectory: Send + Sync {
    /// `Ok(None)` when the device is unknown.
    fn token_for(&self, device_id: &str) -> Result<Option<String>, StoreError>;
}
