//! # tracker-server
//!
//! Axum HTTP + WebSocket server for saint-tracker.
//!
//! - [`hub::Hub`]: registry of viewer connections and the broadcast loop
//! - [`connection`]: per-viewer mailbox and the inbound/outbound pumps
//! - [`auth_cache::DeviceAuthCache`] and [`auth::DeviceAuthenticator`]: device gatekeeping
//! - [`service::WaypointService`]: list and register use cases
//! - [`server::TrackerServer`]: routes, middleware, listener, graceful shutdown

#![deny(unsafe_code)]

pub mod auth;
pub mod auth_cache;
pub mod broadcaster;
pub mod config;
pub mod connection;
pub mod error;
pub mod health;
pub mod hub;
pub mod server;
pub mod service;
pub mod shutdown;

pub use auth::{AuthError, AuthenticatedDevice, DeviceAuthenticator};
pub use auth_cache::DeviceAuthCache;
pub use broadcaster::Broadcaster;
pub use config::{HubConfig, ServerConfig};
pub use error::ApiError;
pub use hub::{Hub, HubState, HubStats, PublishOutcome};
pub use server::{build_router, AppState, ServerHandle, TrackerServer};
pub use service::{ServiceError, WaypointService};
