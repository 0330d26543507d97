//! # tracker-core
//!
//! Domain types shared by every saint-tracker crate: branded identifiers,
//! waypoint records and their validation, and the hub message model with its
//! JSON wire encoding.

#![deny(unsafe_code)]

pub mod ids;
pub mod message;
pub mod waypoint;

pub use ids::{ConnectionId, EventId};
pub use message::{DecodeError, FrameType, Message, WireFrame};
pub use waypoint::{NewWaypoint, ValidationError, Waypoint};
