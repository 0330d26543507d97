//! Waypoint use cases: listing history and registering new positions.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use tracing::{info, instrument};
use tracker_core::{NewWaypoint, ValidationError, Waypoint};
use tracker_store::{StoreError, WaypointStore};
use tracker_telemetry::metrics as names;

use crate::broadcaster::Broadcaster;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Invalid JSON body for item {index}")]
    InvalidItem {
        index: usize,
        source: ValidationError,
    },
    #[error("Could not retrieve waypoints data from db")]
    ListFailed(#[source] StoreError),
    #[error("Error inserting waypoints")]
    InsertFailed(#[source] StoreError),
}

pub struct WaypointService {
    store: Arc<dyn WaypointStore>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl WaypointService {
    pub fn new(store: Arc<dyn WaypointStore>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self { store, broadcaster }
    }

    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<Waypoint>, ServiceError> {
        self.store.list().map_err(ServiceError::ListFailed)
    }

    /// Validate, store and announce a batch of waypoints.
    ///
    /// The batch is stored as a whole. It is broadcast only after a
    /// successful write, and only when someone is watching.
    #[instrument(skip(self, batch), fields(count = batch.len()))]
    pub fn register(&self, batch: Vec<NewWaypoint>) -> Result<Vec<Waypoint>, ServiceError> {
        for (index, item) in batch.iter().enumerate() {
            item.validate()
                .map_err(|source| ServiceError::InvalidItem { index, source })?;
        }
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let waypoints: Vec<Waypoint> = batch.into_iter().map(|w| w.into_waypoint(now)).collect();

        self.store
            .append_batch(&waypoints)
            .map_err(ServiceError::InsertFailed)?;
        counter!(names::WAYPOINTS_REGISTERED_TOTAL).increment(waypoints.len() as u64);

        let viewers = self.broadcaster.client_count();
        if viewers > 0 {
            self.broadcaster.broadcast_waypoints(waypoints.clone());
        }
        info!(count = waypoints.len(), viewers, "waypoints registered");
        Ok(waypoints)
    }
}
