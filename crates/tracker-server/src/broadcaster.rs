//! Narrow seam through which the application layer pushes events to viewers.

use tracker_core::{Message, Waypoint};

use crate::hub::{Hub, PublishOutcome};

/// Fan-out sink used by the waypoint service.
pub trait Broadcaster: Send + Sync {
    /// Best-effort: a full queue or a stopped hub drops the batch.
    fn broadcast_waypoints(&self, waypoints: Vec<Waypoint>);
    /// Viewers currently connected.
    fn client_count(&self) -> usize;
}

impl Broadcaster for Hub {
    fn broadcast_waypoints(&self, waypoints: Vec<Waypoint>) {
        let count = waypoints.len();
        if self.publish(Message::waypoint_batch(waypoints)) != PublishOutcome::Queued {
            tracing::debug!(count, "waypoint batch not queued");
        }
    }

    fn client_count(&self) -> usize {
        self.connection_count()
    }
}
