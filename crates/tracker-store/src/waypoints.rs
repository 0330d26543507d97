use chrono::SecondsFormat;
use tracing::{debug, instrument};

use tracker_core::Waypoint;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{get, parse_timestamp, parse_uuid};
use crate::WaypointStore;

const TABLE: &str = "waypoint";

/// SQLite-backed waypoint history.
#[derive(Clone)]
pub struct WaypointRepo {
    db: Database,
}

impl WaypointRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// All stored waypoints, oldest first.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<Waypoint>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, latitude, longitude, speed, created_at, updated_at
                 FROM waypoint ORDER BY created_at ASC, rowid ASC",
            )?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_waypoint(row)?);
            }
            Ok(out)
        })
    }

    /// Insert every waypoint in one transaction; nothing is stored on failure.
    #[instrument(skip(self, waypoints), fields(count = waypoints.len()))]
    pub fn append_batch(&self, waypoints: &[Waypoint]) -> Result<(), StoreError> {
        if waypoints.is_empty() {
            return Ok(());
        }
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO waypoint (id, latitude, longitude, speed, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for wp in waypoints {
                    let _ = stmt.execute(rusqlite::params![
                        wp.id.to_string(),
                        f64::from(wp.latitude),
                        f64::from(wp.longitude),
                        wp.speed,
                        wp.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                        wp.updated_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                    ])?;
                }
            }
            tx.commit()?;
            debug!(count = waypoints.len(), "waypoints stored");
            Ok(())
        })
    }
}

impl WaypointStore for WaypointRepo {
    fn list(&self) -> Result<Vec<Waypoint>, StoreError> {
        WaypointRepo::list(self)
    }

    fn append_batch(&self, waypoints: &[Waypoint]) -> Result<(), StoreError> {
        WaypointRepo::append_batch(self, waypoints)
    }
}

fn row_to_waypoint(row: &rusqlite::Row<'_>) -> Result<Waypoint, StoreError> {
    let id: String = get(row, 0, TABLE, "id")?;
    let latitude: f64 = get(row, 1, TABLE, "latitude")?;
    let longitude: f64 = get(row, 2, TABLE, "longitude")?;
    let speed: i32 = get(row, 3, TABLE, "speed")?;
    let created_at: String = get(row, 4, TABLE, "created_at")?;
    let updated_at: String = get(row, 5, TABLE, "updated_at")?;
    Ok(Waypoint {
        id: parse_uuid(&id, TABLE, "id")?,
        latitude: latitude as f32,
        longitude: longitude as f32,
        speed,
        created_at: parse_timestamp(&created_at, TABLE, "created_at")?,
        updated_at: parse_timestamp(&updated_at, TABLE, "updated_at")?,
    })
}
