use chrono::Utc;
use tracing::{info, instrument};

use crate::database::Database;
use crate::error::StoreError;
use crate::DeviceDirectory;

/// A provisioned tracker device.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceRow {
    pub id: i64,
    pub serial_number: String,
    pub token: String,
    pub device_name: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Registry of devices allowed to publish waypoints.
#[derive(Clone)]
pub struct DeviceRepo {
    db: Database,
}

impl DeviceRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Provision a device. A serial number may be registered only once.
    #[instrument(skip(self, token), fields(serial_number = serial))]
    pub fn register(
        &self,
        serial: &str,
        token: &str,
        name: Option<&str>,
    ) -> Result<DeviceRow, StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let _ = conn.execute(
                "INSERT INTO esp32_devices (serial_number, token, device_name, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?4)",
                rusqlite::params![serial, token, name, now],
            )?;
            let id = conn.last_insert_rowid();
            info!(device_id = id, "device registered");
            Ok(DeviceRow {
                id,
                serial_number: serial.to_string(),
                token: token.to_string(),
                device_name: name.map(str::to_string),
                is_active: true,
                created_at: now.clone(),
                updated_at: now,
            })
        })
    }

    /// Authorized token for a serial number, if the device exists.
    #[instrument(skip(self), fields(serial_number = serial))]
    pub fn token_for(&self, serial: &str) -> Result<Option<String>, StoreError> {
        self.db.with_conn(|conn| {
            match conn.query_row(
                "SELECT token FROM esp32_devices WHERE serial_number = ?1",
                [serial],
                |row| row.get::<_, String>(0),
            ) {
                Ok(token) => Ok(Some(token)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }
}

impl DeviceDirectory for DeviceRepo {
    fn token_for(&self, serial: &str) -> Result<Option<String>, StoreError> {
        DeviceRepo::token_for(self, serial)
    }
}
