//! Waypoint records and producer-side validation.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 2000-01-01T00:00:00Z as unix seconds.
const MIN_TIMESTAMP: i64 = 946_684_800;
/// 2100-01-01T00:00:00Z as unix seconds.
const MAX_TIMESTAMP: i64 = 4_102_444_800;

/// A stored position update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub id: Uuid,
    pub latitude: f32,
    pub longitude: f32,
    pub speed: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A position update as sent by a tracker device.
///
/// `created_at` is the device clock reading in unix seconds. Absent fields
/// decode as zero and are reported by [`NewWaypoint::validate`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewWaypoint {
    pub latitude: f32,
    pub longitude: f32,
    pub speed: i32,
    pub created_at: i64,
}

/// Field-level validation failures for one [`NewWaypoint`].
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{}", .errors.join("; "))]
pub struct ValidationError {
    pub errors: Vec<String>,
}

impl NewWaypoint {
    /// Check every field and collect all failures.
    ///
    /// Latitude and longitude are required, so an exact `0.0` is rejected the
    /// same way a missing value is.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();

        check_coordinate(&mut errors, "latitude", self.latitude, 90.0);
        check_coordinate(&mut errors, "longitude", self.longitude, 180.0);

        if self.speed < 0 {
            errors.push("speed: must be no less than 0".to_string());
        }

        if self.created_at == 0 {
            errors.push("created_at: cannot be blank".to_string());
        } else if self.created_at < 0 {
            errors.push("created_at: timestamp must be positive".to_string());
        } else if !(MIN_TIMESTAMP..=MAX_TIMESTAMP).contains(&self.created_at) {
            errors.push("created_at: timestamp out of range 2000 < x < 2100".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { errors })
        }
    }

    /// Build the stored record with a fresh id.
    ///
    /// Call [`validate`](Self::validate) first; an unrepresentable timestamp
    /// falls back to `now`.
    pub fn into_waypoint(self, now: DateTime<Utc>) -> Waypoint {
        let created_at = Utc
            .timestamp_opt(self.created_at, 0)
            .single()
            .unwrap_or(now);
        Waypoint {
            id: Uuid::new_v4(),
            latitude: self.latitude,
            longitude: self.longitude,
            speed: self.speed,
            created_at,
            updated_at: now,
        }
    }
}

fn check_coordinate(errors: &mut Vec<String>, field: &str, value: f32, bound: f32) {
    if value == 0.0 || value.is_nan() {
        errors.push(format!("{field}: cannot be blank"));
    } else if value < -bound {
        errors.push(format!("{field}: must be no less than {}", -bound));
    } else if value > bound {
        errors.push(format!("{field}: must be no greater than {bound}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> NewWaypoint {
        NewWaypoint {
            latitude: 41.9,
            longitude: 12.5,
            speed: 30,
            created_at: 1_700_000_000,
        }
    }

    #[test]
    fn valid_waypoint_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn zero_latitude_is_blank() {
        let wp = NewWaypoint { latitude: 0.0, ..valid() };
        let err = wp.validate().unwrap_err();
        assert_eq!(err.errors, vec!["latitude: cannot be blank"]);
    }

    #[test]
    fn out_of_range_coordinates() {
        let wp = NewWaypoint {
            latitude: 91.0,
            longitude: -181.0,
            ..valid()
        };
        let err = wp.validate().unwrap_err();
        assert_eq!(err.errors.len(), 2);
        assert!(err.errors[0].starts_with("latitude: must be no greater than"));
        assert!(err.errors[1].starts_with("longitude: must be no less than"));
    }

    #[test]
    fn negative_speed_rejected() {
        let wp = NewWaypoint { speed: -1, ..valid() };
        assert!(wp.validate().is_err());
    }

    #[test]
    fn timestamp_bounds() {
        let early = NewWaypoint { created_at: 100, ..valid() };
        assert!(early.validate().unwrap_err().errors[0].contains("out of range"));

        let late = NewWaypoint { created_at: MAX_TIMESTAMP + 1, ..valid() };
        assert!(late.validate().is_err());

        let missing = NewWaypoint { created_at: 0, ..valid() };
        assert_eq!(missing.validate().unwrap_err().errors, vec!["created_at: cannot be blank"]);
    }

    #[test]
    fn errors_are_joined_in_display() {
        let wp = NewWaypoint {
            latitude: 0.0,
            longitude: 0.0,
            speed: 0,
            created_at: 1_700_000_000,
        };
        let err = wp.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "latitude: cannot be blank; longitude: cannot be blank"
        );
    }

    #[test]
    fn into_waypoint_keeps_fields() {
        let now = Utc::now();
        let wp = valid().into_waypoint(now);
        assert_eq!(wp.latitude, 41.9);
        assert_eq!(wp.speed, 30);
        assert_eq!(wp.created_at.timestamp(), 1_700_000_000);
        assert_eq!(wp.updated_at, now);
    }

    #[test]
    fn missing_fields_fail_validation() {
        let wp: NewWaypoint = serde_json::from_str(r#"{"speed":3}"#).unwrap();
        let err = wp.validate().unwrap_err();
        assert_eq!(
            err.errors,
            vec![
                "latitude: cannot be blank",
                "longitude: cannot be blank",
                "created_at: cannot be blank"
            ]
        );
    }

    #[test]
    fn speed_defaults_to_zero() {
        let wp: NewWaypoint =
            serde_json::from_str(r#"{"latitude":1.5,"longitude":2.5,"created_at":1700000000}"#)
                .unwrap();
        assert_eq!(wp.speed, 0);
    }
}
