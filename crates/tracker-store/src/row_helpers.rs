use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse an RFC 3339 text column.
pub fn parse_timestamp(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table,
            column,
            detail: format!("invalid timestamp '{raw}': {e}"),
        })
}

/// Parse a UUID text column.
pub fn parse_uuid(raw: &str, table: &'static str, column: &'static str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid uuid '{raw}': {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_roundtrips_through_text() {
        let ts = parse_timestamp("2024-03-01T10:00:00+00:00", "waypoint", "created_at").unwrap();
        assert_eq!(ts.timestamp(), 1_709_287_200);
    }

    #[test]
    fn bad_timestamp_is_corrupt_row() {
        let err = parse_timestamp("yesterday", "waypoint", "created_at").unwrap_err();
        assert!(matches!(
            err,
            StoreError::CorruptRow { table: "waypoint", column: "created_at", .. }
        ));
    }

    #[test]
    fn bad_uuid_is_corrupt_row() {
        assert!(parse_uuid("nope", "waypoint", "id").is_err());
    }
}
