use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::error::{DbError, DbResult};

/// Parse a UUID string from the database, returning a DbError on failure
pub fn parse_uuid(s: &str) -> DbResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DbError::Internal(format!("Invalid UUID in database: {}", e)))
}

/// Convert a stored unix-millisecond column back into a timestamp
pub fn from_millis(millis: i64) -> DbResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| DbError::Internal(format!("Invalid timestamp in database: {}", millis)))
}
