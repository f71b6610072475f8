//! Repository layer for database persistence.
//!
//! All database access uses Diesel ORM with compile-time query checking over
//! SQLite. Timestamps are stored as RFC 3339 text.

pub mod context;
pub mod document;
pub mod models;
pub mod pool;

pub use context::DbContext;
pub use document::{Admission, AdmissionParams, DocumentRepository};
pub use pool::{DbPool, DieselError};

use chrono::{DateTime, Utc};

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}
