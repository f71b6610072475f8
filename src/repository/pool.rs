//! SQLite connection handling for the repository layer.
//!
//! Connections are created on demand through diesel-async's sync connection
//! wrapper; SQLite connections are cheap to establish and the bundled build
//! keeps deployments self-contained.

use std::path::Path;

use diesel::sqlite::SqliteConnection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::{AsyncConnection, SimpleAsyncConnection};

/// Diesel error type alias.
pub type DieselError = diesel::result::Error;

/// Async SQLite connection type.
pub type SqliteConn = SyncConnectionWrapper<SqliteConnection>;

/// Convert connection-establishment errors into the diesel error type the
/// rest of the repository layer speaks.
fn to_diesel_error(e: diesel::ConnectionError) -> DieselError {
    DieselError::DatabaseError(
        diesel::result::DatabaseErrorKind::Unknown,
        Box::new(e.to_string()),
    )
}

/// SQLite connection pool (lightweight - creates connections on demand).
#[derive(Clone)]
pub struct DbPool {
    database_url: String,
}

impl DbPool {
    /// Create a new pool from a database URL or path.
    pub fn new(database_url: &str) -> Self {
        // Strip sqlite: prefix if present
        let url = database_url.strip_prefix("sqlite:").unwrap_or(database_url);
        Self {
            database_url: url.to_string(),
        }
    }

    /// Create a pool from a file path.
    pub fn from_path(path: &Path) -> Self {
        Self::new(&path.display().to_string())
    }

    /// Get a connection.
    ///
    /// WAL mode plus a busy timeout so concurrent stage writers queue
    /// instead of failing with a lock error.
    pub async fn get(&self) -> Result<SqliteConn, DieselError> {
        let mut conn = SqliteConn::establish(&self.database_url)
            .await
            .map_err(to_diesel_error)?;
        conn.batch_execute(
            "PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;",
        )
        .await?;
        Ok(conn)
    }

    /// Get the database URL.
    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}

/// Run a database operation with a fresh connection.
#[macro_export]
macro_rules! with_conn {
    ($pool:expr, $conn:ident => $body:expr) => {{
        let mut $conn = $pool.get().await?;
        $body
    }};
}

#[allow(unused_imports)]
pub use with_conn;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_prefix_stripped() {
        assert_eq!(DbPool::new("sqlite:/tmp/a.db").database_url(), "/tmp/a.db");
        assert_eq!(DbPool::new("/tmp/a.db").database_url(), "/tmp/a.db");
    }
}
