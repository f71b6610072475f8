//! Database context: connection pool ownership and schema initialization.

use std::path::Path;

use diesel_async::SimpleAsyncConnection;

use super::document::DocumentRepository;
use super::pool::{DbPool, DieselError};

/// Owns the pool and hands out repositories.
#[derive(Clone)]
pub struct DbContext {
    pool: DbPool,
}

impl DbContext {
    /// Create a context backed by a SQLite file.
    pub fn from_sqlite_path(path: &Path) -> Self {
        Self {
            pool: DbPool::from_path(path),
        }
    }

    /// Create a context from a database URL.
    pub fn from_url(url: &str) -> Self {
        Self {
            pool: DbPool::new(url),
        }
    }

    /// The document repository (documents, sections, events).
    pub fn documents(&self) -> DocumentRepository {
        DocumentRepository::new(self.pool.clone())
    }

    /// Create tables and indexes if they do not exist.
    pub async fn init_schema(&self) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute(
            r#"
            -- Documents table: one row per admitted upload
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL,
                document_type TEXT,
                status TEXT NOT NULL,
                review_status TEXT,
                original_filename TEXT,
                mime_type TEXT NOT NULL,
                file_size BIGINT NOT NULL DEFAULT 0,
                storage_path TEXT NOT NULL,
                classification TEXT,
                extracted_data TEXT,
                error_state TEXT,
                error_kind TEXT,
                error_cause TEXT,
                reviewed_by TEXT,
                reviewed_at TEXT,
                review_notes TEXT,
                run_token TEXT,
                last_run_token TEXT,
                version BIGINT NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- The dedup gate's atomic admission relies on this index
            CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_content_hash
                ON documents(content_hash);
            CREATE INDEX IF NOT EXISTS idx_documents_status_created
                ON documents(status, created_at);
            CREATE INDEX IF NOT EXISTS idx_documents_review_created
                ON documents(review_status, created_at);

            -- Per-branch extraction slices, keyed by section; run_token marks
            -- which run wrote the slice
            CREATE TABLE IF NOT EXISTS extraction_sections (
                document_id TEXT NOT NULL,
                section TEXT NOT NULL,
                run_token TEXT NOT NULL,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (document_id, section)
            );

            -- Append-only event log
            CREATE TABLE IF NOT EXISTS processing_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id TEXT NOT NULL,
                run_token TEXT,
                kind TEXT NOT NULL,
                stage TEXT,
                task TEXT,
                total_tasks INTEGER,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_document
                ON processing_events(document_id, id);
            "#,
        )
        .await?;
        Ok(())
    }
}
