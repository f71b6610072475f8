//! Diesel ORM records for database tables.
//!
//! Records hold raw column values (timestamps as RFC 3339 text, JSON as
//! text) and convert to and from the domain models at the repository
//! boundary.

use diesel::prelude::*;

use crate::models::{
    Document, DocumentStatus, EventKind, FailureKind, ProcessingEvent, ReviewStatus, RunFailure,
    Stage,
};
use crate::repository::{parse_datetime, parse_datetime_opt};
use crate::schema;

use super::pool::DieselError;

fn bad_column(what: &str, value: &str) -> DieselError {
    DieselError::DeserializationError(format!("unrecognized {what}: {value}").into())
}

/// Document row from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::documents)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DocumentRecord {
    pub id: String,
    pub content_hash: String,
    pub document_type: Option<String>,
    pub status: String,
    pub review_status: Option<String>,
    pub original_filename: Option<String>,
    pub mime_type: String,
    pub file_size: i64,
    pub storage_path: String,
    pub classification: Option<String>,
    pub extracted_data: Option<String>,
    pub error_state: Option<String>,
    pub error_kind: Option<String>,
    pub error_cause: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
    pub review_notes: Option<String>,
    pub run_token: Option<String>,
    pub last_run_token: Option<String>,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl DocumentRecord {
    /// Convert a row into the domain model.
    pub fn into_domain(self) -> Result<Document, DieselError> {
        let status =
            DocumentStatus::parse(&self.status).ok_or_else(|| bad_column("status", &self.status))?;
        let review_status = match self.review_status.as_deref() {
            Some(s) => Some(ReviewStatus::parse(s).ok_or_else(|| bad_column("review status", s))?),
            None => None,
        };
        let classification = match self.classification.as_deref() {
            Some(raw) => Some(
                serde_json::from_str(raw)
                    .map_err(|e| DieselError::DeserializationError(Box::new(e)))?,
            ),
            None => None,
        };
        let extracted_data = match self.extracted_data.as_deref() {
            Some(raw) => Some(
                serde_json::from_str(raw)
                    .map_err(|e| DieselError::DeserializationError(Box::new(e)))?,
            ),
            None => None,
        };
        let failure = match (self.error_state, self.error_kind, self.error_cause) {
            (Some(state), Some(kind), cause) => Some(RunFailure {
                state,
                kind: FailureKind::parse(&kind).ok_or_else(|| bad_column("failure kind", &kind))?,
                cause: cause.unwrap_or_default(),
            }),
            _ => None,
        };

        Ok(Document {
            id: self.id,
            content_hash: self.content_hash,
            document_type: self.document_type,
            status,
            review_status,
            original_filename: self.original_filename,
            mime_type: self.mime_type,
            file_size: self.file_size.max(0) as u64,
            storage_path: self.storage_path,
            classification,
            extracted_data,
            failure,
            reviewed_by: self.reviewed_by,
            reviewed_at: parse_datetime_opt(self.reviewed_at),
            review_notes: self.review_notes,
            run_token: self.run_token,
            last_run_token: self.last_run_token,
            version: self.version,
            created_at: parse_datetime(&self.created_at),
            updated_at: parse_datetime(&self.updated_at),
        })
    }
}

/// New document for insertion (admission).
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::documents)]
pub struct NewDocument<'a> {
    pub id: &'a str,
    pub content_hash: &'a str,
    pub status: &'a str,
    pub original_filename: Option<&'a str>,
    pub mime_type: &'a str,
    pub file_size: i64,
    pub storage_path: &'a str,
    pub version: i64,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Extraction section row.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::extraction_sections)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SectionRecord {
    pub document_id: String,
    pub section: String,
    pub run_token: String,
    pub payload: String,
    pub updated_at: String,
}

/// New section slice for upsert.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::extraction_sections)]
pub struct NewSection<'a> {
    pub document_id: &'a str,
    pub section: &'a str,
    pub run_token: &'a str,
    pub payload: &'a str,
    pub updated_at: &'a str,
}

/// Processing event row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::processing_events)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EventRecord {
    pub id: i64,
    pub document_id: String,
    pub run_token: Option<String>,
    pub kind: String,
    pub stage: Option<String>,
    pub task: Option<String>,
    pub total_tasks: Option<i32>,
    pub message: String,
    pub created_at: String,
}

impl EventRecord {
    pub fn into_domain(self) -> Result<ProcessingEvent, DieselError> {
        let kind = EventKind::parse(&self.kind).ok_or_else(|| bad_column("event kind", &self.kind))?;
        let stage = match self.stage.as_deref() {
            Some(s) => Some(Stage::parse(s).ok_or_else(|| bad_column("stage", s))?),
            None => None,
        };
        Ok(ProcessingEvent {
            id: self.id,
            document_id: self.document_id,
            run_token: self.run_token,
            kind,
            stage,
            task: self.task,
            total_tasks: self.total_tasks.map(|t| t.max(0) as u32),
            message: self.message,
            created_at: parse_datetime(&self.created_at),
        })
    }
}

/// New event for append.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::processing_events)]
pub struct NewEvent<'a> {
    pub document_id: &'a str,
    pub run_token: Option<&'a str>,
    pub kind: &'a str,
    pub stage: Option<&'a str>,
    pub task: Option<&'a str>,
    pub total_tasks: Option<i32>,
    pub message: &'a str,
    pub created_at: &'a str,
}
