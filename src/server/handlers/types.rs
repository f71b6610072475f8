//! Shared request/response shapes for the JSON API.
//!
//! Wire keys are camelCase; enum values stay snake_case strings.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Classification, Document, DocumentStatus, ReviewStatus};
use crate::services::{IngestError, ReviewError};

/// Document as exposed over the API.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPayload {
    pub document_id: String,
    pub content_hash: String,
    pub document_type: Option<String>,
    pub status: DocumentStatus,
    pub review_status: Option<ReviewStatus>,
    pub original_filename: Option<String>,
    pub mime_type: String,
    pub file_size: u64,
    pub classification: Option<Classification>,
    pub extracted_data: Option<serde_json::Value>,
    pub error_state: Option<String>,
    pub error_kind: Option<String>,
    pub error_cause: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Document> for DocumentPayload {
    fn from(doc: Document) -> Self {
        let (error_state, error_kind, error_cause) = match doc.failure {
            Some(failure) => (
                Some(failure.state),
                Some(failure.kind.as_str().to_string()),
                Some(failure.cause),
            ),
            None => (None, None, None),
        };
        Self {
            document_id: doc.id,
            content_hash: doc.content_hash,
            document_type: doc.document_type,
            status: doc.status,
            review_status: doc.review_status,
            original_filename: doc.original_filename,
            mime_type: doc.mime_type,
            file_size: doc.file_size,
            classification: doc.classification,
            extracted_data: doc.extracted_data,
            error_state,
            error_kind,
            error_cause,
            reviewed_by: doc.reviewed_by,
            reviewed_at: doc.reviewed_at,
            review_notes: doc.review_notes,
            version: doc.version,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }
    }
}

/// Standard error envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

/// Build a JSON error response.
pub fn error_response(
    status: StatusCode,
    error: impl Into<String>,
    document_id: Option<&str>,
) -> Response {
    (
        status,
        Json(ErrorBody {
            error: error.into(),
            document_id: document_id.map(String::from),
        }),
    )
        .into_response()
}

/// Map review-workflow errors onto the HTTP surface. Invalid transitions and
/// conflicts are surfaced synchronously and persist nothing.
pub fn review_error_response(e: ReviewError, document_id: &str) -> Response {
    let (status, message) = match &e {
        ReviewError::NotFound => (StatusCode::NOT_FOUND, e.to_string()),
        ReviewError::InvalidTransition { .. } => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
        ReviewError::MissingReason => (StatusCode::BAD_REQUEST, e.to_string()),
        ReviewError::Conflict => (StatusCode::CONFLICT, e.to_string()),
        ReviewError::Pipeline(p) => return pipeline_error_response(p, Some(document_id)),
        ReviewError::Db(_) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    error_response(status, message, Some(document_id))
}

fn pipeline_error_response(
    e: &crate::pipeline::PipelineError,
    document_id: Option<&str>,
) -> Response {
    use crate::pipeline::PipelineError;
    let status = match e {
        PipelineError::NotFound => StatusCode::NOT_FOUND,
        PipelineError::ConcurrentRunConflict => StatusCode::CONFLICT,
        PipelineError::NotEligible { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e.to_string(), document_id)
}

/// Map ingestion errors onto the HTTP surface.
pub fn ingest_error_response(e: IngestError) -> Response {
    let status = match &e {
        IngestError::Ticket(_) => StatusCode::FORBIDDEN,
        IngestError::Admission(_) => StatusCode::SERVICE_UNAVAILABLE,
        IngestError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        IngestError::Pipeline(p) => {
            return pipeline_error_response(p, None);
        }
    };
    error_response(status, e.to_string(), None)
}
