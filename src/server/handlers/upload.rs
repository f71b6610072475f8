//! Upload endpoints: ticket issuance, the direct PUT, and signed file
//! serving.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::services::IngestOutcome;
use crate::storage::TokenError;

use super::super::AppState;
use super::types::{error_response, ingest_error_response};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadTicketResponse {
    document_id: String,
    upload_url: String,
    fields: std::collections::BTreeMap<String, String>,
    key: String,
    expires_in: u64,
}

/// POST /upload - pre-authorize a direct object upload.
pub async fn create_upload(State(state): State<AppState>) -> impl IntoResponse {
    let ticket = state.ingest.issue_ticket();
    Json(UploadTicketResponse {
        document_id: ticket.document_id,
        upload_url: ticket.upload_url,
        fields: ticket.fields,
        key: ticket.key,
        expires_in: ticket.expires_in,
    })
}

#[derive(Debug, Deserialize)]
pub struct PutUploadQuery {
    /// Original filename, for display purposes.
    pub filename: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResult {
    document_id: String,
    outcome: &'static str,
}

/// PUT /upload/{token} - receive the raw bytes for a ticket.
///
/// Verifies the ticket, stores the bytes, runs the dedup gate, and starts a
/// pipeline run for admitted PDFs.
pub async fn put_upload(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(params): Query<PutUploadQuery>,
    body: Bytes,
) -> Response {
    match state
        .ingest
        .receive_upload(&token, params.filename.as_deref(), &body)
        .await
    {
        Ok(IngestOutcome::Started { document_id }) => Json(UploadResult {
            document_id,
            outcome: "started",
        })
        .into_response(),
        Ok(IngestOutcome::Duplicate { existing_id }) => Json(UploadResult {
            document_id: existing_id,
            outcome: "duplicate",
        })
        .into_response(),
        Ok(IngestOutcome::Skipped { document_id }) => Json(UploadResult {
            document_id,
            outcome: "skipped",
        })
        .into_response(),
        Err(e) => ingest_error_response(e),
    }
}

/// GET /files/{token} - serve a stored object through a signed link.
pub async fn serve_file(State(state): State<AppState>, Path(token): Path<String>) -> Response {
    let key = match state.store.verify_download(&token, Utc::now()) {
        Ok(key) => key,
        Err(TokenError::Expired) => {
            return error_response(StatusCode::FORBIDDEN, "download link expired", None)
        }
        Err(_) => return error_response(StatusCode::FORBIDDEN, "invalid download link", None),
    };

    match state.store.get(&key) {
        Ok(content) => {
            let mime = mime_guess::from_path(&key).first_or_octet_stream();
            ([(header::CONTENT_TYPE, mime.to_string())], content).into_response()
        }
        Err(_) => error_response(StatusCode::NOT_FOUND, "object not found", None),
    }
}
