//! Document listing, detail, status feed, corrections, and reprocessing.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::models::{DocumentStatus, Stage, StageSet};
use crate::services::StatusFeed;

use super::super::AppState;
use super::types::{error_response, review_error_response, DocumentPayload};

/// Query parameters for document listing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentsQuery {
    /// Filter by pipeline status.
    pub status: Option<String>,
    /// Page size (default 50, max 200).
    pub limit: Option<i64>,
    /// Opaque keyset cursor from the previous page.
    pub last_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentsPage {
    documents: Vec<DocumentPayload>,
    count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_key: Option<String>,
}

fn encode_cursor(created_at: &str, id: &str) -> String {
    URL_SAFE_NO_PAD.encode(format!("{created_at}|{id}"))
}

fn decode_cursor(raw: &str) -> Option<(String, String)> {
    let decoded = URL_SAFE_NO_PAD.decode(raw).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (created_at, id) = decoded.split_once('|')?;
    Some((created_at.to_string(), id.to_string()))
}

/// GET /documents - list with status filter and keyset pagination.
pub async fn list_documents(
    State(state): State<AppState>,
    Query(params): Query<DocumentsQuery>,
) -> Response {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);

    if let Some(status) = params.status.as_deref() {
        if DocumentStatus::parse(status).is_none() {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("unrecognized status filter: {status}"),
                None,
            );
        }
    }

    let cursor = match params.last_key.as_deref() {
        Some(raw) => match decode_cursor(raw) {
            Some(cursor) => Some(cursor),
            None => {
                return error_response(StatusCode::BAD_REQUEST, "malformed lastKey cursor", None)
            }
        },
        None => None,
    };

    let documents = match state
        .repo
        .list(
            params.status.as_deref(),
            limit,
            cursor.as_ref().map(|(c, i)| (c.as_str(), i.as_str())),
        )
        .await
    {
        Ok(documents) => documents,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), None),
    };

    let last_key = if documents.len() as i64 == limit {
        documents
            .last()
            .map(|doc| encode_cursor(&doc.created_at.to_rfc3339(), &doc.id))
    } else {
        None
    };

    let payloads: Vec<DocumentPayload> = documents.into_iter().map(Into::into).collect();
    Json(DocumentsPage {
        count: payloads.len(),
        documents: payloads,
        last_key,
    })
    .into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentEnvelope {
    document: DocumentPayload,
}

/// GET /documents/{id}.
pub async fn get_document(State(state): State<AppState>, Path(doc_id): Path<String>) -> Response {
    match state.repo.get(&doc_id).await {
        Ok(Some(doc)) => Json(DocumentEnvelope {
            document: doc.into(),
        })
        .into_response(),
        // Not yet materialized: the client keeps its optimistic placeholder.
        Ok(None) => error_response(StatusCode::NOT_FOUND, "document not found", Some(&doc_id)),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), Some(&doc_id)),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusFeedBody {
    document_type: Option<String>,
    stages: StageSet,
    events: Vec<StatusEventBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    started_at: Option<chrono::DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusEventBody {
    timestamp_offset: i64,
    stage: Option<Stage>,
    message: String,
}

impl From<StatusFeed> for StatusFeedBody {
    fn from(feed: StatusFeed) -> Self {
        Self {
            document_type: feed.document_type,
            stages: feed.stages,
            events: feed
                .events
                .into_iter()
                .map(|e| StatusEventBody {
                    timestamp_offset: e.timestamp_offset,
                    stage: e.stage,
                    message: e.message,
                })
                .collect(),
            started_at: feed.started_at,
        }
    }
}

/// GET /documents/{id}/status - the stage projection (recomputed per read).
pub async fn get_document_status(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Response {
    match state.status.get_status(&doc_id).await {
        Ok(Some(feed)) => Json(StatusFeedBody::from(feed)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "document not found", Some(&doc_id)),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), Some(&doc_id)),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PdfLink {
    pdf_url: String,
    expires_in: u64,
}

/// GET /documents/{id}/pdf - time-limited read link for the raw bytes.
pub async fn get_document_pdf(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Response {
    let doc = match state.repo.get(&doc_id).await {
        Ok(Some(doc)) => doc,
        Ok(None) => {
            return error_response(StatusCode::NOT_FOUND, "document not found", Some(&doc_id))
        }
        Err(e) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), Some(&doc_id))
        }
    };

    let expires_in = state.download_ttl_seconds;
    let expires_at = Utc::now() + chrono::Duration::seconds(expires_in as i64);
    let token = state.store.sign_download(&doc.storage_path, expires_at);
    Json(PdfLink {
        pdf_url: format!("/files/{token}"),
        expires_in,
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionRequest {
    pub corrections: serde_json::Value,
    pub corrected_by: String,
    #[serde(default)]
    pub revalidate: bool,
}

/// PUT /documents/{id}/fields - field-level correction, optional
/// revalidation.
pub async fn correct_fields(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
    Json(request): Json<CorrectionRequest>,
) -> Response {
    match state
        .review
        .correct(
            &doc_id,
            &request.corrections,
            &request.corrected_by,
            request.revalidate,
        )
        .await
    {
        Ok(doc) => Json(DocumentEnvelope {
            document: doc.into(),
        })
        .into_response(),
        Err(e) => review_error_response(e, &doc_id),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ReprocessRequest {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReprocessResponse {
    document_id: String,
    status: &'static str,
}

/// POST /documents/{id}/reprocess.
pub async fn reprocess_document(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
    request: Option<Json<ReprocessRequest>>,
) -> Response {
    let force = request.map(|Json(r)| r.force).unwrap_or(false);
    match state.review.reprocess(&doc_id, force).await {
        Ok(_token) => Json(ReprocessResponse {
            document_id: doc_id,
            status: "reprocessing",
        })
        .into_response(),
        Err(e) => review_error_response(e, &doc_id),
    }
}
