//! Review queue endpoints and approve/reject transitions.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::models::ReviewStatus;

use super::super::AppState;
use super::types::{error_response, review_error_response, DocumentPayload};

#[derive(Debug, Deserialize)]
pub struct ReviewQuery {
    /// Review status filter; defaults to the pending queue.
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReviewQueuePage {
    documents: Vec<DocumentPayload>,
    count: usize,
}

/// GET /review - the review queue, oldest first.
pub async fn review_queue(
    State(state): State<AppState>,
    Query(params): Query<ReviewQuery>,
) -> Response {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let status = params
        .status
        .as_deref()
        .unwrap_or(ReviewStatus::PendingReview.as_str());
    if ReviewStatus::parse(status).is_none() {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("unrecognized review status: {status}"),
            None,
        );
    }

    match state.repo.list_by_review_status(status, limit).await {
        Ok(documents) => {
            let payloads: Vec<DocumentPayload> = documents.into_iter().map(Into::into).collect();
            Json(ReviewQueuePage {
                count: payloads.len(),
                documents: payloads,
            })
            .into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), None),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReviewDetail {
    document: DocumentPayload,
    /// Full event history: all runs plus review actions.
    events: Vec<ReviewDetailEvent>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReviewDetailEvent {
    kind: String,
    stage: Option<String>,
    message: String,
    created_at: String,
}

/// GET /review/{id} - single-document review payload.
pub async fn review_detail(State(state): State<AppState>, Path(doc_id): Path<String>) -> Response {
    let doc = match state.repo.get(&doc_id).await {
        Ok(Some(doc)) => doc,
        Ok(None) => {
            return error_response(StatusCode::NOT_FOUND, "document not found", Some(&doc_id))
        }
        Err(e) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), Some(&doc_id))
        }
    };

    let events = match state.repo.events_for(&doc_id).await {
        Ok(events) => events,
        Err(e) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), Some(&doc_id))
        }
    };

    Json(ReviewDetail {
        document: doc.into(),
        events: events
            .into_iter()
            .map(|e| ReviewDetailEvent {
                kind: e.kind.as_str().to_string(),
                stage: e.stage.map(|s| s.as_str().to_string()),
                message: e.message,
                created_at: e.created_at.to_rfc3339(),
            })
            .collect(),
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    pub reviewed_by: String,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentEnvelope {
    document: DocumentPayload,
}

/// POST /review/{id}/approve.
pub async fn approve_document(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
    Json(request): Json<ApproveRequest>,
) -> Response {
    match state
        .review
        .approve(&doc_id, &request.reviewed_by, request.notes.as_deref())
        .await
    {
        Ok(doc) => Json(DocumentEnvelope {
            document: doc.into(),
        })
        .into_response(),
        Err(e) => review_error_response(e, &doc_id),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectRequest {
    pub reviewed_by: String,
    /// Rejection reason; must be non-empty.
    pub notes: String,
}

/// POST /review/{id}/reject.
pub async fn reject_document(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
    Json(request): Json<RejectRequest>,
) -> Response {
    match state
        .review
        .reject(&doc_id, &request.reviewed_by, &request.notes)
        .await
    {
        Ok(doc) => Json(DocumentEnvelope {
            document: doc.into(),
        })
        .into_response(),
        Err(e) => review_error_response(e, &doc_id),
    }
}
