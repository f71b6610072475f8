//! Aggregate metrics projection (read-only).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::collections::HashMap;

use super::super::AppState;
use super::types::{error_response, DocumentPayload};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricsBody {
    status_counts: HashMap<String, u64>,
    total: u64,
    recent: Vec<DocumentPayload>,
}

/// GET /metrics - status counts plus recent documents.
pub async fn metrics(State(state): State<AppState>) -> Response {
    let status_counts = match state.repo.count_by_status().await {
        Ok(counts) => counts,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), None),
    };
    let recent = match state.repo.recent(10).await {
        Ok(docs) => docs,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), None),
    };

    let total = status_counts.values().sum();
    Json(MetricsBody {
        status_counts,
        total,
        recent: recent.into_iter().map(Into::into).collect(),
    })
    .into_response()
}
