//! Router configuration for the API server.

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Upload flow
        .route("/upload", post(handlers::create_upload))
        .route("/upload/:token", put(handlers::put_upload))
        .route("/files/:token", get(handlers::serve_file))
        // Documents
        .route("/documents", get(handlers::list_documents))
        .route("/documents/:doc_id", get(handlers::get_document))
        .route(
            "/documents/:doc_id/status",
            get(handlers::get_document_status),
        )
        .route("/documents/:doc_id/pdf", get(handlers::get_document_pdf))
        .route("/documents/:doc_id/fields", put(handlers::correct_fields))
        .route(
            "/documents/:doc_id/reprocess",
            post(handlers::reprocess_document),
        )
        // Review workflow
        .route("/review", get(handlers::review_queue))
        .route("/review/:doc_id", get(handlers::review_detail))
        .route("/review/:doc_id/approve", post(handlers::approve_document))
        .route("/review/:doc_id/reject", post(handlers::reject_document))
        // Aggregates
        .route("/metrics", get(handlers::metrics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
