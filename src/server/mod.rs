//! JSON API server for the document pipeline.
//!
//! Exposes upload pre-authorization, document listing/detail, the status
//! feed projection, the review workflow, and aggregate metrics. Handlers are
//! thin wrappers over the service layer.

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;

use crate::config::Settings;
use crate::extract::ExtractionStack;
use crate::pipeline::Orchestrator;
use crate::repository::DocumentRepository;
use crate::services::{IngestService, ReviewService, StatusService};
use crate::storage::ObjectStore;

/// Shared state for the API server.
#[derive(Clone)]
pub struct AppState {
    pub repo: DocumentRepository,
    pub store: ObjectStore,
    pub ingest: IngestService,
    pub review: ReviewService,
    pub status: StatusService,
    pub download_ttl_seconds: u64,
}

impl AppState {
    /// Build state from settings with the production (HTTP) collaborator
    /// stack.
    pub fn new(settings: &Settings) -> Self {
        let stack = ExtractionStack::http(&settings.collaborators);
        Self::with_stack(settings, stack)
    }

    /// Build state with an explicit collaborator stack (tests inject
    /// doubles here).
    pub fn with_stack(settings: &Settings, stack: ExtractionStack) -> Self {
        let ctx = settings.create_db_context();
        let repo = ctx.documents();
        let store = settings.object_store();
        let orchestrator = Orchestrator::new(
            repo.clone(),
            store.clone(),
            stack,
            settings.pipeline.clone(),
        );
        let ingest = IngestService::new(
            repo.clone(),
            store.clone(),
            orchestrator.clone(),
            settings.admission,
            settings.server.upload_ttl_seconds,
        );
        let review = ReviewService::new(repo.clone(), orchestrator, settings.pipeline.clone());
        let status = StatusService::new(repo.clone());

        Self {
            repo,
            store,
            ingest,
            review,
            status,
            download_ttl_seconds: settings.server.download_ttl_seconds,
        }
    }
}

/// Start the API server.
pub async fn serve(settings: &Settings, host: &str, port: u16) -> anyhow::Result<()> {
    let ctx = settings.create_db_context();
    ctx.init_schema().await?;

    let state = AppState::new(settings);
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!("Starting finpipe server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
