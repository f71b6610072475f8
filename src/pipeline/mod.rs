//! Pipeline orchestrator.
//!
//! One state-machine run per admitted document: classification → type
//! choice → parallel section extraction → normalization → terminal state.
//! Runs execute as spawned tasks and suspend on collaborator calls; mutual
//! exclusion across runs is enforced by the run-ownership token on the
//! document row, claimed with a conditional write before anything executes.

mod retry;
mod run;
mod state;

use std::sync::Arc;

use tracing::info;

use crate::config::PipelineConfig;
use crate::extract::ExtractionStack;
use crate::models::Document;
use crate::repository::{DieselError, DocumentRepository};
use crate::storage::ObjectStore;

use run::{execute_run, RunParams};

pub use retry::{delay_for, retry_task};
pub use state::{advance, RunState, StageOutcome};

/// Errors from starting a run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("document not found")]
    NotFound,
    #[error("a run is already active for this document")]
    ConcurrentRunConflict,
    #[error("document status '{status}' does not permit a run")]
    NotEligible { status: String },
    #[error(transparent)]
    Db(#[from] DieselError),
}

/// Shared state for run execution.
pub(crate) struct Inner {
    pub repo: DocumentRepository,
    pub store: ObjectStore,
    pub stack: ExtractionStack,
    pub config: PipelineConfig,
}

/// Starts and supervises pipeline runs.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        repo: DocumentRepository,
        store: ObjectStore,
        stack: ExtractionStack,
        config: PipelineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                repo,
                store,
                stack,
                config,
            }),
        }
    }

    /// Mint a run-ownership token. The hostname makes tokens traceable to
    /// the claiming process in multi-worker deployments.
    pub fn new_run_token() -> String {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        format!("{host}-{}", uuid::Uuid::new_v4())
    }

    /// Start the first run for a freshly admitted document.
    pub async fn start_initial_run(&self, document_id: &str) -> Result<String, PipelineError> {
        let token = Self::new_run_token();
        if !self
            .inner
            .repo
            .claim_initial_run(document_id, &token)
            .await?
        {
            return Err(self.resolve_claim_failure(document_id).await?);
        }

        let doc = self
            .inner
            .repo
            .get(document_id)
            .await?
            .ok_or(PipelineError::NotFound)?;
        self.spawn_run(&doc, token.clone());
        Ok(token)
    }

    /// Restart the pipeline for an existing document.
    ///
    /// Reprocessing bypasses the dedup gate by construction (it never
    /// re-admits) and the fresh run token makes any late writes from the
    /// prior run land dead.
    pub async fn start_reprocess_run(&self, document_id: &str) -> Result<String, PipelineError> {
        let token = Self::new_run_token();
        if !self
            .inner
            .repo
            .claim_reprocess_run(document_id, &token)
            .await?
        {
            return Err(self.resolve_claim_failure(document_id).await?);
        }

        let doc = self
            .inner
            .repo
            .get(document_id)
            .await?
            .ok_or(PipelineError::NotFound)?;
        self.spawn_run(&doc, token.clone());
        Ok(token)
    }

    /// Distinguish why a claim was rejected: missing row, active run, or an
    /// ineligible status.
    async fn resolve_claim_failure(&self, document_id: &str) -> Result<PipelineError, DieselError> {
        match self.inner.repo.get(document_id).await? {
            None => Ok(PipelineError::NotFound),
            Some(doc) if doc.run_token.is_some() => Ok(PipelineError::ConcurrentRunConflict),
            Some(doc) => Ok(PipelineError::NotEligible {
                status: doc.status.as_str().to_string(),
            }),
        }
    }

    fn spawn_run(&self, doc: &Document, token: String) {
        info!(document_id = %doc.id, token = %token, "starting pipeline run");
        let params = RunParams {
            document_id: doc.id.clone(),
            token,
            storage_key: doc.storage_path.clone(),
            content_hash: doc.content_hash.clone(),
        };
        let inner = self.inner.clone();
        tokio::spawn(async move {
            execute_run(inner, params).await;
        });
    }
}
