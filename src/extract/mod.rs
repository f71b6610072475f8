//! External extraction collaborators.
//!
//! Classification, section extraction, and normalization are remote black
//! boxes. The orchestrator only depends on these traits; the HTTP client in
//! `http` is the production implementation and tests substitute their own.

mod http;

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::Classification;

pub use http::HttpExtractionClient;

/// Failure of a single collaborator call.
///
/// Transient errors (timeouts, throttling, connectivity) are retried inside
/// the stage; fatal errors promote straight to the run's catch edge.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl TaskError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Classifies a stored document into a configured type.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, document_id: &str, key: &str) -> Result<Classification, TaskError>;
}

/// Extracts one section's fields from a stored document.
#[async_trait]
pub trait SectionExtractor: Send + Sync {
    async fn extract_section(
        &self,
        document_id: &str,
        key: &str,
        section: &str,
        pages: &[u32],
    ) -> Result<serde_json::Value, TaskError>;
}

/// Normalizes the union of extracted section slices into the final payload.
#[async_trait]
pub trait Normalizer: Send + Sync {
    async fn normalize(
        &self,
        document_id: &str,
        document_type: &str,
        sections: &serde_json::Value,
    ) -> Result<serde_json::Value, TaskError>;
}

/// The full set of collaborators the orchestrator needs.
#[derive(Clone)]
pub struct ExtractionStack {
    pub classifier: Arc<dyn Classifier>,
    pub extractor: Arc<dyn SectionExtractor>,
    pub normalizer: Arc<dyn Normalizer>,
}

impl ExtractionStack {
    /// Production stack: one HTTP client backing all three collaborator
    /// roles.
    pub fn http(config: &crate::config::CollaboratorConfig) -> Self {
        let client = Arc::new(HttpExtractionClient::new(config));
        Self {
            classifier: client.clone(),
            extractor: client.clone(),
            normalizer: client,
        }
    }
}
