//! Ingestion: upload tickets, the dedup gate, and pipeline kickoff.
//!
//! Uploads land in the object store first, then pass through content-hash
//! admission. Admission failures are retried with bounded backoff; if they
//! persist, the stored object is left orphaned for operator cleanup rather
//! than deleted (there is no automatic orphan GC).

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::AdmissionConfig;
use crate::models::{compute_content_hash, DocumentStatus};
use crate::pipeline::{Orchestrator, PipelineError};
use crate::repository::{Admission, AdmissionParams, DocumentRepository};
use crate::storage::{detect_mime, is_pdf, ObjectStore, TokenError};

/// Pre-authorization for one direct upload.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UploadTicket {
    pub document_id: String,
    pub key: String,
    pub upload_url: String,
    pub fields: BTreeMap<String, String>,
    pub expires_in: u64,
}

/// Result of ingesting uploaded bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Admitted; a pipeline run is underway.
    Started { document_id: String },
    /// The content hash already belongs to a live document; no new run.
    Duplicate { existing_id: String },
    /// Content failed PDF verification; recorded terminally, never piped.
    Skipped { document_id: String },
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("upload ticket rejected: {0}")]
    Ticket(#[from] TokenError),
    #[error("admission failed after retries: {0}")]
    Admission(String),
    #[error("object store error: {0}")]
    Storage(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Upload and admission service.
#[derive(Clone)]
pub struct IngestService {
    repo: DocumentRepository,
    store: ObjectStore,
    orchestrator: Orchestrator,
    admission: AdmissionConfig,
    upload_ttl_seconds: u64,
}

impl IngestService {
    pub fn new(
        repo: DocumentRepository,
        store: ObjectStore,
        orchestrator: Orchestrator,
        admission: AdmissionConfig,
        upload_ttl_seconds: u64,
    ) -> Self {
        Self {
            repo,
            store,
            orchestrator,
            admission,
            upload_ttl_seconds,
        }
    }

    /// Issue a signed, time-limited upload ticket.
    pub fn issue_ticket(&self) -> UploadTicket {
        let document_id = uuid::Uuid::new_v4().to_string();
        let key = ObjectStore::incoming_key(&document_id);
        let expires_at = Utc::now() + chrono::Duration::seconds(self.upload_ttl_seconds as i64);
        let token = self.store.sign_upload(&document_id, &key, expires_at);

        let mut fields = BTreeMap::new();
        fields.insert("key".to_string(), key.clone());
        fields.insert("document_id".to_string(), document_id.clone());

        UploadTicket {
            document_id,
            key,
            upload_url: format!("/upload/{token}"),
            fields,
            expires_in: self.upload_ttl_seconds,
        }
    }

    /// Handle the direct PUT against a ticket.
    pub async fn receive_upload(
        &self,
        token: &str,
        file_name: Option<&str>,
        content: &[u8],
    ) -> Result<IngestOutcome, IngestError> {
        let (document_id, key) = self.store.verify_upload(token, Utc::now())?;
        self.ingest_bytes(&document_id, &key, file_name, content)
            .await
    }

    /// Ingest a local file (CLI path, no ticket involved).
    pub async fn ingest_file(&self, path: &Path) -> Result<IngestOutcome, IngestError> {
        let content = std::fs::read(path).map_err(|e| IngestError::Storage(e.to_string()))?;
        let file_name = path.file_name().and_then(|n| n.to_str());
        let document_id = uuid::Uuid::new_v4().to_string();
        let key = ObjectStore::incoming_key(&document_id);
        self.ingest_bytes(&document_id, &key, file_name, &content)
            .await
    }

    /// Store bytes, run the dedup gate, and start a run if admitted.
    async fn ingest_bytes(
        &self,
        document_id: &str,
        key: &str,
        file_name: Option<&str>,
        content: &[u8],
    ) -> Result<IngestOutcome, IngestError> {
        let content_hash = compute_content_hash(content);
        let pdf = is_pdf(content);
        let mime_type = detect_mime(content);

        // Bytes land before admission; a persistent admission failure leaves
        // them orphaned under the incoming prefix.
        self.store
            .put(key, content)
            .map_err(|e| IngestError::Storage(e.to_string()))?;

        let initial_status = if pdf {
            DocumentStatus::Pending
        } else {
            DocumentStatus::Skipped
        };

        let admission = self
            .admit_with_backoff(AdmissionParams {
                document_id,
                content_hash: &content_hash,
                original_filename: file_name,
                mime_type,
                file_size: content.len() as u64,
                storage_path: key,
                initial_status,
            })
            .await?;

        match admission {
            Admission::Admitted { document_id } if pdf => {
                info!(document_id = %document_id, "document admitted, starting run");
                self.orchestrator.start_initial_run(&document_id).await?;
                Ok(IngestOutcome::Started { document_id })
            }
            Admission::Admitted { document_id } => {
                info!(document_id = %document_id, mime_type, "non-PDF upload recorded as skipped");
                Ok(IngestOutcome::Skipped { document_id })
            }
            Admission::Duplicate { existing_id } => {
                info!(existing_id = %existing_id, "duplicate upload short-circuited");
                Ok(IngestOutcome::Duplicate { existing_id })
            }
        }
    }

    /// The ingestion trigger's bounded-backoff retry around the dedup gate.
    async fn admit_with_backoff(
        &self,
        params: AdmissionParams<'_>,
    ) -> Result<Admission, IngestError> {
        let attempts = self.admission.max_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.repo.admit(params.clone()).await {
                Ok(admission) => return Ok(admission),
                Err(e) => {
                    warn!(attempt, error = %e, "dedup gate admission error");
                    last_error = e.to_string();
                }
            }
            if attempt < attempts {
                let delay = self.admission.base_delay_ms.saturating_mul(1 << (attempt - 1));
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
        Err(IngestError::Admission(last_error))
    }
}
