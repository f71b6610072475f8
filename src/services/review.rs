//! Human review workflow: approve, reject, correct, reprocess.
//!
//! Transitions operate on the review axis, orthogonal to pipeline status.
//! Every transition is guarded against the current state (disallowed ones
//! return `InvalidTransition` with no side effects) and applied as a
//! version-conditioned write, retried a bounded number of times when a
//! concurrent update moves the version underneath us.

use tracing::info;

use crate::config::PipelineConfig;
use crate::models::{Document, EventKind, ReviewStatus};
use crate::pipeline::{Orchestrator, PipelineError};
use crate::repository::{DieselError, DocumentRepository};

/// Attempts before giving up on a version-conditioned write.
const WRITE_ATTEMPTS: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("transition '{action}' is not permitted from the current state")]
    InvalidTransition { action: &'static str },
    #[error("document not found")]
    NotFound,
    #[error("rejection requires a non-empty reason")]
    MissingReason,
    #[error("a concurrent update kept winning; try again")]
    Conflict,
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Db(#[from] DieselError),
}

/// Review workflow service.
#[derive(Clone)]
pub struct ReviewService {
    repo: DocumentRepository,
    orchestrator: Orchestrator,
    pipeline: PipelineConfig,
}

impl ReviewService {
    pub fn new(
        repo: DocumentRepository,
        orchestrator: Orchestrator,
        pipeline: PipelineConfig,
    ) -> Self {
        Self {
            repo,
            orchestrator,
            pipeline,
        }
    }

    /// PENDING_REVIEW → APPROVED.
    pub async fn approve(
        &self,
        document_id: &str,
        reviewed_by: &str,
        notes: Option<&str>,
    ) -> Result<Document, ReviewError> {
        for _ in 0..WRITE_ATTEMPTS {
            let doc = self
                .repo
                .get(document_id)
                .await?
                .ok_or(ReviewError::NotFound)?;
            if doc.review_status != Some(ReviewStatus::PendingReview) {
                return Err(ReviewError::InvalidTransition { action: "approve" });
            }
            if self
                .repo
                .apply_review(document_id, doc.version, "approved", reviewed_by, notes)
                .await?
            {
                self.append_review_event(
                    document_id,
                    &format!("approved by {reviewed_by}"),
                )
                .await?;
                info!(document_id, reviewed_by, "document approved");
                return self.reload(document_id).await;
            }
        }
        Err(ReviewError::Conflict)
    }

    /// PENDING_REVIEW → REJECTED. Requires a non-empty reason.
    pub async fn reject(
        &self,
        document_id: &str,
        reviewed_by: &str,
        reason: &str,
    ) -> Result<Document, ReviewError> {
        if reason.trim().is_empty() {
            return Err(ReviewError::MissingReason);
        }
        for _ in 0..WRITE_ATTEMPTS {
            let doc = self
                .repo
                .get(document_id)
                .await?
                .ok_or(ReviewError::NotFound)?;
            if doc.review_status != Some(ReviewStatus::PendingReview) {
                return Err(ReviewError::InvalidTransition { action: "reject" });
            }
            if self
                .repo
                .apply_review(
                    document_id,
                    doc.version,
                    "rejected",
                    reviewed_by,
                    Some(reason),
                )
                .await?
            {
                self.append_review_event(
                    document_id,
                    &format!("rejected by {reviewed_by}: {reason}"),
                )
                .await?;
                info!(document_id, reviewed_by, "document rejected");
                return self.reload(document_id).await;
            }
        }
        Err(ReviewError::Conflict)
    }

    /// Apply a field-level patch to the extracted data.
    ///
    /// Permitted from any state. With `revalidate`, the patched payload is
    /// re-checked against the type's validation rules; review status only
    /// changes when validation dictates it.
    pub async fn correct(
        &self,
        document_id: &str,
        corrections: &serde_json::Value,
        corrected_by: &str,
        revalidate: bool,
    ) -> Result<Document, ReviewError> {
        for _ in 0..WRITE_ATTEMPTS {
            let doc = self
                .repo
                .get(document_id)
                .await?
                .ok_or(ReviewError::NotFound)?;

            let mut patched = doc
                .extracted_data
                .clone()
                .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
            merge_fields(&mut patched, corrections);

            let review_change = if revalidate {
                let missing = self
                    .pipeline
                    .missing_fields(doc.document_type.as_deref(), &patched);
                if missing.is_empty() {
                    None
                } else {
                    Some(Some("pending_review"))
                }
            } else {
                None
            };

            let patched_json =
                serde_json::to_string(&patched).map_err(|e| {
                    ReviewError::Db(DieselError::SerializationError(Box::new(e)))
                })?;
            if self
                .repo
                .apply_correction(document_id, doc.version, &patched_json, review_change)
                .await?
            {
                self.append_review_event(
                    document_id,
                    &format!("fields corrected by {corrected_by}"),
                )
                .await?;
                info!(document_id, corrected_by, revalidate, "fields corrected");
                return self.reload(document_id).await;
            }
        }
        Err(ReviewError::Conflict)
    }

    /// Restart the pipeline: REJECTED/FAILED freely, PROCESSED with force.
    pub async fn reprocess(&self, document_id: &str, force: bool) -> Result<String, ReviewError> {
        let doc = self
            .repo
            .get(document_id)
            .await?
            .ok_or(ReviewError::NotFound)?;
        if !doc.reprocess_allowed(force) {
            return Err(ReviewError::InvalidTransition {
                action: "reprocess",
            });
        }

        let token = self.orchestrator.start_reprocess_run(document_id).await?;
        self.append_review_event(document_id, "reprocess requested")
            .await?;
        Ok(token)
    }

    async fn append_review_event(
        &self,
        document_id: &str,
        message: &str,
    ) -> Result<(), DieselError> {
        self.repo
            .append_event(
                document_id,
                None,
                EventKind::Review.as_str(),
                None,
                None,
                None,
                message,
            )
            .await
    }

    async fn reload(&self, document_id: &str) -> Result<Document, ReviewError> {
        self.repo
            .get(document_id)
            .await?
            .ok_or(ReviewError::NotFound)
    }
}

/// Field-level JSON merge patch (RFC 7386 shape): objects merge per key,
/// null deletes, everything else replaces.
pub fn merge_fields(base: &mut serde_json::Value, patch: &serde_json::Value) {
    match patch {
        serde_json::Value::Object(patch_map) => {
            if !base.is_object() {
                *base = serde_json::Value::Object(Default::default());
            }
            let base_map = base.as_object_mut().expect("just ensured object");
            for (key, value) in patch_map {
                if value.is_null() {
                    base_map.remove(key);
                } else if value.is_object() {
                    let entry = base_map
                        .entry(key.clone())
                        .or_insert(serde_json::Value::Null);
                    merge_fields(entry, value);
                } else {
                    base_map.insert(key.clone(), value.clone());
                }
            }
        }
        other => *base = other.clone(),
    }
}
