//! Document model for the extraction pipeline.
//!
//! A document is the single source of truth for pipeline status, review
//! status, extracted data, and run ownership. Pipeline status and review
//! status are independent axes: review transitions only ever apply on top of
//! terminal pipeline states.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Pipeline lifecycle status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Classified,
    Extracting,
    Extracted,
    Normalizing,
    Processed,
    Reprocessing,
    Failed,
    Skipped,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Classified => "classified",
            Self::Extracting => "extracting",
            Self::Extracted => "extracted",
            Self::Normalizing => "normalizing",
            Self::Processed => "processed",
            Self::Reprocessing => "reprocessing",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "classified" => Some(Self::Classified),
            "extracting" => Some(Self::Extracting),
            "extracted" => Some(Self::Extracted),
            "normalizing" => Some(Self::Normalizing),
            "processed" => Some(Self::Processed),
            "reprocessing" => Some(Self::Reprocessing),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Terminal states: no run is or will be active without operator action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Failed | Self::Skipped)
    }

    /// A run is actively moving this document through the pipeline.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Pending
                | Self::Classified
                | Self::Extracting
                | Self::Extracted
                | Self::Normalizing
                | Self::Reprocessing
        )
    }
}

/// Human review status, orthogonal to pipeline status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    PendingReview,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingReview => "pending_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_review" => Some(Self::PendingReview),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Classification result written by the classify stage.
///
/// `page_targets` maps section names to the page numbers the extractor should
/// read for that section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub document_type: String,
    pub confidence: f32,
    #[serde(default)]
    pub page_targets: BTreeMap<String, Vec<u32>>,
}

impl Classification {
    /// The unknown-type detection rule.
    ///
    /// Used on both sides of the wire: the orchestrator applies it to decide
    /// whether to terminate a run, and the dashboard applies it to decide
    /// which follow-up action to offer for a failed document.
    pub fn is_unknown_type(&self, min_confidence: f32) -> bool {
        self.document_type.is_empty()
            || self.document_type == "unknown"
            || self.confidence < min_confidence
    }
}

/// Why a run failed, beyond the prose cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Classification succeeded but the type was unknown or low-confidence.
    UnknownType,
    /// A stage task failed fatally (including retry exhaustion).
    Stage,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownType => "unknown_type",
            Self::Stage => "stage",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unknown_type" => Some(Self::UnknownType),
            "stage" => Some(Self::Stage),
            _ => None,
        }
    }
}

/// Failure captured by the orchestrator's catch edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    /// The state the run was in when it failed (e.g. "classify", "extract").
    pub state: String,
    pub kind: FailureKind,
    pub cause: String,
}

/// A financial document moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier, immutable.
    pub id: String,
    /// SHA-256 hex digest of the raw uploaded bytes, immutable.
    pub content_hash: String,
    /// Document type id, set by classification. Types are plugins configured
    /// at deploy time, so this is an open string rather than an enum.
    pub document_type: Option<String>,
    pub status: DocumentStatus,
    pub review_status: Option<ReviewStatus>,
    /// Filename provided at upload time.
    pub original_filename: Option<String>,
    pub mime_type: String,
    pub file_size: u64,
    /// Object-store key of the raw uploaded bytes.
    pub storage_path: String,
    /// Classification outcome of the latest run.
    pub classification: Option<Classification>,
    /// Normalized payload, written by normalization and replaced wholesale by
    /// correction or reprocessing.
    pub extracted_data: Option<serde_json::Value>,
    pub failure: Option<RunFailure>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    /// Ownership token of the active run; None when no run is in flight.
    pub run_token: Option<String>,
    /// Token of the most recent run, kept for status projections.
    pub last_run_token: Option<String>,
    /// Monotonic counter; every mutation increments it.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Whether a reprocess request is permitted from the current state.
    ///
    /// Reprocessing re-enters the pipeline from FAILED, PROCESSED, or
    /// REJECTED; a processed document that has not been rejected requires the
    /// explicit force flag.
    pub fn reprocess_allowed(&self, force: bool) -> bool {
        match self.status {
            DocumentStatus::Failed => true,
            DocumentStatus::Processed => {
                force || self.review_status == Some(ReviewStatus::Rejected)
            }
            _ => false,
        }
    }
}

/// Compute the SHA-256 content hash of raw document bytes.
pub fn compute_content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
