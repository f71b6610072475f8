//! Client reconciliation layer.
//!
//! Keeps a polling client's view of the work queue eventually consistent
//! with server-side progress: optimistic placeholders bridge the gap between
//! upload-accept and record creation, list polls reconcile them away,
//! attention buckets order the queue, and the poll cadence adapts to what is
//! actually in flight. Polling here is cooperative and sequential - one
//! cycle at a time per resource, so a poll in flight never overlaps the
//! next.

mod attention;
mod placeholders;
mod polling;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::PollingConfig;
use crate::models::{Classification, DocumentStatus, ReviewStatus, StageSet};

pub use attention::{
    attention_bucket, order_entries, BUCKET_FAILED, BUCKET_PENDING_REVIEW, BUCKET_PROCESSING,
    BUCKET_SETTLED,
};
pub use placeholders::{Placeholder, PlaceholderRegistry};
pub use polling::{next_poll_delay, should_keep_polling};

/// A document as returned by the server's list/detail endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDocument {
    pub document_id: String,
    pub status: DocumentStatus,
    #[serde(default)]
    pub review_status: Option<ReviewStatus>,
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub original_filename: Option<String>,
    #[serde(default)]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub classification: Option<Classification>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The follow-up action the client should offer for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestedAction {
    /// Generic failure: offer retry/reprocess.
    Reprocess,
    /// Unknown-type failure: offer creating a new document-type
    /// configuration, pre-filled with the low-confidence guess.
    ConfigureNewType,
    /// Awaiting a human decision.
    Review,
}

/// Decide which action to surface for a document.
///
/// For failed documents the server's recorded failure kind decides; when the
/// kind is absent (older records), the same unknown-type predicate the
/// server uses is applied to the returned classification, so both sides
/// always agree.
pub fn suggested_action(doc: &QueueDocument, min_confidence: f32) -> Option<SuggestedAction> {
    match doc.status {
        DocumentStatus::Failed => {
            let unknown = match doc.error_kind.as_deref() {
                Some(kind) => kind == "unknown_type",
                None => doc
                    .classification
                    .as_ref()
                    .map(|c| c.is_unknown_type(min_confidence))
                    .unwrap_or(false),
            };
            if unknown {
                Some(SuggestedAction::ConfigureNewType)
            } else {
                Some(SuggestedAction::Reprocess)
            }
        }
        _ if doc.review_status == Some(ReviewStatus::PendingReview) => {
            Some(SuggestedAction::Review)
        }
        _ => None,
    }
}

/// One row of the rendered work queue: a server document or an optimistic
/// placeholder.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub document_id: String,
    pub title: String,
    pub status: DocumentStatus,
    pub review_status: Option<ReviewStatus>,
    pub placeholder: bool,
    pub action: Option<SuggestedAction>,
    pub created_at: DateTime<Utc>,
}

/// Errors talking to the documents API.
#[derive(Debug, thiserror::Error)]
pub enum QueueApiError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// The slice of the server API the reconciliation layer needs.
#[async_trait]
pub trait QueueApi: Send + Sync {
    async fn list_documents(&self) -> Result<Vec<QueueDocument>, QueueApiError>;
    async fn get_document(&self, document_id: &str)
        -> Result<Option<QueueDocument>, QueueApiError>;
    async fn document_status(&self, document_id: &str) -> Result<StatusView, QueueApiError>;
}

/// The status-feed payload as seen by the client.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    #[serde(default)]
    pub document_type: Option<String>,
    pub stages: StageSet,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

/// reqwest-backed implementation of [`QueueApi`].
pub struct HttpQueueApi {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ListEnvelope {
    documents: Vec<QueueDocument>,
}

#[derive(Debug, Deserialize)]
struct DetailEnvelope {
    document: QueueDocument,
}

impl HttpQueueApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl QueueApi for HttpQueueApi {
    async fn list_documents(&self) -> Result<Vec<QueueDocument>, QueueApiError> {
        let url = format!("{}/documents?limit=100", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| QueueApiError::Request(e.to_string()))?;
        let envelope: ListEnvelope = response
            .error_for_status()
            .map_err(|e| QueueApiError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| QueueApiError::Decode(e.to_string()))?;
        Ok(envelope.documents)
    }

    async fn get_document(
        &self,
        document_id: &str,
    ) -> Result<Option<QueueDocument>, QueueApiError> {
        let url = format!("{}/documents/{document_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| QueueApiError::Request(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let envelope: DetailEnvelope = response
            .error_for_status()
            .map_err(|e| QueueApiError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| QueueApiError::Decode(e.to_string()))?;
        Ok(Some(envelope.document))
    }

    async fn document_status(&self, document_id: &str) -> Result<StatusView, QueueApiError> {
        let url = format!("{}/documents/{document_id}/status", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| QueueApiError::Request(e.to_string()))?;
        response
            .error_for_status()
            .map_err(|e| QueueApiError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| QueueApiError::Decode(e.to_string()))
    }
}

/// One reconciled view of the queue plus the scheduler's verdict on when to
/// look again.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub entries: Vec<QueueEntry>,
    pub next_delay: Duration,
}

/// The work queue: owns the placeholder registry and produces ordered
/// snapshots from list fetches.
pub struct WorkQueue<A: QueueApi + ?Sized> {
    api: std::sync::Arc<A>,
    placeholders: PlaceholderRegistry,
    polling: PollingConfig,
    min_confidence: f32,
}

impl<A: QueueApi + ?Sized> WorkQueue<A> {
    pub fn new(api: std::sync::Arc<A>, polling: PollingConfig, min_confidence: f32) -> Self {
        Self {
            api,
            placeholders: PlaceholderRegistry::new(polling.placeholder_ttl_seconds),
            polling,
            min_confidence,
        }
    }

    /// Record an accepted upload optimistically, before the server lists it.
    pub fn note_upload(&mut self, document_id: &str, file_name: Option<&str>, now: DateTime<Utc>) {
        self.placeholders.add(document_id, file_name, now);
    }

    /// Run one poll cycle: fetch, reconcile placeholders on this same cycle,
    /// order by attention, and compute the next delay.
    pub async fn refresh(&mut self, now: DateTime<Utc>) -> Result<QueueSnapshot, QueueApiError> {
        let documents = self.api.list_documents().await?;

        let server_ids: HashSet<&str> =
            documents.iter().map(|d| d.document_id.as_str()).collect();
        self.placeholders
            .resolve(server_ids.iter().copied(), now);

        let mut entries: Vec<QueueEntry> = documents
            .iter()
            .map(|doc| QueueEntry {
                document_id: doc.document_id.clone(),
                title: doc
                    .original_filename
                    .clone()
                    .unwrap_or_else(|| doc.document_id.clone()),
                status: doc.status,
                review_status: doc.review_status,
                placeholder: false,
                action: suggested_action(doc, self.min_confidence),
                created_at: doc.created_at,
            })
            .collect();
        for placeholder in self.placeholders.get_pending(now) {
            entries.push(QueueEntry {
                document_id: placeholder.document_id.clone(),
                title: placeholder
                    .file_name
                    .clone()
                    .unwrap_or_else(|| placeholder.document_id.clone()),
                status: DocumentStatus::Pending,
                review_status: None,
                placeholder: true,
                action: None,
                created_at: placeholder.inserted_at,
            });
        }
        order_entries(&mut entries);

        let next_delay = next_poll_delay(
            &self.polling,
            documents.iter().map(|d| d.status),
            self.placeholders.has_pending(now),
        );

        Ok(QueueSnapshot {
            entries,
            next_delay,
        })
    }

    /// Whether any placeholder is still unreconciled.
    pub fn has_pending_placeholder(&self, now: DateTime<Utc>) -> bool {
        self.placeholders.has_pending(now)
    }
}

/// Single-flight detail watcher: polls one document's record on a fixed
/// short interval and stops at any terminal status. Polls are sequential
/// awaits, so a poll in flight suppresses the next by construction.
pub struct StatusWatcher {
    interval: Duration,
}

impl StatusWatcher {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn from_config(polling: &PollingConfig) -> Self {
        Self::new(Duration::from_millis(polling.status_ms))
    }

    /// Poll until the document reaches a terminal status, invoking
    /// `on_tick` with each observation.
    pub async fn wait_for_terminal<A, F>(
        &self,
        api: &A,
        document_id: &str,
        mut on_tick: F,
    ) -> Result<QueueDocument, QueueApiError>
    where
        A: QueueApi + ?Sized,
        F: FnMut(&QueueDocument),
    {
        loop {
            if let Some(doc) = api.get_document(document_id).await? {
                on_tick(&doc);
                if !should_keep_polling(doc.status) {
                    return Ok(doc);
                }
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn doc(id: &str, status: DocumentStatus, created: i64) -> QueueDocument {
        QueueDocument {
            document_id: id.to_string(),
            status,
            review_status: None,
            document_type: None,
            original_filename: None,
            error_kind: None,
            classification: None,
            created_at: at(created),
            updated_at: at(created),
        }
    }

    /// Stub API returning scripted list responses.
    struct ScriptedApi {
        responses: Mutex<Vec<Vec<QueueDocument>>>,
        calls: AtomicU32,
    }

    impl ScriptedApi {
        fn new(responses: Vec<Vec<QueueDocument>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl QueueApi for ScriptedApi {
        async fn list_documents(&self) -> Result<Vec<QueueDocument>, QueueApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                Ok(responses.remove(0))
            } else {
                Ok(responses.first().cloned().unwrap_or_default())
            }
        }

        async fn get_document(
            &self,
            document_id: &str,
        ) -> Result<Option<QueueDocument>, QueueApiError> {
            let responses = self.responses.lock().unwrap();
            Ok(responses
                .first()
                .and_then(|docs| docs.iter().find(|d| d.document_id == document_id))
                .cloned())
        }

        async fn document_status(&self, _id: &str) -> Result<StatusView, QueueApiError> {
            Err(QueueApiError::Request("not scripted".to_string()))
        }
    }

    #[tokio::test]
    async fn test_placeholder_reconciles_on_the_fetch_that_lists_it() {
        // First fetch: server does not know the upload yet. Second fetch:
        // the record exists and the placeholder must vanish the same cycle.
        let api = Arc::new(ScriptedApi::new(vec![
            vec![],
            vec![doc("doc-1", DocumentStatus::Pending, 1)],
        ]));
        let mut queue = WorkQueue::new(api, PollingConfig::default(), 70.0);
        queue.note_upload("doc-1", Some("report.pdf"), at(0));

        let first = queue.refresh(at(1)).await.unwrap();
        assert_eq!(first.entries.len(), 1);
        assert!(first.entries[0].placeholder);

        let second = queue.refresh(at(3)).await.unwrap();
        assert_eq!(second.entries.len(), 1);
        assert!(!second.entries[0].placeholder);
        assert!(!queue.has_pending_placeholder(at(3)));
    }

    #[tokio::test]
    async fn test_adaptive_delay_tracks_queue_state() {
        let config = PollingConfig::default();

        // Active document: short interval.
        let api = Arc::new(ScriptedApi::new(vec![vec![doc(
            "doc-1",
            DocumentStatus::Extracting,
            1,
        )]]));
        let mut queue = WorkQueue::new(api, config, 70.0);
        let snapshot = queue.refresh(at(1)).await.unwrap();
        assert_eq!(snapshot.next_delay, Duration::from_millis(config.active_ms));

        // Placeholder only: medium interval.
        let api = Arc::new(ScriptedApi::new(vec![vec![]]));
        let mut queue = WorkQueue::new(api, config, 70.0);
        queue.note_upload("doc-2", None, at(0));
        let snapshot = queue.refresh(at(1)).await.unwrap();
        assert_eq!(snapshot.next_delay, Duration::from_millis(config.waiting_ms));

        // Idle: long interval.
        let api = Arc::new(ScriptedApi::new(vec![vec![doc(
            "doc-3",
            DocumentStatus::Processed,
            1,
        )]]));
        let mut queue = WorkQueue::new(api, config, 70.0);
        let snapshot = queue.refresh(at(1)).await.unwrap();
        assert_eq!(snapshot.next_delay, Duration::from_millis(config.idle_ms));
    }

    #[tokio::test]
    async fn test_status_watcher_stops_at_terminal() {
        let api = ScriptedApi::new(vec![vec![doc("doc-1", DocumentStatus::Processed, 1)]]);
        let watcher = StatusWatcher::new(Duration::from_millis(1));
        let mut ticks = 0;
        let result = watcher
            .wait_for_terminal(&api, "doc-1", |_| ticks += 1)
            .await
            .unwrap();
        assert_eq!(result.status, DocumentStatus::Processed);
        assert_eq!(ticks, 1);
    }

    #[test]
    fn test_suggested_action_distinguishes_unknown_type() {
        let mut failed = doc("doc-1", DocumentStatus::Failed, 1);
        failed.error_kind = Some("stage".to_string());
        assert_eq!(
            suggested_action(&failed, 70.0),
            Some(SuggestedAction::Reprocess)
        );

        failed.error_kind = Some("unknown_type".to_string());
        assert_eq!(
            suggested_action(&failed, 70.0),
            Some(SuggestedAction::ConfigureNewType)
        );

        // Fallback: no recorded kind, but the shared predicate applies to
        // the classification guess.
        failed.error_kind = None;
        failed.classification = Some(Classification {
            document_type: "unknown".to_string(),
            confidence: 40.0,
            page_targets: Default::default(),
        });
        assert_eq!(
            suggested_action(&failed, 70.0),
            Some(SuggestedAction::ConfigureNewType)
        );

        let mut review = doc("doc-2", DocumentStatus::Processed, 1);
        review.review_status = Some(ReviewStatus::PendingReview);
        assert_eq!(suggested_action(&review, 70.0), Some(SuggestedAction::Review));

        let settled = doc("doc-3", DocumentStatus::Processed, 1);
        assert_eq!(suggested_action(&settled, 70.0), None);
    }
}
