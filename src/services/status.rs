//! Status feed: the per-document stage projection exposed for polling.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{project_stages, run_started_at, Stage, StageSet};
use crate::repository::{DieselError, DocumentRepository};

/// One event, rendered relative to run start.
#[derive(Debug, Clone, Serialize)]
pub struct FeedEvent {
    /// Seconds since the run started.
    pub timestamp_offset: i64,
    pub stage: Option<Stage>,
    pub message: String,
}

/// The polled status payload for one document.
#[derive(Debug, Clone, Serialize)]
pub struct StatusFeed {
    pub document_type: Option<String>,
    pub stages: StageSet,
    pub events: Vec<FeedEvent>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Read-side service over the event log.
#[derive(Clone)]
pub struct StatusService {
    repo: DocumentRepository,
}

impl StatusService {
    pub fn new(repo: DocumentRepository) -> Self {
        Self { repo }
    }

    /// Project the latest run's events into stage descriptors.
    ///
    /// The projection is recomputed on every read; nothing here is cached or
    /// stored, so it cannot drift from the log.
    pub async fn get_status(&self, document_id: &str) -> Result<Option<StatusFeed>, DieselError> {
        let Some(doc) = self.repo.get(document_id).await? else {
            return Ok(None);
        };

        // The active run's token, or the most recent one once released.
        let token = doc.run_token.clone().or_else(|| doc.last_run_token.clone());
        let events = match token {
            Some(token) => self.repo.events_for_run(document_id, &token).await?,
            None => Vec::new(),
        };

        let started_at = run_started_at(&events);
        let base = started_at
            .or_else(|| events.first().map(|e| e.created_at))
            .unwrap_or(DateTime::UNIX_EPOCH);
        let feed_events = events
            .iter()
            .map(|e| FeedEvent {
                timestamp_offset: (e.created_at - base).num_seconds().max(0),
                stage: e.stage,
                message: e.message.clone(),
            })
            .collect();

        Ok(Some(StatusFeed {
            document_type: doc.document_type.clone(),
            stages: project_stages(&events),
            events: feed_events,
            started_at,
        }))
    }
}
