//! Execution of a single pipeline run.
//!
//! One spawned task per run. Every write back to the document row is
//! conditioned on the run-ownership token; when a conditional write reports
//! the token stale, the run has been superseded and simply stops — its
//! remaining effects must not land.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::models::{DocumentStatus, EventKind, FailureKind, Stage};
use crate::repository::{DieselError, DocumentRepository};
use crate::storage::ObjectStore;

use super::retry::retry_task;
use super::state::{advance, RunState, StageOutcome};
use super::Inner;

/// Everything a run needs to know about its document.
#[derive(Debug, Clone)]
pub(super) struct RunParams {
    pub document_id: String,
    pub token: String,
    pub storage_key: String,
    pub content_hash: String,
}

/// Outcome of one parallel extraction task.
enum SectionOutcome {
    Completed,
    /// The run token went stale mid-task; the run is superseded.
    Superseded,
    Failed { section: String, cause: String },
}

struct EventLog<'a> {
    repo: &'a DocumentRepository,
    document_id: &'a str,
    token: &'a str,
}

impl EventLog<'_> {
    async fn append(
        &self,
        kind: EventKind,
        stage: Option<Stage>,
        task: Option<&str>,
        total: Option<i32>,
        message: &str,
    ) -> Result<(), DieselError> {
        self.repo
            .append_event(
                self.document_id,
                Some(self.token),
                kind.as_str(),
                stage.map(|s| s.as_str()),
                task,
                total,
                message,
            )
            .await
    }
}

fn json_err(e: serde_json::Error) -> DieselError {
    DieselError::SerializationError(Box::new(e))
}

/// Entry point for a spawned run task.
pub(super) async fn execute_run(inner: Arc<Inner>, params: RunParams) {
    if let Err(e) = drive(&inner, &params).await {
        warn!(
            document_id = %params.document_id,
            error = %e,
            "pipeline run aborted on infrastructure error"
        );
        // Best-effort catch: record what we can so the document does not
        // stay stuck in an in-flight status.
        let _ = inner
            .repo
            .record_failure(
                &params.document_id,
                &params.token,
                "internal",
                FailureKind::Stage.as_str(),
                &e.to_string(),
            )
            .await;
        let _ = inner
            .repo
            .append_event(
                &params.document_id,
                Some(&params.token),
                EventKind::RunFailed.as_str(),
                None,
                None,
                None,
                &format!("run aborted: {e}"),
            )
            .await;
    }
}

async fn drive(inner: &Arc<Inner>, params: &RunParams) -> Result<(), DieselError> {
    let repo = &inner.repo;
    let events = EventLog {
        repo,
        document_id: &params.document_id,
        token: &params.token,
    };
    let timeout = Duration::from_secs(inner.config.task_timeout_seconds);
    let mut state = RunState::Classify;

    events
        .append(EventKind::RunStarted, None, None, None, "run started")
        .await?;

    // ==================== Classify ====================
    events
        .append(
            EventKind::StageStarted,
            Some(Stage::Classification),
            None,
            Some(1),
            "classification started",
        )
        .await?;
    events
        .append(
            EventKind::TaskStarted,
            Some(Stage::Classification),
            Some("classify"),
            None,
            "classifying document",
        )
        .await?;

    let classification = match retry_task(&inner.config.retry, timeout, "classify", || {
        inner
            .stack
            .classifier
            .classify(&params.document_id, &params.storage_key)
    })
    .await
    {
        Ok(classification) => classification,
        Err(e) => {
            events
                .append(
                    EventKind::TaskFailed,
                    Some(Stage::Classification),
                    Some("classify"),
                    None,
                    &e.to_string(),
                )
                .await?;
            events
                .append(
                    EventKind::StageFailed,
                    Some(Stage::Classification),
                    None,
                    None,
                    "classification failed",
                )
                .await?;
            return fail(inner, params, &events, state, FailureKind::Stage, &e.to_string()).await;
        }
    };

    events
        .append(
            EventKind::TaskCompleted,
            Some(Stage::Classification),
            Some("classify"),
            None,
            &format!(
                "classified as '{}' (confidence {:.0})",
                classification.document_type, classification.confidence
            ),
        )
        .await?;
    events
        .append(
            EventKind::StageCompleted,
            Some(Stage::Classification),
            None,
            None,
            "classification complete",
        )
        .await?;

    // The classifier itself succeeded, but an unknown or low-confidence type
    // terminates the run before extraction. The guess is kept so the client
    // can pre-fill a new type configuration.
    if classification.is_unknown_type(inner.config.min_confidence) {
        let guess = serde_json::to_string(&classification).map_err(json_err)?;
        if !repo
            .record_classification_guess(&params.document_id, &params.token, &guess)
            .await?
        {
            return Ok(());
        }
        state = advance(state, StageOutcome::UnknownType);
        debug_assert!(state.is_terminal());
        let cause = format!(
            "classified as '{}' with confidence {:.0}",
            classification.document_type, classification.confidence
        );
        return fail(
            inner,
            params,
            &events,
            RunState::Classify,
            FailureKind::UnknownType,
            &cause,
        )
        .await;
    }

    let classification_json = serde_json::to_string(&classification).map_err(json_err)?;
    if !repo
        .record_classification(
            &params.document_id,
            &params.token,
            &classification.document_type,
            &classification_json,
        )
        .await?
    {
        return Ok(()); // superseded
    }
    state = advance(state, StageOutcome::Success);

    // ==================== TypeChoice ====================
    // Pure routing, no side effects: unmatched types fall back to the
    // default branch.
    let branch = inner
        .config
        .branch_for(Some(&classification.document_type))
        .clone();
    state = advance(state, StageOutcome::Success);

    // ==================== Extract (parallel fan-out) ====================
    if !repo
        .advance_status(&params.document_id, &params.token, DocumentStatus::Extracting)
        .await?
    {
        return Ok(());
    }
    events
        .append(
            EventKind::StageStarted,
            Some(Stage::Extraction),
            None,
            Some(branch.sections.len() as i32),
            &format!(
                "extracting {} sections for type '{}'",
                branch.sections.len(),
                branch.id
            ),
        )
        .await?;

    let mut join_set = tokio::task::JoinSet::new();
    for section in branch.sections.iter().cloned() {
        let pages = classification
            .page_targets
            .get(&section)
            .cloned()
            .unwrap_or_default();
        join_set.spawn(run_section_task(
            inner.clone(),
            params.clone(),
            section,
            pages,
            timeout,
        ));
    }

    // All-or-nothing join: every sibling settles before the branch result is
    // decided, so slices from successful tasks are already committed even if
    // another task failed.
    let mut failures: Vec<(String, String)> = Vec::new();
    let mut superseded = false;
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(SectionOutcome::Completed) => {}
            Ok(SectionOutcome::Superseded) => superseded = true,
            Ok(SectionOutcome::Failed { section, cause }) => failures.push((section, cause)),
            Err(e) => failures.push(("join".to_string(), e.to_string())),
        }
    }

    if !failures.is_empty() {
        let summary = failures
            .iter()
            .map(|(section, cause)| format!("{section}: {cause}"))
            .collect::<Vec<_>>()
            .join("; ");
        events
            .append(
                EventKind::StageFailed,
                Some(Stage::Extraction),
                None,
                None,
                &format!("extraction failed ({summary})"),
            )
            .await?;
        return fail(inner, params, &events, state, FailureKind::Stage, &summary).await;
    }
    if superseded {
        return Ok(());
    }

    events
        .append(
            EventKind::StageCompleted,
            Some(Stage::Extraction),
            None,
            None,
            "all sections extracted",
        )
        .await?;
    if !repo
        .advance_status(&params.document_id, &params.token, DocumentStatus::Extracted)
        .await?
    {
        return Ok(());
    }
    state = advance(state, StageOutcome::Success);

    // ==================== Normalize ====================
    if !repo
        .advance_status(
            &params.document_id,
            &params.token,
            DocumentStatus::Normalizing,
        )
        .await?
    {
        return Ok(());
    }
    events
        .append(
            EventKind::StageStarted,
            Some(Stage::Normalization),
            None,
            Some(1),
            "normalization started",
        )
        .await?;
    events
        .append(
            EventKind::TaskStarted,
            Some(Stage::Normalization),
            Some("normalize"),
            None,
            "normalizing extracted sections",
        )
        .await?;

    let sections = repo
        .sections_for_run(&params.document_id, &params.token)
        .await?;
    let union = serde_json::Value::Object(sections.into_iter().collect());

    let normalized = match retry_task(&inner.config.retry, timeout, "normalize", || {
        inner
            .stack
            .normalizer
            .normalize(&params.document_id, &branch.id, &union)
    })
    .await
    {
        Ok(data) => data,
        Err(e) => {
            events
                .append(
                    EventKind::TaskFailed,
                    Some(Stage::Normalization),
                    Some("normalize"),
                    None,
                    &e.to_string(),
                )
                .await?;
            events
                .append(
                    EventKind::StageFailed,
                    Some(Stage::Normalization),
                    None,
                    None,
                    "normalization failed",
                )
                .await?;
            return fail(inner, params, &events, state, FailureKind::Stage, &e.to_string()).await;
        }
    };

    events
        .append(
            EventKind::TaskCompleted,
            Some(Stage::Normalization),
            Some("normalize"),
            None,
            "normalization complete",
        )
        .await?;

    // Validation decides whether the document needs a human.
    let missing = inner
        .config
        .missing_fields(Some(&classification.document_type), &normalized);
    let review_status = if missing.is_empty() {
        None
    } else {
        Some("pending_review")
    };

    // Snapshot the normalized payload as a derived artifact. The document
    // row stays the source of truth; a snapshot failure is not fatal.
    let artifact_key = ObjectStore::processed_key(&params.content_hash);
    match serde_json::to_vec_pretty(&normalized) {
        Ok(bytes) => {
            if let Err(e) = inner.store.put(&artifact_key, &bytes) {
                warn!(key = %artifact_key, error = %e, "failed to write processed artifact");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize processed artifact"),
    }

    let normalized_json = serde_json::to_string(&normalized).map_err(json_err)?;
    if !repo
        .record_processed(
            &params.document_id,
            &params.token,
            &normalized_json,
            review_status,
        )
        .await?
    {
        return Ok(());
    }
    repo.delete_stale_sections(&params.document_id, &params.token)
        .await?;

    events
        .append(
            EventKind::StageCompleted,
            Some(Stage::Normalization),
            None,
            None,
            "normalization complete",
        )
        .await?;
    let completion_message = if missing.is_empty() {
        "run complete".to_string()
    } else {
        format!(
            "run complete; flagged for review (missing fields: {})",
            missing.join(", ")
        )
    };
    events
        .append(EventKind::RunCompleted, None, None, None, &completion_message)
        .await?;

    state = advance(state, StageOutcome::Success);
    info!(
        document_id = %params.document_id,
        state = state.as_str(),
        "pipeline run complete"
    );
    Ok(())
}

/// The uniform catch edge: capture {state, error} on the document and
/// terminate the run. Side effects already committed (earlier slices) are
/// retained for forensics.
async fn fail(
    inner: &Arc<Inner>,
    params: &RunParams,
    events: &EventLog<'_>,
    state: RunState,
    kind: FailureKind,
    cause: &str,
) -> Result<(), DieselError> {
    let applied = inner
        .repo
        .record_failure(
            &params.document_id,
            &params.token,
            state.as_str(),
            kind.as_str(),
            cause,
        )
        .await?;
    if !applied {
        return Ok(()); // superseded; the newer run owns the row
    }
    events
        .append(
            EventKind::RunFailed,
            None,
            None,
            None,
            &format!("run failed in {}: {cause}", state.as_str()),
        )
        .await?;
    info!(
        document_id = %params.document_id,
        state = state.as_str(),
        kind = kind.as_str(),
        "pipeline run failed"
    );
    Ok(())
}

/// One parallel extraction task: retry the collaborator, then commit the
/// slice under the run token.
async fn run_section_task(
    inner: Arc<Inner>,
    params: RunParams,
    section: String,
    pages: Vec<u32>,
    timeout: Duration,
) -> SectionOutcome {
    let events = EventLog {
        repo: &inner.repo,
        document_id: &params.document_id,
        token: &params.token,
    };

    if let Err(e) = events
        .append(
            EventKind::TaskStarted,
            Some(Stage::Extraction),
            Some(&section),
            None,
            &format!("extracting {section}"),
        )
        .await
    {
        return SectionOutcome::Failed {
            section,
            cause: e.to_string(),
        };
    }

    let extracted = retry_task(&inner.config.retry, timeout, &section, || {
        inner
            .stack
            .extractor
            .extract_section(&params.document_id, &params.storage_key, &section, &pages)
    })
    .await;

    match extracted {
        Ok(fields) => {
            let payload = match serde_json::to_string(&fields) {
                Ok(payload) => payload,
                Err(e) => {
                    return SectionOutcome::Failed {
                        section,
                        cause: format!("unserializable slice: {e}"),
                    }
                }
            };
            match inner
                .repo
                .write_section(&params.document_id, &params.token, &section, &payload)
                .await
            {
                Ok(true) => {
                    let _ = events
                        .append(
                            EventKind::TaskCompleted,
                            Some(Stage::Extraction),
                            Some(&section),
                            None,
                            &format!("{section} extracted"),
                        )
                        .await;
                    SectionOutcome::Completed
                }
                Ok(false) => SectionOutcome::Superseded,
                Err(e) => SectionOutcome::Failed {
                    section,
                    cause: format!("failed to persist slice: {e}"),
                },
            }
        }
        Err(e) => {
            let _ = events
                .append(
                    EventKind::TaskFailed,
                    Some(Stage::Extraction),
                    Some(&section),
                    None,
                    &e.to_string(),
                )
                .await;
            SectionOutcome::Failed {
                section,
                cause: e.to_string(),
            }
        }
    }
}
