//! Processing events and the derived per-stage status projection.
//!
//! Events are the append-only record of everything a run did. Stage
//! descriptors are never stored: they are recomputed from the event log on
//! every read, so there is no mutable aggregate to drift out of sync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A phase of the pipeline with its own success/failure state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Classification,
    Extraction,
    Normalization,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::Extraction => "extraction",
            Self::Normalization => "normalization",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "classification" => Some(Self::Classification),
            "extraction" => Some(Self::Extraction),
            "normalization" => Some(Self::Normalization),
            _ => None,
        }
    }
}

/// What kind of progress an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStarted,
    StageStarted,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    StageCompleted,
    StageFailed,
    RunCompleted,
    RunFailed,
    /// Human review action (approve/reject/correct/reprocess request).
    Review,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStarted => "run_started",
            Self::StageStarted => "stage_started",
            Self::TaskStarted => "task_started",
            Self::TaskCompleted => "task_completed",
            Self::TaskFailed => "task_failed",
            Self::StageCompleted => "stage_completed",
            Self::StageFailed => "stage_failed",
            Self::RunCompleted => "run_completed",
            Self::RunFailed => "run_failed",
            Self::Review => "review",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "run_started" => Some(Self::RunStarted),
            "stage_started" => Some(Self::StageStarted),
            "task_started" => Some(Self::TaskStarted),
            "task_completed" => Some(Self::TaskCompleted),
            "task_failed" => Some(Self::TaskFailed),
            "stage_completed" => Some(Self::StageCompleted),
            "stage_failed" => Some(Self::StageFailed),
            "run_completed" => Some(Self::RunCompleted),
            "run_failed" => Some(Self::RunFailed),
            "review" => Some(Self::Review),
            _ => None,
        }
    }
}

/// One append-only log entry. Never mutated or deleted; ordering is append
/// order (the database row id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingEvent {
    pub id: i64,
    pub document_id: String,
    /// Token of the run that produced this event; None for review actions.
    pub run_token: Option<String>,
    pub kind: EventKind,
    pub stage: Option<Stage>,
    pub task: Option<String>,
    /// Planned task count, present on stage_started events.
    pub total_tasks: Option<u32>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Derived status of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Task-level progress within a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageProgress {
    pub completed: u32,
    pub total: u32,
    pub current_label: Option<String>,
}

/// Projection of one stage's events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDescriptor {
    pub status: StageState,
    /// Seconds from the stage's first event to its terminal event; None while
    /// the stage is pending or still in progress.
    pub elapsed_seconds: Option<i64>,
    pub progress: Option<StageProgress>,
}

impl StageDescriptor {
    fn pending() -> Self {
        Self {
            status: StageState::Pending,
            elapsed_seconds: None,
            progress: None,
        }
    }
}

/// The three pipeline stages, projected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSet {
    pub classification: StageDescriptor,
    pub extraction: StageDescriptor,
    pub normalization: StageDescriptor,
}

/// Timestamp of the run_started event, if the run has begun.
pub fn run_started_at(events: &[ProcessingEvent]) -> Option<DateTime<Utc>> {
    events
        .iter()
        .find(|e| e.kind == EventKind::RunStarted)
        .map(|e| e.created_at)
}

/// Recompute all three stage descriptors from one run's event log.
///
/// Derivation rule: a stage is COMPLETED when every task belonging to it has
/// a completion event, FAILED when any task recorded a failure with no later
/// success for the same task, IN_PROGRESS when at least one task has started
/// and not all have finished, and PENDING otherwise.
pub fn project_stages(events: &[ProcessingEvent]) -> StageSet {
    StageSet {
        classification: project_stage(events, Stage::Classification),
        extraction: project_stage(events, Stage::Extraction),
        normalization: project_stage(events, Stage::Normalization),
    }
}

fn project_stage(events: &[ProcessingEvent], stage: Stage) -> StageDescriptor {
    let stage_events: Vec<&ProcessingEvent> = events
        .iter()
        .filter(|e| e.stage == Some(stage))
        .collect();
    if stage_events.is_empty() {
        return StageDescriptor::pending();
    }

    let mut total: u32 = 0;
    let mut stage_failed = false;
    let mut stage_completed = false;
    // Last outcome per task, in append order; later events win.
    let mut task_outcomes: Vec<(String, EventKind)> = Vec::new();

    for event in &stage_events {
        match event.kind {
            EventKind::StageStarted => {
                total = event.total_tasks.unwrap_or(1).max(1);
            }
            EventKind::StageFailed => stage_failed = true,
            EventKind::StageCompleted => stage_completed = true,
            EventKind::TaskStarted | EventKind::TaskCompleted | EventKind::TaskFailed => {
                let name = event.task.clone().unwrap_or_default();
                if let Some(entry) = task_outcomes.iter_mut().find(|(t, _)| *t == name) {
                    entry.1 = event.kind;
                } else {
                    task_outcomes.push((name, event.kind));
                }
            }
            _ => {}
        }
    }

    let completed_count = task_outcomes
        .iter()
        .filter(|(_, k)| *k == EventKind::TaskCompleted)
        .count() as u32;
    let any_task_failed = task_outcomes
        .iter()
        .any(|(_, k)| *k == EventKind::TaskFailed);
    let total = total.max(task_outcomes.len() as u32).max(1);

    let status = if stage_failed || any_task_failed {
        StageState::Failed
    } else if stage_completed || completed_count >= total {
        StageState::Completed
    } else {
        StageState::InProgress
    };

    let elapsed_seconds = match status {
        StageState::Completed | StageState::Failed => {
            let first = stage_events.first().map(|e| e.created_at);
            let last = stage_events.last().map(|e| e.created_at);
            match (first, last) {
                (Some(f), Some(l)) => Some((l - f).num_seconds()),
                _ => None,
            }
        }
        _ => None,
    };

    let current_label = task_outcomes
        .iter()
        .rev()
        .find(|(_, k)| *k == EventKind::TaskStarted)
        .map(|(t, _)| t.clone());

    StageDescriptor {
        status,
        elapsed_seconds,
        progress: Some(StageProgress {
            completed: completed_count,
            total,
            current_label,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn event(
        id: i64,
        kind: EventKind,
        stage: Option<Stage>,
        task: Option<&str>,
        total: Option<u32>,
        at: i64,
    ) -> ProcessingEvent {
        ProcessingEvent {
            id,
            document_id: "doc".to_string(),
            run_token: Some("run-1".to_string()),
            kind,
            stage,
            task: task.map(|s| s.to_string()),
            total_tasks: total,
            message: String::new(),
            created_at: ts(at),
        }
    }

    #[test]
    fn test_empty_log_is_all_pending() {
        let stages = project_stages(&[]);
        assert_eq!(stages.classification.status, StageState::Pending);
        assert_eq!(stages.extraction.status, StageState::Pending);
        assert_eq!(stages.normalization.status, StageState::Pending);
    }

    #[test]
    fn test_completed_classification_leaves_extraction_pending() {
        // The unknown-type scenario: classification completes, the run fails
        // before any extraction event is appended.
        let events = vec![
            event(1, EventKind::RunStarted, None, None, None, 0),
            event(
                2,
                EventKind::StageStarted,
                Some(Stage::Classification),
                None,
                Some(1),
                0,
            ),
            event(
                3,
                EventKind::TaskStarted,
                Some(Stage::Classification),
                Some("classify"),
                None,
                0,
            ),
            event(
                4,
                EventKind::TaskCompleted,
                Some(Stage::Classification),
                Some("classify"),
                None,
                3,
            ),
            event(
                5,
                EventKind::StageCompleted,
                Some(Stage::Classification),
                None,
                None,
                3,
            ),
            event(6, EventKind::RunFailed, None, None, None, 3),
        ];
        let stages = project_stages(&events);
        assert_eq!(stages.classification.status, StageState::Completed);
        assert_eq!(stages.classification.elapsed_seconds, Some(3));
        assert_eq!(stages.extraction.status, StageState::Pending);
        assert_eq!(stages.normalization.status, StageState::Pending);
    }

    #[test]
    fn test_partial_extraction_is_in_progress() {
        let events = vec![
            event(
                1,
                EventKind::StageStarted,
                Some(Stage::Extraction),
                None,
                Some(3),
                0,
            ),
            event(
                2,
                EventKind::TaskStarted,
                Some(Stage::Extraction),
                Some("rates"),
                None,
                1,
            ),
            event(
                3,
                EventKind::TaskCompleted,
                Some(Stage::Extraction),
                Some("rates"),
                None,
                2,
            ),
            event(
                4,
                EventKind::TaskStarted,
                Some(Stage::Extraction),
                Some("fees"),
                None,
                2,
            ),
        ];
        let desc = project_stages(&events).extraction;
        assert_eq!(desc.status, StageState::InProgress);
        assert_eq!(desc.elapsed_seconds, None);
        let progress = desc.progress.unwrap();
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.total, 3);
        assert_eq!(progress.current_label.as_deref(), Some("fees"));
    }

    #[test]
    fn test_task_failure_fails_the_stage() {
        let events = vec![
            event(
                1,
                EventKind::StageStarted,
                Some(Stage::Extraction),
                None,
                Some(2),
                0,
            ),
            event(
                2,
                EventKind::TaskStarted,
                Some(Stage::Extraction),
                Some("covenants"),
                None,
                0,
            ),
            event(
                3,
                EventKind::TaskCompleted,
                Some(Stage::Extraction),
                Some("rates"),
                None,
                4,
            ),
            event(
                4,
                EventKind::TaskFailed,
                Some(Stage::Extraction),
                Some("covenants"),
                None,
                9,
            ),
            event(
                5,
                EventKind::StageFailed,
                Some(Stage::Extraction),
                None,
                None,
                9,
            ),
        ];
        let desc = project_stages(&events).extraction;
        assert_eq!(desc.status, StageState::Failed);
        assert_eq!(desc.elapsed_seconds, Some(9));
    }

    #[test]
    fn test_later_success_clears_earlier_task_failure() {
        // A retried task that eventually completed must not mark the stage
        // failed: the last outcome per task wins.
        let events = vec![
            event(
                1,
                EventKind::StageStarted,
                Some(Stage::Extraction),
                None,
                Some(1),
                0,
            ),
            event(
                2,
                EventKind::TaskFailed,
                Some(Stage::Extraction),
                Some("rates"),
                None,
                1,
            ),
            event(
                3,
                EventKind::TaskCompleted,
                Some(Stage::Extraction),
                Some("rates"),
                None,
                2,
            ),
        ];
        let desc = project_stages(&events).extraction;
        assert_eq!(desc.status, StageState::Completed);
    }

    #[test]
    fn test_run_started_at() {
        let events = vec![
            event(1, EventKind::RunStarted, None, None, None, 7),
            event(
                2,
                EventKind::StageStarted,
                Some(Stage::Classification),
                None,
                Some(1),
                8,
            ),
        ];
        assert_eq!(run_started_at(&events), Some(ts(7)));
        assert_eq!(run_started_at(&[]), None);
    }
}
