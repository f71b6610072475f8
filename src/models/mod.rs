//! Domain models for documents and processing events.

mod document;
mod event;

pub use document::{
    compute_content_hash, Classification, Document, DocumentStatus, FailureKind, ReviewStatus,
    RunFailure,
};
pub use event::{
    project_stages, run_started_at, EventKind, ProcessingEvent, Stage, StageDescriptor,
    StageProgress, StageSet, StageState,
};
