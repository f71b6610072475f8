//! Service layer: ingestion, review workflow, and the status feed.
//!
//! Services own the repositories and the orchestrator handle; the HTTP
//! handlers and CLI commands stay thin.

pub mod ingest;
pub mod review;
pub mod status;

pub use ingest::{IngestError, IngestOutcome, IngestService, UploadTicket};
pub use review::{ReviewError, ReviewService};
pub use status::{FeedEvent, StatusFeed, StatusService};
