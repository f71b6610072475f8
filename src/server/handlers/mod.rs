//! HTTP handlers for the JSON API.

mod documents;
mod metrics;
mod review;
mod types;
mod upload;

pub use documents::{
    correct_fields, get_document, get_document_pdf, get_document_status, list_documents,
    reprocess_document,
};
pub use metrics::metrics;
pub use review::{approve_document, reject_document, review_detail, review_queue};
pub use upload::{create_upload, put_upload, serve_file};
