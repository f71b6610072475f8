//! finpipe - financial document extraction pipeline and review server.
//!
//! Ingests financial PDF documents, deduplicates them by content hash, and
//! drives each admitted document through an asynchronous classify → extract →
//! normalize pipeline with human review on top. A JSON API exposes documents,
//! status projections, and the review workflow; the dashboard module keeps a
//! polling client eventually consistent with server-side progress.

pub mod cli;
pub mod config;
pub mod dashboard;
pub mod extract;
pub mod models;
pub mod pipeline;
pub mod repository;
pub mod schema;
pub mod server;
pub mod services;
pub mod storage;
