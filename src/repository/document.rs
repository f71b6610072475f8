//! Document repository: admission, conditional writes, and queries.
//!
//! The document row is the only shared mutable resource in the system, so
//! every partial update here is conditioned on either the caller's
//! last-observed `version` (review workflow) or the run-ownership token
//! (pipeline stages). Mutators return `Ok(true)` when the conditional write
//! applied and `Ok(false)` when the row has moved on; callers decide whether
//! that means a conflict, a superseded run, or a retry.

use std::collections::HashMap;

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::models::{Document, DocumentStatus, ProcessingEvent};
use crate::schema::{documents, extraction_sections, processing_events};
use crate::with_conn;

use super::models::{DocumentRecord, EventRecord, NewDocument, NewEvent, NewSection};
use super::pool::{DbPool, DieselError};

/// Outcome of the dedup gate's admission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// A new (or revived) record owns this content hash; start a run.
    Admitted { document_id: String },
    /// The hash already belongs to a live record; no new run.
    Duplicate { existing_id: String },
}

/// Facts about an upload being admitted.
#[derive(Debug, Clone)]
pub struct AdmissionParams<'a> {
    pub document_id: &'a str,
    pub content_hash: &'a str,
    pub original_filename: Option<&'a str>,
    pub mime_type: &'a str,
    pub file_size: u64,
    pub storage_path: &'a str,
    /// `pending` for pipeline-bound uploads, `skipped` for content that
    /// failed verification.
    pub initial_status: DocumentStatus,
}

/// Repository for documents, extraction sections, and processing events.
#[derive(Clone)]
pub struct DocumentRepository {
    pool: DbPool,
}

impl DocumentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    // ========================================================================
    // Admission (dedup gate)
    // ========================================================================

    /// Admit an upload, deduplicating by content hash.
    ///
    /// The insert is conditioned on the unique `content_hash` index, so of
    /// any number of concurrent admissions of the same bytes exactly one
    /// wins; the losers read the winner's id back. A failed record with no
    /// active run is revived in place rather than duplicated, which keeps
    /// the one-row-per-hash invariant that makes the race resolution atomic.
    pub async fn admit(&self, params: AdmissionParams<'_>) -> Result<Admission, DieselError> {
        let now = Utc::now().to_rfc3339();
        let inserted = with_conn!(self.pool, conn => {
            diesel::insert_into(documents::table)
                .values(&NewDocument {
                    id: params.document_id,
                    content_hash: params.content_hash,
                    status: params.initial_status.as_str(),
                    original_filename: params.original_filename,
                    mime_type: params.mime_type,
                    file_size: params.file_size as i64,
                    storage_path: params.storage_path,
                    version: 1,
                    created_at: &now,
                    updated_at: &now,
                })
                .on_conflict(documents::content_hash)
                .do_nothing()
                .execute(&mut conn)
                .await?
        });

        if inserted > 0 {
            return Ok(Admission::Admitted {
                document_id: params.document_id.to_string(),
            });
        }

        // Lost the conditional insert: the hash is already owned.
        let existing = self
            .get_by_hash(params.content_hash)
            .await?
            .ok_or(DieselError::NotFound)?;

        if existing.status == DocumentStatus::Failed && existing.run_token.is_none() {
            if self.revive_failed(&existing.id, &params).await? {
                return Ok(Admission::Admitted {
                    document_id: existing.id,
                });
            }
        }

        Ok(Admission::Duplicate {
            existing_id: existing.id,
        })
    }

    /// Reset an abandoned failed record to pending for a fresh run.
    async fn revive_failed(
        &self,
        id: &str,
        params: &AdmissionParams<'_>,
    ) -> Result<bool, DieselError> {
        let now = Utc::now().to_rfc3339();
        let updated = with_conn!(self.pool, conn => {
            diesel::update(
                documents::table.filter(
                    documents::id
                        .eq(id)
                        .and(documents::status.eq(DocumentStatus::Failed.as_str()))
                        .and(documents::run_token.is_null()),
                ),
            )
            .set((
                documents::status.eq(DocumentStatus::Pending.as_str()),
                documents::error_state.eq(None::<String>),
                documents::error_kind.eq(None::<String>),
                documents::error_cause.eq(None::<String>),
                documents::original_filename.eq(params.original_filename),
                documents::storage_path.eq(params.storage_path),
                documents::version.eq(documents::version + 1),
                documents::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?
        });
        Ok(updated > 0)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Get a document by id.
    pub async fn get(&self, id: &str) -> Result<Option<Document>, DieselError> {
        let record: Option<DocumentRecord> = with_conn!(self.pool, conn => {
            documents::table
                .filter(documents::id.eq(id))
                .first(&mut conn)
                .await
                .optional()?
        });
        record.map(DocumentRecord::into_domain).transpose()
    }

    /// Get a document by content hash.
    pub async fn get_by_hash(&self, hash: &str) -> Result<Option<Document>, DieselError> {
        let record: Option<DocumentRecord> = with_conn!(self.pool, conn => {
            documents::table
                .filter(documents::content_hash.eq(hash))
                .first(&mut conn)
                .await
                .optional()?
        });
        record.map(DocumentRecord::into_domain).transpose()
    }

    /// List documents newest-first with keyset pagination.
    ///
    /// `cursor` is the (created_at, id) of the last row of the previous
    /// page.
    pub async fn list(
        &self,
        status: Option<&str>,
        limit: i64,
        cursor: Option<(&str, &str)>,
    ) -> Result<Vec<Document>, DieselError> {
        let records: Vec<DocumentRecord> = with_conn!(self.pool, conn => {
            let mut query = documents::table
                .order((documents::created_at.desc(), documents::id.desc()))
                .limit(limit)
                .into_boxed();
            if let Some(status) = status {
                query = query.filter(documents::status.eq(status.to_string()));
            }
            if let Some((created_at, id)) = cursor {
                query = query.filter(
                    documents::created_at.lt(created_at.to_string()).or(
                        documents::created_at
                            .eq(created_at.to_string())
                            .and(documents::id.lt(id.to_string())),
                    ),
                );
            }
            query.load(&mut conn).await?
        });
        records
            .into_iter()
            .map(DocumentRecord::into_domain)
            .collect()
    }

    /// List documents by review status, oldest-first (review queue is FIFO).
    pub async fn list_by_review_status(
        &self,
        review_status: &str,
        limit: i64,
    ) -> Result<Vec<Document>, DieselError> {
        let records: Vec<DocumentRecord> = with_conn!(self.pool, conn => {
            documents::table
                .filter(documents::review_status.eq(review_status))
                .order((documents::created_at.asc(), documents::id.asc()))
                .limit(limit)
                .load(&mut conn)
                .await?
        });
        records
            .into_iter()
            .map(DocumentRecord::into_domain)
            .collect()
    }

    /// Most recently updated documents.
    pub async fn recent(&self, limit: i64) -> Result<Vec<Document>, DieselError> {
        let records: Vec<DocumentRecord> = with_conn!(self.pool, conn => {
            documents::table
                .order(documents::updated_at.desc())
                .limit(limit)
                .load(&mut conn)
                .await?
        });
        records
            .into_iter()
            .map(DocumentRecord::into_domain)
            .collect()
    }

    /// Document counts grouped by status.
    pub async fn count_by_status(&self) -> Result<HashMap<String, u64>, DieselError> {
        use diesel::dsl::count_star;
        let rows: Vec<(String, i64)> = with_conn!(self.pool, conn => {
            documents::table
                .group_by(documents::status)
                .select((documents::status, count_star()))
                .load(&mut conn)
                .await?
        });
        Ok(rows
            .into_iter()
            .map(|(status, count)| (status, count as u64))
            .collect())
    }

    // ========================================================================
    // Run ownership
    // ========================================================================

    /// Claim the run token for an initial (post-admission) run.
    ///
    /// Applies only while the document is still pending with no active run;
    /// returns false if another run won the claim.
    pub async fn claim_initial_run(&self, id: &str, token: &str) -> Result<bool, DieselError> {
        let now = Utc::now().to_rfc3339();
        let updated = with_conn!(self.pool, conn => {
            diesel::update(
                documents::table.filter(
                    documents::id
                        .eq(id)
                        .and(documents::run_token.is_null())
                        .and(documents::status.eq(DocumentStatus::Pending.as_str())),
                ),
            )
            .set((
                documents::run_token.eq(token),
                documents::last_run_token.eq(token),
                documents::version.eq(documents::version + 1),
                documents::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?
        });
        Ok(updated > 0)
    }

    /// Claim the run token for a reprocessing run.
    ///
    /// Eligible from failed or processed (rejected documents are processed on
    /// the pipeline axis). Clears review and failure state and moves status
    /// to reprocessing in the same conditional write.
    pub async fn claim_reprocess_run(&self, id: &str, token: &str) -> Result<bool, DieselError> {
        let now = Utc::now().to_rfc3339();
        let eligible = vec![
            DocumentStatus::Failed.as_str(),
            DocumentStatus::Processed.as_str(),
        ];
        let updated = with_conn!(self.pool, conn => {
            diesel::update(
                documents::table.filter(
                    documents::id
                        .eq(id)
                        .and(documents::run_token.is_null())
                        .and(documents::status.eq_any(eligible)),
                ),
            )
            .set((
                documents::run_token.eq(token),
                documents::last_run_token.eq(token),
                documents::status.eq(DocumentStatus::Reprocessing.as_str()),
                documents::review_status.eq(None::<String>),
                documents::reviewed_by.eq(None::<String>),
                documents::reviewed_at.eq(None::<String>),
                documents::review_notes.eq(None::<String>),
                documents::error_state.eq(None::<String>),
                documents::error_kind.eq(None::<String>),
                documents::error_cause.eq(None::<String>),
                documents::version.eq(documents::version + 1),
                documents::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?
        });
        Ok(updated > 0)
    }

    // ========================================================================
    // Stage writes (token-conditioned)
    // ========================================================================

    /// Advance pipeline status; applies only while `token` owns the run.
    pub async fn advance_status(
        &self,
        id: &str,
        token: &str,
        status: DocumentStatus,
    ) -> Result<bool, DieselError> {
        let now = Utc::now().to_rfc3339();
        let updated = with_conn!(self.pool, conn => {
            diesel::update(
                documents::table
                    .filter(documents::id.eq(id).and(documents::run_token.eq(token))),
            )
            .set((
                documents::status.eq(status.as_str()),
                documents::version.eq(documents::version + 1),
                documents::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?
        });
        Ok(updated > 0)
    }

    /// Record the classification outcome and advance to classified.
    pub async fn record_classification(
        &self,
        id: &str,
        token: &str,
        document_type: &str,
        classification_json: &str,
    ) -> Result<bool, DieselError> {
        let now = Utc::now().to_rfc3339();
        let updated = with_conn!(self.pool, conn => {
            diesel::update(
                documents::table
                    .filter(documents::id.eq(id).and(documents::run_token.eq(token))),
            )
            .set((
                documents::document_type.eq(document_type),
                documents::classification.eq(classification_json),
                documents::status.eq(DocumentStatus::Classified.as_str()),
                documents::version.eq(documents::version + 1),
                documents::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?
        });
        Ok(updated > 0)
    }

    /// Record a classification outcome without advancing status (the
    /// unknown-type early exit keeps the guess for the client to pre-fill).
    pub async fn record_classification_guess(
        &self,
        id: &str,
        token: &str,
        classification_json: &str,
    ) -> Result<bool, DieselError> {
        let now = Utc::now().to_rfc3339();
        let updated = with_conn!(self.pool, conn => {
            diesel::update(
                documents::table
                    .filter(documents::id.eq(id).and(documents::run_token.eq(token))),
            )
            .set((
                documents::classification.eq(classification_json),
                documents::version.eq(documents::version + 1),
                documents::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?
        });
        Ok(updated > 0)
    }

    /// Record terminal failure and release the run token.
    pub async fn record_failure(
        &self,
        id: &str,
        token: &str,
        state: &str,
        kind: &str,
        cause: &str,
    ) -> Result<bool, DieselError> {
        let now = Utc::now().to_rfc3339();
        let updated = with_conn!(self.pool, conn => {
            diesel::update(
                documents::table
                    .filter(documents::id.eq(id).and(documents::run_token.eq(token))),
            )
            .set((
                documents::status.eq(DocumentStatus::Failed.as_str()),
                documents::error_state.eq(state),
                documents::error_kind.eq(kind),
                documents::error_cause.eq(cause),
                documents::run_token.eq(None::<String>),
                documents::version.eq(documents::version + 1),
                documents::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?
        });
        Ok(updated > 0)
    }

    /// Record terminal success: final payload, optional review flag, token
    /// release.
    pub async fn record_processed(
        &self,
        id: &str,
        token: &str,
        extracted_json: &str,
        review_status: Option<&str>,
    ) -> Result<bool, DieselError> {
        let now = Utc::now().to_rfc3339();
        let updated = with_conn!(self.pool, conn => {
            diesel::update(
                documents::table
                    .filter(documents::id.eq(id).and(documents::run_token.eq(token))),
            )
            .set((
                documents::status.eq(DocumentStatus::Processed.as_str()),
                documents::extracted_data.eq(extracted_json),
                documents::review_status.eq(review_status),
                documents::error_state.eq(None::<String>),
                documents::error_kind.eq(None::<String>),
                documents::error_cause.eq(None::<String>),
                documents::run_token.eq(None::<String>),
                documents::version.eq(documents::version + 1),
                documents::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?
        });
        Ok(updated > 0)
    }

    /// Write one extraction task's slice.
    ///
    /// The document-row version bump is conditioned on the run token, so a
    /// late write from a superseded run is rejected before it can touch the
    /// section table. Slices merge by section key; sibling slices are never
    /// clobbered.
    pub async fn write_section(
        &self,
        id: &str,
        token: &str,
        section: &str,
        payload_json: &str,
    ) -> Result<bool, DieselError> {
        let now = Utc::now().to_rfc3339();
        with_conn!(self.pool, conn => {
            let owned = diesel::update(
                documents::table
                    .filter(documents::id.eq(id).and(documents::run_token.eq(token))),
            )
            .set((
                documents::version.eq(documents::version + 1),
                documents::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?;
            if owned == 0 {
                return Ok(false);
            }

            diesel::insert_into(extraction_sections::table)
                .values(&NewSection {
                    document_id: id,
                    section,
                    run_token: token,
                    payload: payload_json,
                    updated_at: &now,
                })
                .on_conflict((
                    extraction_sections::document_id,
                    extraction_sections::section,
                ))
                .do_update()
                .set((
                    extraction_sections::run_token.eq(token),
                    extraction_sections::payload.eq(payload_json),
                    extraction_sections::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .await?;
            Ok(true)
        })
    }

    /// All slices written by the given run, keyed by section.
    pub async fn sections_for_run(
        &self,
        id: &str,
        token: &str,
    ) -> Result<Vec<(String, serde_json::Value)>, DieselError> {
        let rows: Vec<(String, String)> = with_conn!(self.pool, conn => {
            extraction_sections::table
                .filter(
                    extraction_sections::document_id
                        .eq(id)
                        .and(extraction_sections::run_token.eq(token)),
                )
                .order(extraction_sections::section.asc())
                .select((extraction_sections::section, extraction_sections::payload))
                .load(&mut conn)
                .await?
        });
        rows.into_iter()
            .map(|(section, payload)| {
                serde_json::from_str(&payload)
                    .map(|value| (section, value))
                    .map_err(|e| DieselError::DeserializationError(Box::new(e)))
            })
            .collect()
    }

    /// Drop slices left behind by superseded runs. Called only after a run
    /// completes successfully; failed runs keep all slices for forensics.
    pub async fn delete_stale_sections(&self, id: &str, token: &str) -> Result<usize, DieselError> {
        with_conn!(self.pool, conn => {
            Ok(diesel::delete(
                extraction_sections::table.filter(
                    extraction_sections::document_id
                        .eq(id)
                        .and(extraction_sections::run_token.ne(token)),
                ),
            )
            .execute(&mut conn)
            .await?)
        })
    }

    // ========================================================================
    // Review writes (version-conditioned)
    // ========================================================================

    /// Apply a review decision, conditioned on the caller's observed version.
    pub async fn apply_review(
        &self,
        id: &str,
        expected_version: i64,
        review_status: &str,
        reviewed_by: &str,
        notes: Option<&str>,
    ) -> Result<bool, DieselError> {
        let now = Utc::now().to_rfc3339();
        let updated = with_conn!(self.pool, conn => {
            diesel::update(
                documents::table.filter(
                    documents::id
                        .eq(id)
                        .and(documents::version.eq(expected_version)),
                ),
            )
            .set((
                documents::review_status.eq(review_status),
                documents::reviewed_by.eq(reviewed_by),
                documents::reviewed_at.eq(&now),
                documents::review_notes.eq(notes),
                documents::version.eq(documents::version + 1),
                documents::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?
        });
        Ok(updated > 0)
    }

    /// Apply a field correction, conditioned on the caller's observed
    /// version. `review_change` is None to leave review status untouched,
    /// or Some(new_value) when revalidation dictates a change.
    pub async fn apply_correction(
        &self,
        id: &str,
        expected_version: i64,
        extracted_json: &str,
        review_change: Option<Option<&str>>,
    ) -> Result<bool, DieselError> {
        let now = Utc::now().to_rfc3339();
        let updated = with_conn!(self.pool, conn => {
            let target = documents::table.filter(
                documents::id
                    .eq(id)
                    .and(documents::version.eq(expected_version)),
            );
            match review_change {
                Some(review_status) => {
                    diesel::update(target)
                        .set((
                            documents::extracted_data.eq(extracted_json),
                            documents::review_status.eq(review_status),
                            documents::version.eq(documents::version + 1),
                            documents::updated_at.eq(&now),
                        ))
                        .execute(&mut conn)
                        .await?
                }
                None => {
                    diesel::update(target)
                        .set((
                            documents::extracted_data.eq(extracted_json),
                            documents::version.eq(documents::version + 1),
                            documents::updated_at.eq(&now),
                        ))
                        .execute(&mut conn)
                        .await?
                }
            }
        });
        Ok(updated > 0)
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Append one event to the log. Events are never mutated or deleted.
    pub async fn append_event(
        &self,
        document_id: &str,
        run_token: Option<&str>,
        kind: &str,
        stage: Option<&str>,
        task: Option<&str>,
        total_tasks: Option<i32>,
        message: &str,
    ) -> Result<(), DieselError> {
        let now = Utc::now().to_rfc3339();
        with_conn!(self.pool, conn => {
            diesel::insert_into(processing_events::table)
                .values(&NewEvent {
                    document_id,
                    run_token,
                    kind,
                    stage,
                    task,
                    total_tasks,
                    message,
                    created_at: &now,
                })
                .execute(&mut conn)
                .await?;
        });
        Ok(())
    }

    /// Events belonging to one run, in append order.
    pub async fn events_for_run(
        &self,
        document_id: &str,
        run_token: &str,
    ) -> Result<Vec<ProcessingEvent>, DieselError> {
        let records: Vec<EventRecord> = with_conn!(self.pool, conn => {
            processing_events::table
                .filter(
                    processing_events::document_id
                        .eq(document_id)
                        .and(processing_events::run_token.eq(run_token)),
                )
                .order(processing_events::id.asc())
                .load(&mut conn)
                .await?
        });
        records.into_iter().map(EventRecord::into_domain).collect()
    }

    /// Full event history for a document (all runs plus review actions).
    pub async fn events_for(&self, document_id: &str) -> Result<Vec<ProcessingEvent>, DieselError> {
        let records: Vec<EventRecord> = with_conn!(self.pool, conn => {
            processing_events::table
                .filter(processing_events::document_id.eq(document_id))
                .order(processing_events::id.asc())
                .load(&mut conn)
                .await?
        });
        records.into_iter().map(EventRecord::into_domain).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::DbContext;
    use tempfile::tempdir;

    async fn setup() -> (DocumentRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let ctx = DbContext::from_sqlite_path(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        (ctx.documents(), dir)
    }

    fn params<'a>(id: &'a str, hash: &'a str) -> AdmissionParams<'a> {
        AdmissionParams {
            document_id: id,
            content_hash: hash,
            original_filename: Some("statement.pdf"),
            mime_type: "application/pdf",
            file_size: 1024,
            storage_path: "incoming/statement.pdf",
            initial_status: DocumentStatus::Pending,
        }
    }

    #[tokio::test]
    async fn test_admit_then_duplicate() {
        let (repo, _dir) = setup().await;

        let first = repo.admit(params("doc-1", "hash-a")).await.unwrap();
        assert_eq!(
            first,
            Admission::Admitted {
                document_id: "doc-1".to_string()
            }
        );

        let second = repo.admit(params("doc-2", "hash-a")).await.unwrap();
        assert_eq!(
            second,
            Admission::Duplicate {
                existing_id: "doc-1".to_string()
            }
        );

        // The duplicate attempt created no row.
        assert!(repo.get("doc-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_admit_revives_abandoned_failure() {
        let (repo, _dir) = setup().await;
        repo.admit(params("doc-1", "hash-a")).await.unwrap();

        // Fail the run and release the token.
        assert!(repo.claim_initial_run("doc-1", "run-1").await.unwrap());
        assert!(repo
            .record_failure("doc-1", "run-1", "classify", "stage", "boom")
            .await
            .unwrap());

        let readmit = repo.admit(params("doc-9", "hash-a")).await.unwrap();
        assert_eq!(
            readmit,
            Admission::Admitted {
                document_id: "doc-1".to_string()
            }
        );
        let doc = repo.get("doc-1").await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Pending);
        assert!(doc.failure.is_none());
    }

    #[tokio::test]
    async fn test_run_claim_is_exclusive() {
        let (repo, _dir) = setup().await;
        repo.admit(params("doc-1", "hash-a")).await.unwrap();

        assert!(repo.claim_initial_run("doc-1", "run-1").await.unwrap());
        assert!(!repo.claim_initial_run("doc-1", "run-2").await.unwrap());

        // Stage writes from the loser are rejected.
        assert!(!repo
            .advance_status("doc-1", "run-2", DocumentStatus::Extracting)
            .await
            .unwrap());
        assert!(repo
            .advance_status("doc-1", "run-1", DocumentStatus::Extracting)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_section_writes_merge_by_key() {
        let (repo, _dir) = setup().await;
        repo.admit(params("doc-1", "hash-a")).await.unwrap();
        repo.claim_initial_run("doc-1", "run-1").await.unwrap();

        assert!(repo
            .write_section("doc-1", "run-1", "rates", r#"{"base":"SOFR"}"#)
            .await
            .unwrap());
        assert!(repo
            .write_section("doc-1", "run-1", "fees", r#"{"commitment":0.25}"#)
            .await
            .unwrap());

        let sections = repo.sections_for_run("doc-1", "run-1").await.unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].0, "fees");
        assert_eq!(sections[1].0, "rates");

        // Stale-run write is rejected and does not clobber anything.
        assert!(!repo
            .write_section("doc-1", "run-0", "rates", r#"{"base":"LIBOR"}"#)
            .await
            .unwrap());
        let sections = repo.sections_for_run("doc-1", "run-1").await.unwrap();
        assert_eq!(sections[1].1["base"], "SOFR");
    }

    #[tokio::test]
    async fn test_version_conditioned_review_write() {
        let (repo, _dir) = setup().await;
        repo.admit(params("doc-1", "hash-a")).await.unwrap();
        let doc = repo.get("doc-1").await.unwrap().unwrap();

        assert!(repo
            .apply_review(&doc.id, doc.version, "approved", "alice", None)
            .await
            .unwrap());
        // Same expected version again: lost update detected.
        assert!(!repo
            .apply_review(&doc.id, doc.version, "rejected", "bob", Some("late"))
            .await
            .unwrap());

        let doc = repo.get("doc-1").await.unwrap().unwrap();
        assert_eq!(doc.reviewed_by.as_deref(), Some("alice"));
        assert_eq!(doc.version, 2);
    }

    #[tokio::test]
    async fn test_event_log_append_order() {
        let (repo, _dir) = setup().await;
        repo.admit(params("doc-1", "hash-a")).await.unwrap();

        repo.append_event("doc-1", Some("run-1"), "run_started", None, None, None, "run started")
            .await
            .unwrap();
        repo.append_event(
            "doc-1",
            Some("run-1"),
            "stage_started",
            Some("classification"),
            None,
            Some(1),
            "classification started",
        )
        .await
        .unwrap();
        repo.append_event("doc-1", None, "review", None, None, None, "approved by alice")
            .await
            .unwrap();

        let run_events = repo.events_for_run("doc-1", "run-1").await.unwrap();
        assert_eq!(run_events.len(), 2);
        assert!(run_events[0].id < run_events[1].id);

        let all = repo.events_for("doc-1").await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_list_pagination_cursor() {
        let (repo, _dir) = setup().await;
        for i in 0..5 {
            repo.admit(params(&format!("doc-{i}"), &format!("hash-{i}")))
                .await
                .unwrap();
        }

        let first_page = repo.list(None, 2, None).await.unwrap();
        assert_eq!(first_page.len(), 2);

        let last = first_page.last().unwrap();
        let cursor_created = last.created_at.to_rfc3339();
        let second_page = repo
            .list(None, 10, Some((&cursor_created, &last.id)))
            .await
            .unwrap();
        assert_eq!(second_page.len(), 3);
        for doc in &second_page {
            assert!(first_page.iter().all(|d| d.id != doc.id));
        }
    }
}
