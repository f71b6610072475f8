//! Attention-based work queue ordering.
//!
//! Documents are bucketed failed > actively processing > pending review >
//! settled, then time-ordered within the bucket: failed and settled newest
//! first, in-flight and pending-review oldest first (FIFO fairness for
//! queued work). Ordering is a pure function of the entry list with an id
//! tie-break, so the same input always yields the same order.

use crate::models::{DocumentStatus, ReviewStatus};

use super::QueueEntry;

/// Coarse priority class: lower is more urgent.
pub const BUCKET_FAILED: u8 = 0;
pub const BUCKET_PROCESSING: u8 = 1;
pub const BUCKET_PENDING_REVIEW: u8 = 2;
pub const BUCKET_SETTLED: u8 = 3;

/// Which attention bucket a document falls into.
pub fn attention_bucket(status: DocumentStatus, review_status: Option<ReviewStatus>) -> u8 {
    if status == DocumentStatus::Failed {
        BUCKET_FAILED
    } else if status.is_active() {
        BUCKET_PROCESSING
    } else if review_status == Some(ReviewStatus::PendingReview) {
        BUCKET_PENDING_REVIEW
    } else {
        BUCKET_SETTLED
    }
}

/// Sort entries by attention bucket, then bucket-specific time order, then
/// id.
pub fn order_entries(entries: &mut [QueueEntry]) {
    entries.sort_by(|a, b| {
        let bucket_a = attention_bucket(a.status, a.review_status);
        let bucket_b = attention_bucket(b.status, b.review_status);
        bucket_a
            .cmp(&bucket_b)
            .then_with(|| match bucket_a {
                // Fresh failures and fresh results float to the top...
                BUCKET_FAILED | BUCKET_SETTLED => b.created_at.cmp(&a.created_at),
                // ...while queued work drains first-in-first-out.
                _ => a.created_at.cmp(&b.created_at),
            })
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn entry(
        id: &str,
        status: DocumentStatus,
        review: Option<ReviewStatus>,
        created: i64,
    ) -> QueueEntry {
        QueueEntry {
            document_id: id.to_string(),
            title: id.to_string(),
            status,
            review_status: review,
            placeholder: false,
            action: None,
            created_at: at(created),
        }
    }

    #[test]
    fn test_bucket_assignment() {
        assert_eq!(attention_bucket(DocumentStatus::Failed, None), BUCKET_FAILED);
        assert_eq!(
            attention_bucket(DocumentStatus::Extracting, None),
            BUCKET_PROCESSING
        );
        assert_eq!(
            attention_bucket(
                DocumentStatus::Processed,
                Some(ReviewStatus::PendingReview)
            ),
            BUCKET_PENDING_REVIEW
        );
        assert_eq!(
            attention_bucket(DocumentStatus::Processed, Some(ReviewStatus::Approved)),
            BUCKET_SETTLED
        );
        assert_eq!(attention_bucket(DocumentStatus::Skipped, None), BUCKET_SETTLED);
    }

    #[test]
    fn test_bucket_precedence_ignores_timestamps() {
        // An old failure still outranks a brand-new pending-review document,
        // which outranks an even newer processed one.
        let mut entries = vec![
            entry("settled", DocumentStatus::Processed, None, 300),
            entry(
                "review",
                DocumentStatus::Processed,
                Some(ReviewStatus::PendingReview),
                200,
            ),
            entry("failed", DocumentStatus::Failed, None, 1),
        ];
        order_entries(&mut entries);
        let ids: Vec<&str> = entries.iter().map(|e| e.document_id.as_str()).collect();
        assert_eq!(ids, vec!["failed", "review", "settled"]);
    }

    #[test]
    fn test_time_order_per_bucket() {
        let mut entries = vec![
            entry("fail-old", DocumentStatus::Failed, None, 10),
            entry("fail-new", DocumentStatus::Failed, None, 90),
            entry("run-old", DocumentStatus::Extracting, None, 10),
            entry("run-new", DocumentStatus::Normalizing, None, 90),
        ];
        order_entries(&mut entries);
        let ids: Vec<&str> = entries.iter().map(|e| e.document_id.as_str()).collect();
        // Failed: newest first. Processing: oldest first.
        assert_eq!(ids, vec!["fail-new", "fail-old", "run-old", "run-new"]);
    }

    #[test]
    fn test_ordering_is_deterministic() {
        let make = || {
            vec![
                entry("b", DocumentStatus::Failed, None, 5),
                entry("a", DocumentStatus::Failed, None, 5),
                entry("c", DocumentStatus::Pending, None, 5),
            ]
        };
        let mut first = make();
        let mut second = make();
        order_entries(&mut first);
        order_entries(&mut second);
        let ids = |entries: &[QueueEntry]| {
            entries
                .iter()
                .map(|e| e.document_id.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
        // Equal timestamps fall back to id order.
        assert_eq!(ids(&first), vec!["a", "b", "c"]);
    }
}
