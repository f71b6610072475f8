//! Optimistic placeholder registry.
//!
//! Covers the gap between "upload accepted" and "server record exists": a
//! placeholder is inserted with the upload's proposed document id and removed
//! the moment that id shows up in a server list fetch. Placeholders are
//! best-effort UX only - anything unreconciled after the TTL is dropped
//! unconditionally, because the server is the eventual source of truth.
//!
//! The registry is an explicit, injectable store with a single owner (the
//! work queue) and takes `now` as a parameter, so it is testable without
//! global state or fake timers.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

/// A Document-shaped stub awaiting its server record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub document_id: String,
    pub file_name: Option<String>,
    pub inserted_at: DateTime<Utc>,
}

/// Registry of unreconciled placeholders.
#[derive(Debug)]
pub struct PlaceholderRegistry {
    ttl: Duration,
    entries: HashMap<String, Placeholder>,
}

impl PlaceholderRegistry {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_seconds as i64),
            entries: HashMap::new(),
        }
    }

    /// Insert a placeholder at upload-accept time.
    pub fn add(&mut self, document_id: &str, file_name: Option<&str>, now: DateTime<Utc>) {
        self.entries.insert(
            document_id.to_string(),
            Placeholder {
                document_id: document_id.to_string(),
                file_name: file_name.map(String::from),
                inserted_at: now,
            },
        );
    }

    /// Reconcile against a successful list fetch: drop every placeholder
    /// whose id appears in the server result (same fetch cycle, no lag), and
    /// drop anything past its TTL as failed-to-materialize.
    ///
    /// Returns the ids that were reconciled.
    pub fn resolve<'a, I>(&mut self, server_ids: I, now: DateTime<Utc>) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut resolved = Vec::new();
        for id in server_ids {
            if self.entries.remove(id).is_some() {
                resolved.push(id.to_string());
            }
        }
        let ttl = self.ttl;
        self.entries
            .retain(|_, placeholder| now - placeholder.inserted_at <= ttl);
        resolved
    }

    /// Placeholders still waiting for a server record, oldest first.
    pub fn get_pending(&self, now: DateTime<Utc>) -> Vec<Placeholder> {
        let mut pending: Vec<Placeholder> = self
            .entries
            .values()
            .filter(|p| now - p.inserted_at <= self.ttl)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.inserted_at
                .cmp(&b.inserted_at)
                .then_with(|| a.document_id.cmp(&b.document_id))
        });
        pending
    }

    /// Whether any live placeholder is still pending.
    pub fn has_pending(&self, now: DateTime<Utc>) -> bool {
        self.entries
            .values()
            .any(|p| now - p.inserted_at <= self.ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn test_resolve_removes_on_same_fetch_cycle() {
        let mut registry = PlaceholderRegistry::new(60);
        registry.add("doc-1", Some("a.pdf"), at(0));
        registry.add("doc-2", Some("b.pdf"), at(0));

        // doc-1 materialized: it must disappear on this very cycle.
        let resolved = registry.resolve(["doc-1", "doc-9"].into_iter(), at(5));
        assert_eq!(resolved, vec!["doc-1".to_string()]);
        assert!(!registry
            .get_pending(at(5))
            .iter()
            .any(|p| p.document_id == "doc-1"));
        assert!(registry.has_pending(at(5)));
    }

    #[test]
    fn test_ttl_expiry_drops_unconditionally() {
        let mut registry = PlaceholderRegistry::new(60);
        registry.add("doc-1", None, at(0));

        assert!(registry.has_pending(at(60)));
        registry.resolve(std::iter::empty(), at(61));
        assert!(!registry.has_pending(at(61)));
        assert!(registry.get_pending(at(61)).is_empty());
    }

    #[test]
    fn test_pending_is_oldest_first_and_deterministic() {
        let mut registry = PlaceholderRegistry::new(60);
        registry.add("doc-b", None, at(10));
        registry.add("doc-a", None, at(10));
        registry.add("doc-c", None, at(5));

        let pending = registry.get_pending(at(20));
        let ids: Vec<&str> = pending.iter().map(|p| p.document_id.as_str()).collect();
        assert_eq!(ids, vec!["doc-c", "doc-a", "doc-b"]);
    }

    #[test]
    fn test_re_add_refreshes_insertion_time() {
        let mut registry = PlaceholderRegistry::new(60);
        registry.add("doc-1", None, at(0));
        registry.add("doc-1", None, at(50));
        // Still alive at 70 because the second add reset the clock.
        assert!(registry.has_pending(at(70)));
    }
}
