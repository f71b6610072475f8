//! Adaptive poll scheduling.
//!
//! The next poll delay is a pure function of current queue state, decoupled
//! from the timer that drives it: an active pipeline deserves a short
//! interval, a queue that is only waiting on optimistic placeholders a
//! medium one, and an idle queue a long one. This avoids both busy-polling
//! an idle queue and under-polling an active one.

use std::time::Duration;

use crate::config::PollingConfig;
use crate::models::DocumentStatus;

/// Choose the delay before the next list poll.
pub fn next_poll_delay<I>(
    config: &PollingConfig,
    statuses: I,
    has_pending_placeholder: bool,
) -> Duration
where
    I: IntoIterator<Item = DocumentStatus>,
{
    let any_active = statuses.into_iter().any(|s| s.is_active());
    let millis = if any_active {
        config.active_ms
    } else if has_pending_placeholder {
        config.waiting_ms
    } else {
        config.idle_ms
    };
    Duration::from_millis(millis)
}

/// Whether a detail status watcher should keep polling this document.
pub fn should_keep_polling(status: DocumentStatus) -> bool {
    !status.is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PollingConfig {
        PollingConfig::default()
    }

    #[test]
    fn test_active_documents_win() {
        let statuses = vec![
            DocumentStatus::Processed,
            DocumentStatus::Extracting,
            DocumentStatus::Failed,
        ];
        assert_eq!(
            next_poll_delay(&config(), statuses, false),
            Duration::from_millis(config().active_ms)
        );
    }

    #[test]
    fn test_placeholder_only_is_medium() {
        let statuses = vec![DocumentStatus::Processed, DocumentStatus::Failed];
        assert_eq!(
            next_poll_delay(&config(), statuses, true),
            Duration::from_millis(config().waiting_ms)
        );
    }

    #[test]
    fn test_idle_is_long() {
        assert_eq!(
            next_poll_delay(&config(), vec![DocumentStatus::Processed], false),
            Duration::from_millis(config().idle_ms)
        );
        assert_eq!(
            next_poll_delay(&config(), std::iter::empty(), false),
            Duration::from_millis(config().idle_ms)
        );
    }

    #[test]
    fn test_watcher_stops_on_terminal() {
        assert!(should_keep_polling(DocumentStatus::Normalizing));
        assert!(should_keep_polling(DocumentStatus::Reprocessing));
        assert!(!should_keep_polling(DocumentStatus::Processed));
        assert!(!should_keep_polling(DocumentStatus::Failed));
        assert!(!should_keep_polling(DocumentStatus::Skipped));
    }
}
