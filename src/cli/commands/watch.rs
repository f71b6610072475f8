//! Terminal work queue: attention-ordered listing with adaptive polling.

use std::sync::Arc;

use chrono::Utc;
use console::style;

use crate::config::Settings;
use crate::dashboard::{HttpQueueApi, QueueEntry, SuggestedAction, WorkQueue};

/// Poll the server's document list and render the ordered work queue until
/// interrupted.
pub async fn cmd_watch(settings: &Settings, server: &str) -> anyhow::Result<()> {
    let api = Arc::new(HttpQueueApi::new(server));
    let mut queue = WorkQueue::new(
        api,
        settings.polling,
        settings.pipeline.min_confidence,
    );

    println!(
        "{} Watching work queue at {} (Ctrl+C to stop)",
        style("→").cyan(),
        server
    );

    loop {
        match queue.refresh(Utc::now()).await {
            Ok(snapshot) => {
                println!();
                if snapshot.entries.is_empty() {
                    println!("  (queue empty)");
                }
                for entry in &snapshot.entries {
                    print_entry(entry);
                }
                tokio::time::sleep(snapshot.next_delay).await;
            }
            Err(e) => {
                println!("  {} fetch failed: {e}", style("!").red());
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        }
    }
}

fn print_entry(entry: &QueueEntry) {
    let marker = if entry.placeholder {
        style("…").dim()
    } else {
        match entry.status.as_str() {
            "failed" => style("✗").red(),
            "processed" => style("✓").green(),
            "skipped" => style("-").dim(),
            _ => style("●").cyan(),
        }
    };
    let review = entry
        .review_status
        .map(|r| format!(" [{}]", r.as_str()))
        .unwrap_or_default();
    let action = match entry.action {
        Some(SuggestedAction::Reprocess) => "  → retry available",
        Some(SuggestedAction::ConfigureNewType) => "  → configure new document type",
        Some(SuggestedAction::Review) => "  → needs review",
        None => "",
    };
    println!(
        "  {marker} {:<36} {:<12}{review}{action}",
        entry.title,
        entry.status.as_str()
    );
}
