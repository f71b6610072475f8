//! One-shot (or followed) status projection for a single document.

use console::style;

use crate::config::Settings;
use crate::dashboard::{HttpQueueApi, QueueApi, StatusWatcher};
use crate::models::{StageDescriptor, StageState};

/// Print a document's stage projection; with `--follow`, keep polling on the
/// fixed status interval until the run reaches a terminal state.
pub async fn cmd_status(
    settings: &Settings,
    server: &str,
    document_id: &str,
    follow: bool,
) -> anyhow::Result<()> {
    let api = HttpQueueApi::new(server);

    if follow {
        let watcher = StatusWatcher::from_config(&settings.polling);
        let mut last_status = None;
        let doc = watcher
            .wait_for_terminal(&api, document_id, |doc| {
                if last_status != Some(doc.status) {
                    println!("{} status: {}", style("→").cyan(), doc.status.as_str());
                    last_status = Some(doc.status);
                }
            })
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        println!(
            "{} terminal status: {}",
            style("✓").green(),
            doc.status.as_str()
        );
    }

    let status = api
        .document_status(document_id)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    if let Some(document_type) = &status.document_type {
        println!("type:    {document_type}");
    }
    if let Some(started) = status.started_at {
        println!("started: {}", started.to_rfc3339());
    }
    print_stage("classification", &status.stages.classification);
    print_stage("extraction", &status.stages.extraction);
    print_stage("normalization", &status.stages.normalization);
    Ok(())
}

fn print_stage(name: &str, descriptor: &StageDescriptor) {
    let marker = match descriptor.status {
        StageState::Completed => style("✓").green(),
        StageState::Failed => style("✗").red(),
        StageState::InProgress => style("…").cyan(),
        StageState::Pending => style("·").dim(),
    };
    let progress = descriptor
        .progress
        .as_ref()
        .map(|p| format!(" {}/{}", p.completed, p.total))
        .unwrap_or_default();
    let elapsed = descriptor
        .elapsed_seconds
        .map(|s| format!(" ({s}s)"))
        .unwrap_or_default();
    println!("{marker} {name}{progress}{elapsed}");
}
