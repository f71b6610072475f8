//! Local ingestion command: push a file through the dedup gate and the
//! pipeline without a browser client.

use std::path::Path;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Settings;
use crate::server::AppState;
use crate::services::IngestOutcome;

/// Ingest one local PDF.
pub async fn cmd_ingest(settings: &Settings, file: &Path, wait: bool) -> anyhow::Result<()> {
    std::fs::create_dir_all(&settings.data_dir)?;
    let ctx = settings.create_db_context();
    ctx.init_schema().await?;

    let state = AppState::new(settings);

    println!("{} Ingesting {}", style("→").cyan(), file.display());
    let outcome = state.ingest.ingest_file(file).await?;

    let document_id = match outcome {
        IngestOutcome::Started { document_id } => {
            println!(
                "  {} Admitted as {} - pipeline run started",
                style("✓").green(),
                document_id
            );
            document_id
        }
        IngestOutcome::Duplicate { existing_id } => {
            println!(
                "  {} Duplicate content - already tracked as {}",
                style("≡").yellow(),
                existing_id
            );
            return Ok(());
        }
        IngestOutcome::Skipped { document_id } => {
            println!(
                "  {} Content is not a PDF - recorded as skipped ({})",
                style("✗").red(),
                document_id
            );
            return Ok(());
        }
    };

    if !wait {
        println!(
            "  Check progress with: finpipe status {} --server http://{}:{}",
            document_id, settings.server.host, settings.server.port
        );
        return Ok(());
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));

    loop {
        let Some(doc) = state.repo.get(&document_id).await? else {
            anyhow::bail!("document {document_id} disappeared mid-run");
        };
        spinner.set_message(format!("status: {}", doc.status.as_str()));
        if doc.status.is_terminal() {
            spinner.finish_and_clear();
            match doc.failure {
                Some(failure) => println!(
                    "  {} Run failed in {}: {}",
                    style("✗").red(),
                    failure.state,
                    failure.cause
                ),
                None => println!(
                    "  {} Run finished with status {}{}",
                    style("✓").green(),
                    doc.status.as_str(),
                    match doc.review_status {
                        Some(review) => format!(" (review: {})", review.as_str()),
                        None => String::new(),
                    }
                ),
            }
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}
