//! CLI parser and command dispatch.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "finpipe")]
#[command(about = "Financial document extraction pipeline and review server")]
#[command(version)]
pub struct Cli {
    /// Config file path (defaults to ./finpipe.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (overrides config file)
    #[arg(short = 't', long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Start the API server
    Serve {
        /// Bind address: a port, a host, or host:port
        #[arg(default_value = "127.0.0.1:3050")]
        bind: String,
    },

    /// Ingest a local PDF through the dedup gate and the pipeline
    Ingest {
        /// Path to the PDF file
        file: PathBuf,
        /// Wait for the run to reach a terminal status
        #[arg(short, long)]
        wait: bool,
    },

    /// Show a document's stage projection from a running server
    Status {
        document_id: String,
        /// Keep polling until the document reaches a terminal status
        #[arg(short, long)]
        follow: bool,
        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:3050")]
        server: String,
    },

    /// Watch the attention-ordered work queue from a running server
    Watch {
        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:3050")]
        server: String,
    },
}

/// Parse arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        settings.data_dir = data_dir;
    }

    match cli.command {
        Commands::Init => commands::cmd_init(&settings).await,
        Commands::Serve { bind } => commands::cmd_serve(&settings, &bind).await,
        Commands::Ingest { file, wait } => commands::cmd_ingest(&settings, &file, wait).await,
        Commands::Status {
            document_id,
            follow,
            server,
        } => commands::cmd_status(&settings, &server, &document_id, follow).await,
        Commands::Watch { server } => commands::cmd_watch(&settings, &server).await,
    }
}
