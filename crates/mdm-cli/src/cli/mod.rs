use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use mdm_core::config;
use mdm_core::job_store::JobKind;
use mdm_core::orchestrator::Orchestrator;

mod commands;
pub mod control_socket;

/// Top-level CLI for the mdm media download manager.
#[derive(Debug, Parser)]
#[command(name = "mdm")]
#[command(about = "mdm: self-hosted media download manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Auto,
    File,
    Hls,
    Youtube,
    Twitter,
    Pinterest,
}

impl From<KindArg> for JobKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Auto => JobKind::Auto,
            KindArg::File => JobKind::File,
            KindArg::Hls => JobKind::Hls,
            KindArg::Youtube => JobKind::Youtube,
            KindArg::Twitter => JobKind::Twitter,
            KindArg::Pinterest => JobKind::Pinterest,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Submit a new download job.
    Add {
        /// HTTP/HTTPS URL of the media to download.
        url: String,

        /// Resource kind; auto infers from the URL.
        #[arg(long, value_enum, default_value = "auto")]
        kind: KindArg,

        /// Preferred output filename (sanitized).
        #[arg(long)]
        filename: Option<String>,

        /// Full submission options as a JSON object (headers, transcode,
        /// twitter, pinterest). Overrides --filename.
        #[arg(long)]
        options: Option<String>,
    },

    /// Run the worker loop: reconcile, then process queued jobs.
    Run {
        /// Keep serving after the queue drains instead of exiting.
        #[arg(long)]
        serve: bool,
    },

    /// Show jobs, newest first.
    Status {
        /// Filter by status (queued, running, paused, completed, failed, cancelled).
        #[arg(long)]
        status: Option<String>,

        /// Case-insensitive substring over URL and filename.
        #[arg(long)]
        search: Option<String>,

        /// Page size (0 = all).
        #[arg(long, default_value_t = 0)]
        limit: i64,
    },

    /// Cancel a job by id (queued, paused, or running).
    Cancel {
        /// Job identifier.
        id: String,
    },

    /// Pause a running job by id.
    Pause {
        /// Job identifier.
        id: String,
    },

    /// Resume a paused job by id.
    Resume {
        /// Job identifier.
        id: String,
    },

    /// Retry a failed or cancelled job by id.
    Retry {
        /// Job identifier.
        id: String,
    },

    /// Remove a finished job's record by id.
    Remove {
        /// Job identifier.
        id: String,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        let orchestrator = Orchestrator::open(cfg.clone()).await?;

        match cli.command {
            CliCommand::Add {
                url,
                kind,
                filename,
                options,
            } => commands::add::run(&orchestrator, url, kind.into(), filename, options).await,
            CliCommand::Run { serve } => commands::run::run(&orchestrator, &cfg, serve).await,
            CliCommand::Status {
                status,
                search,
                limit,
            } => commands::status::run(&orchestrator, status, search, limit).await,
            CliCommand::Cancel { id } => commands::cancel::run(&orchestrator, &cfg, &id).await,
            CliCommand::Pause { id } => commands::pause::run(&orchestrator, &cfg, &id).await,
            CliCommand::Resume { id } => commands::resume::run(&orchestrator, &id).await,
            CliCommand::Retry { id } => commands::retry::run(&orchestrator, &id).await,
            CliCommand::Remove { id } => commands::remove::run(&orchestrator, &id).await,
        }
    }
}

#[cfg(test)]
mod tests;
