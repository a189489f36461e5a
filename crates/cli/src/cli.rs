//! Command-line interface for the workbook batch runner.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Verify referral inputs, launch workbook jobs and collect their reports.
#[derive(Debug, Parser)]
#[command(name = "workbooks", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Platform API token.
    #[arg(long, env = "WORKBOOKS_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Configuration file.
    #[arg(
        long,
        env = "WORKBOOKS_CONFIG",
        global = true,
        default_value = "workbooks.toml"
    )]
    pub config: PathBuf,

    /// Process at most `run.test_batch_size` records per stage.
    #[arg(long, global = true, default_value_t = false)]
    pub testing: bool,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Write Prometheus text metrics here when the command finishes.
    #[arg(long, global = true)]
    pub metrics_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the whole batch: verify, launch, wait, monitor and optionally fetch.
    Run {
        /// Download finished workbooks into this directory.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Monitor straight after launching instead of waiting.
        #[arg(long, default_value_t = false)]
        no_wait: bool,
    },

    /// Check uploaded input documents against their referral.
    Verify,

    /// Launch jobs for verified records.
    Launch,

    /// Poll running jobs and record their artifacts.
    Monitor,

    /// Download ready workbooks.
    Fetch {
        /// Destination directory (default: `fetch.output_dir`).
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Find the finished job that was given an input document.
    Lookup {
        /// Input document id.
        #[arg(long)]
        input: String,

        /// Record the job's artifact against this referral.
        #[arg(long)]
        referral: Option<String>,

        /// Project to search (default: `job.output_project`).
        #[arg(long)]
        project: Option<String>,
    },

    /// Show record counts per status.
    Status,

    /// Register an uploaded input document for a referral.
    Register {
        #[arg(long)]
        referral: String,

        #[arg(long)]
        input: String,
    },
}

impl Command {
    /// Whether the command talks to the platform.
    pub fn needs_platform(&self) -> bool {
        !matches!(self, Command::Status | Command::Register { .. })
    }
}
