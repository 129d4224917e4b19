//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use pump_traits::CommError;
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "podctl", version, about = "Pod pump manager CLI (simulated pod)")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/pump_config.toml")]
    pub config: PathBuf,

    /// Print results and errors as JSON instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Make the simulated pod fail the next exchange
    #[arg(long = "fail-next", value_enum, value_name = "FAULT")]
    pub fail_next: Option<Fault>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Faults the simulated pod can inject.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum Fault {
    /// Command never sent: link down
    NotConnected,
    /// Command refused by the pod
    Rejected,
    /// Command sent, acknowledgement lost
    NoResponse,
    /// Command sent, link dropped mid-exchange
    Transport,
}

impl From<Fault> for CommError {
    fn from(f: Fault) -> Self {
        match f {
            Fault::NotConnected => CommError::NotConnected,
            Fault::Rejected => CommError::Rejected("injected fault".into()),
            Fault::NoResponse => CommError::NoResponse,
            Fault::Transport => CommError::Transport("injected fault".into()),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show delivery status without talking to the pod
    Status,
    /// Make sure pump data is fresh, asking the pod if needed
    Refresh,
    /// Deliver a bolus
    Bolus {
        /// Units of insulin (rounded down to 0.05 U)
        #[arg(long)]
        units: f64,
    },
    /// Stop the running bolus
    CancelBolus,
    /// Replace any running temp basal
    TempBasal {
        /// Rate in U/hr (rounded down to 0.05 U/hr)
        #[arg(long)]
        rate: f64,
        /// Duration in minutes (rounded down to 30-minute steps; 0 only cancels)
        #[arg(long)]
        minutes: u64,
    },
    /// Stop the running temp basal
    CancelTempBasal,
    /// Suspend all delivery
    Suspend,
    /// Resume scheduled basal delivery
    Resume,
    /// Program a new daily basal schedule (from CSV, else from the config)
    SetBasal {
        /// Basal schedule CSV (strict header: start_minutes,units_per_hour)
        #[arg(long, value_name = "FILE")]
        csv: Option<PathBuf>,
    },
    /// List dose records in the ledger
    Ledger,
    /// Forget the current pod (no command is sent)
    Discard,
    /// Start a fresh simulated pod and read its status
    Activate,
}
