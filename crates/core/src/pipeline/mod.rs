//! The batch stages and the runner that drives them.

mod fetch;
mod launcher;
mod monitor;
mod runner;
mod types;
mod verifier;

pub use fetch::{ArtifactFetcher, FetchError, FetchOutcome};
pub use launcher::{JobLauncher, LaunchAction, LaunchError, LAUNCHABLE};
pub use monitor::{JobMonitor, LookupError, MonitorError, PollOutcome};
pub use runner::BatchRunner;
pub use types::*;
pub use verifier::{InputVerifier, VerifyError, VerifyOutcome};
