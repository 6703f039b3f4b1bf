//! Stalled-job sweeper.
//!
//! Finds applications stuck in a processing status, resets them to
//! `queued` at the cost of one attempt and re-triggers the orchestrator.

mod config;
mod runner;
mod types;

pub use config::SweeperConfig;
pub use runner::StalledJobSweeper;
pub use types::{RecoverErrorsReport, SweepError, SweepReport};
