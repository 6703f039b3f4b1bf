//! Application orchestrator.
//!
//! Moves one application through at most one phase per call:
//! - loads the application and takes the advisory lock with a revision CAS
//! - enforces the API call budget
//! - runs the phase through the [`PhaseExecutor`](crate::phase::PhaseExecutor)
//! - writes the transition (or retry/failure) with a second CAS

mod config;
mod runner;
mod types;

pub use config::OrchestratorConfig;
pub use runner::Orchestrator;
pub use types::{OrchestrationOutcome, OrchestratorError};
