//! Dispatch pool: runs one orchestration step for every due application.

mod config;
mod pool;
mod types;

pub use config::DispatchConfig;
pub(crate) use pool::join_error_message;
pub use pool::DispatchPool;
pub use types::{DispatchError, DispatchOutcome, DispatchReport, DispatchResult};
