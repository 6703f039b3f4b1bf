//! Per-application API budget.
//!
//! Every external call is appended to the [`ApiCallLog`]; the
//! [`BudgetLedger`] counts those entries inside a rolling window and blocks
//! applications that have spent their allowance.

mod call_log;
mod config;
mod ledger;
mod types;

pub use call_log::{ApiCallLog, CallLogError, SqliteApiCallLog};
pub use config::BudgetConfig;
pub use ledger::BudgetLedger;
pub use types::{BudgetError, BudgetStatus};
