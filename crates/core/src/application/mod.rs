//! Feasibility applications and their storage.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteApplicationStore;
pub use store::{ApplicationFilter, ApplicationStore, StalledFilter, StoreError};
pub use types::{
    Application, ApplicationStatus, CreateApplicationRequest, PhaseContent, UnknownStatus,
    API_BUDGET_EXCEEDED, BUDGET_EXCEEDED_FLAG, ORCHESTRATION_ABANDONED, RECOVERY_FLAG_PREFIX,
};
