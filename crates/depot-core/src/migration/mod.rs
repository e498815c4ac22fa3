//! Bulk, resumable backend-to-backend migration.

mod engine;
mod state;

pub use engine::{
    ErrorCallback, MigrationConfig, MigrationEngine, MigrationOutcome, MigrationReport,
    ProgressCallback,
};
pub use state::MigrationState;
