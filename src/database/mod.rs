//! Database module

pub mod operations;
pub mod schema;

// Re-export for convenience
pub use operations::{DatabaseManager, DownloadRecord, DownloadStore, TaskOutcome, DEFAULT_LIST_LIMIT};
pub use schema::initialize_database;
