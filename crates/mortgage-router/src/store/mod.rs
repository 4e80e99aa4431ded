//! Backends for the identity, application, and assignment traits.
//!
//! [`MemoryStore`] keeps every table behind one mutex and backs the test suite and the demo;
//! [`SqliteStore`] persists to a SQLite file and runs multi-row writes in transactions.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
