//! Persistence layer: the storage collaborator behind the pipeline.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use memory::InMemoryStore;
pub use traits::{SignalRecord, SlotChange, StoreCommit, SubmissionStore};
