use thiserror::Error;

use crate::entry::EntryId;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A record column could not be (de)serialized as JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No variant is registered under this type tag.
    #[error("unknown {kind} type: {tag}")]
    UnknownType { kind: &'static str, tag: String },

    /// A variant with this type tag is already registered.
    #[error("duplicate {kind} type: {tag}")]
    DuplicateType { kind: &'static str, tag: String },

    /// A saved record is missing a key or holds a value of the wrong type.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// No persisted entry with this id.
    #[error("Entry not found: {id}")]
    EntryNotFound { id: EntryId },

    /// The entry's schedule or job has no persistent form.
    #[error("Entry {id} is not persistable")]
    NotPersistable { id: EntryId },

    /// Configuration was attempted after `run()`.
    #[error("Scheduler is running")]
    Running,

    /// The scheduler loop has exited and cannot be restarted.
    #[error("Scheduler is stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
