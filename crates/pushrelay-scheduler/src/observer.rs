use std::fmt;

use tracing::{debug, error, info, warn};

use crate::entry::Entry;

/// A key/value pair attached to an observer message.
pub type Field<'a> = (&'a str, &'a dyn fmt::Display);

/// Receives scheduler lifecycle events.
///
/// Every callback runs on the scheduler's loop task. Implementations that do
/// I/O here (see [`crate::persist::StoreObserver`]) stall scheduling for the
/// duration of the call.
pub trait Observer: Send + Sync {
    fn info(&self, msg: &str, fields: &[Field<'_>]);

    fn warn(&self, msg: &str, fields: &[Field<'_>]) {
        self.info(msg, fields)
    }

    fn error(&self, err: &dyn std::error::Error, msg: &str, fields: &[Field<'_>]);

    fn entry_added(&self, _entry: &Entry) {}

    fn entry_removed(&self, _entry: &Entry) {}

    fn entry_updated(&self, _entry: &Entry) {}
}

/// Render fields as `key=value` pairs separated by spaces.
pub fn format_fields(fields: &[Field<'_>]) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Default observer: forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn info(&self, msg: &str, fields: &[Field<'_>]) {
        info!(fields = %format_fields(fields), "{msg}");
    }

    fn warn(&self, msg: &str, fields: &[Field<'_>]) {
        warn!(fields = %format_fields(fields), "{msg}");
    }

    fn error(&self, err: &dyn std::error::Error, msg: &str, fields: &[Field<'_>]) {
        error!(error = %err, fields = %format_fields(fields), "{msg}");
    }

    fn entry_added(&self, entry: &Entry) {
        debug!(entry_id = entry.id, next = ?entry.next, "entry added");
    }

    fn entry_removed(&self, entry: &Entry) {
        debug!(entry_id = entry.id, "entry removed");
    }

    fn entry_updated(&self, entry: &Entry) {
        debug!(entry_id = entry.id, next = ?entry.next, prev = ?entry.prev, "entry updated");
    }
}
