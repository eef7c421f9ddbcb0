//! `pushrelay-scheduler` — in-process job scheduler with SQLite persistence.
//!
//! # Overview
//!
//! An [`Entry`] binds a [`Schedule`] (when) to a [`Job`] (what). The
//! [`Scheduler`] hands its entries to a single loop task that sleeps until the
//! earliest fire time, dispatches every due job on its own tokio task, asks
//! each schedule for its next time and drops the exhausted ones. Adding,
//! removing and listing while running go through channels to that loop.
//!
//! Durability is opt-in: [`DurableEntryList`] keeps entries in an
//! [`EntryStore`] and [`StoreObserver`] writes fire-time updates through.
//! Persistable variants are rebuilt on restart via the type-tag [`Registry`].
//!
//! # Built-in variants
//!
//! | Tag               | Kind     | Behaviour                                  |
//! |-------------------|----------|--------------------------------------------|
//! | `one_time`        | schedule | Fires once at an absolute UTC instant      |
//! | `every`           | schedule | Fires every interval, optionally N times   |
//! | `push_to_session` | job      | POSTs a JSON envelope to a callback URL    |

pub mod db;
pub mod engine;
pub mod entry;
pub mod error;
pub mod job;
pub mod observer;
pub mod persist;
pub mod push;
pub mod registry;
pub mod schedule;
pub mod store;

#[cfg(test)]
mod testing;

pub use engine::Scheduler;
pub use entry::{Entry, EntryId, EntryList, MemoryEntryList};
pub use error::{Result, SchedulerError};
pub use job::{DelayIfStillRunning, FuncJob, Job, JobExt, SkipIfStillRunning};
pub use observer::{Observer, TracingObserver};
pub use persist::{DurableEntryList, StoreObserver};
pub use push::{init_http_client, PushToSession};
pub use registry::{Loadable, Record, Registry, Saveable};
pub use schedule::{Every, OneTime, Schedule};
pub use store::{EntryRecord, EntryStore, SqliteStore};
