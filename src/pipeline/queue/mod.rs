//! Priority work queue, fed exclusively by admitted journal entries.

pub mod store;

pub use store::*;

use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Journal entry {0} already has a queue item")]
    AlreadyQueued(i64),

    #[error("Journal entry {0} is a duplicate and cannot be queued")]
    DuplicateEntry(i64),

    #[error("Queue item not found: {0}")]
    ItemNotFound(i64),

    #[error("Queue item {0} is not assigned; completion rejected")]
    NotAssigned(i64),
}
