//! Persistent queue store
//!
//! Two SQLite tables back the whole scheduling state: `REQUEST_QUEUE`
//! holds one row per admitted request (one per replica for migrations),
//! `JOB_QUEUE` one row per file within a request. All access is
//! serialised through a single connection behind a mutex; callers only
//! ever hold copies of row values.

mod records;
mod schema;
mod store;

pub use records::{JobCounts, JobRecord, RequestRecord};
pub use store::{QueueStore, Result, StoreError};
