//! Scheduling core
//!
//! One long-lived scheduler thread matches `NEW` request rows against
//! free drives and cartridges, initiating tape motion where needed;
//! workers execute the matched requests and hand their resources back.
//! Everything here is condvar-driven: wake-ups come from the dispatcher
//! (new work), from workers (freed resources), from the tape mover
//! (completed motion) and from the termination path.

mod mover;
mod ops;
mod scheduler;
mod subserver;

use std::sync::Arc;

use thiserror::Error;

use spool_core::backend::{BackendError, FsConnector, TapeLibrary};
use spool_core::Context;
use spool_inventory::{Inventory, InventoryError};
use spool_store::{QueueStore, StoreError};

pub use mover::TapeMover;
pub use ops::{FileOperation, TapeMaintenance};
pub use scheduler::Scheduler;
pub use subserver::SubServer;

/// Scheduling failures; workers log these and fail the affected job or
/// request rather than propagating further.
#[derive(Debug, Error)]
pub enum SchedError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Result alias for scheduling operations.
pub type Result<T> = std::result::Result<T, SchedError>;

/// The shared collaborators every scheduling component works against.
#[derive(Clone)]
pub struct Services {
    pub ctx: Arc<Context>,
    pub store: Arc<QueueStore>,
    pub inventory: Arc<Inventory>,
    pub library: Arc<dyn TapeLibrary>,
    pub connector: Arc<dyn FsConnector>,
}
