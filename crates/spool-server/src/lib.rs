//! The spool daemon
//!
//! `spoold` wires the queue store, the inventory and the scheduler
//! together behind a Unix-socket accept loop: one dispatcher thread per
//! client connection, one scheduler thread, one worker thread per
//! reserved request. The advisory lock file signals liveness to
//! clients; `SIGUSR1` wakes the accept loop out of its blocking wait
//! during shutdown.

mod dispatch;
mod lockfile;
mod server;
mod signal;

use thiserror::Error;

pub use dispatch::Dispatcher;
pub use lockfile::LockFile;
pub use server::Server;
pub use signal::{install_wakeup, raise_wakeup};

/// Daemon bootstrap and runtime failures.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The lock file is held: another daemon instance is running.
    #[error("another spoold instance holds {0}")]
    AlreadyRunning(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] spool_config::ConfigError),

    #[error(transparent)]
    Store(#[from] spool_store::StoreError),

    #[error(transparent)]
    Inventory(#[from] spool_inventory::InventoryError),

    #[error(transparent)]
    Backend(#[from] spool_core::BackendError),

    #[error("signal setup failed: {0}")]
    Signal(nix::errno::Errno),
}

/// Result alias for daemon operations.
pub type Result<T> = std::result::Result<T, ServerError>;
