//! Shared foundation for the spool tape HSM
//!
//! This crate carries everything the other spool crates agree on: the
//! operation and state vocabulary, the protocol-visible error taxonomy,
//! the process-lifetime control state, and the traits the core uses to
//! talk to its external collaborators (tape library, filesystem
//! connector). It deliberately contains no I/O of its own apart from the
//! directory-backed library emulator used for testing and the `sim`
//! backend.

pub mod backend;
pub mod context;
pub mod emulator;
pub mod error;
pub mod types;

pub use backend::{BackendError, DriveSlot, FsConnector, LibraryScan, TapeLibrary, TapeSlot};
pub use context::{Context, SchedulerSignal};
pub use error::OpError;
pub use types::{FileState, Operation, RequestState, ReqNum, UNSET};
