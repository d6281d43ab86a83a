//! Interfaces to the external collaborators
//!
//! The core never moves data itself: tape I/O goes through a
//! [`TapeLibrary`] and filesystem access through an [`FsConnector`].
//! Production deployments plug the LTFS wrapper and the kernel connector
//! in here; tests and the `sim` backend use the directory-backed
//! implementations from [`crate::emulator`].

use std::io;
use std::path::Path;

use thiserror::Error;

use crate::types::FileState;

/// Failures reported by the backends.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The cartridge has no room for the next file.
    #[error("tape {0} is full")]
    TapeFull(String),

    #[error("unknown drive: {0}")]
    UnknownDrive(String),

    #[error("unknown tape: {0}")]
    UnknownTape(String),

    #[error("tape {0} is write protected")]
    WriteProtected(String),

    #[error("tape {0} is already formatted")]
    AlreadyFormatted(String),

    #[error("tape {tape} not positioned for {operation}")]
    BadPosition { tape: String, operation: &'static str },

    #[error("malformed attributes on {0}")]
    AttrFormat(String),

    #[error("file system check failed for {0}")]
    FsCheck(String),

    #[error("file system {0} could not be added")]
    FsAdd(String),

    #[error("file system {0} is already managed")]
    AlreadyManaged(String),
}

/// One drive as reported by a library rescan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveSlot {
    pub id: String,
    pub devname: String,
    pub slot: u32,
}

/// One cartridge as reported by a library rescan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapeSlot {
    pub id: String,
    /// Drive slot the cartridge currently sits in, if any.
    pub slot: Option<u32>,
    pub total_cap_mib: u64,
    pub remaining_cap_mib: u64,
}

/// Snapshot of the physical library.
#[derive(Debug, Clone, Default)]
pub struct LibraryScan {
    pub drives: Vec<DriveSlot>,
    pub tapes: Vec<TapeSlot>,
}

/// The tape library wrapper the core drives.
///
/// All calls block until the physical action finished. Implementations
/// must be safe to call from multiple worker threads; the scheduler
/// guarantees that no two callers target the same drive concurrently.
pub trait TapeLibrary: Send + Sync {
    /// Enumerate drives and cartridges.
    fn scan(&self) -> Result<LibraryScan, BackendError>;

    /// Load a cartridge into a drive and mount its filesystem.
    fn mount(&self, drive_id: &str, tape_id: &str) -> Result<(), BackendError>;

    /// Unmount and unload a cartridge from a drive.
    fn unmount(&self, drive_id: &str, tape_id: &str) -> Result<(), BackendError>;

    /// Move a cartridge into a drive without mounting, for maintenance.
    fn move_to_drive(&self, drive_id: &str, tape_id: &str) -> Result<(), BackendError>;

    /// Format a cartridge sitting in a drive.
    fn format(&self, drive_id: &str, tape_id: &str) -> Result<(), BackendError>;

    /// Consistency-check a cartridge sitting in a drive.
    fn check(&self, drive_id: &str, tape_id: &str) -> Result<(), BackendError>;

    /// Write one file's data onto a mounted cartridge.
    fn write_file(&self, tape_id: &str, name: &str, data: &[u8]) -> Result<(), BackendError>;

    /// Read one file's data back from a mounted cartridge.
    fn read_file(&self, tape_id: &str, name: &str) -> Result<Vec<u8>, BackendError>;

    /// Remaining capacity of a cartridge in MiB.
    fn remaining_mib(&self, tape_id: &str) -> Result<u64, BackendError>;
}

/// The filesystem connector the workers stream data through.
pub trait FsConnector: Send + Sync {
    /// Bring a filesystem under management.
    fn manage_fs(&self, path: &Path) -> Result<(), BackendError>;

    /// Whether the filesystem is already managed.
    fn is_managed(&self, path: &Path) -> Result<bool, BackendError>;

    /// Size of a managed file in bytes.
    fn file_size(&self, path: &Path) -> Result<u64, BackendError>;

    /// Read a managed file's content.
    fn read_file(&self, path: &Path) -> Result<Vec<u8>, BackendError>;

    /// Replace a stub with recalled content.
    fn restore_file(&self, path: &Path, data: &[u8]) -> Result<(), BackendError>;

    /// Truncate a premigrated file down to a stub.
    fn stub_file(&self, path: &Path) -> Result<(), BackendError>;

    /// Record where a managed file's tape copy lives and its state.
    fn set_attrs(&self, path: &Path, tape_id: &str, state: FileState)
        -> Result<(), BackendError>;

    /// Read back a managed file's `(tape, state)` attributes, `None`
    /// when the file was never migrated.
    fn attrs(&self, path: &Path) -> Result<Option<(String, FileState)>, BackendError>;

    /// Drop the attributes once a file is fully resident again.
    fn clear_attrs(&self, path: &Path) -> Result<(), BackendError>;
}
