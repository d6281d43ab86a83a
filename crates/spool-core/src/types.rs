//! Operation and state vocabulary
//!
//! The numeric codes are load-bearing: they are stored in the queue
//! database and order the scheduler's scan, so lower code means higher
//! scheduling priority. They must stay stable across releases.

use serde::{Deserialize, Serialize};

/// Request numbers as handed out by the server, one per client handshake.
pub type ReqNum = i64;

/// Sentinel for unset protocol-visible numeric fields.
pub const UNSET: i64 = -1;

/// The kinds of work a request can ask for.
///
/// The discriminants double as priority ranks: recalls preempt
/// migrations, migrations preempt maintenance, and tape motions come
/// last. `PartialOrd` therefore compares scheduling priority.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(i32)]
pub enum Operation {
    /// Recall driven by a kernel upcall on first access.
    TransRecall = 0,
    /// Recall explicitly requested by a client.
    SelRecall = 1,
    /// Copy resident files out to one or more tape pools.
    Migration = 2,
    /// Format a single cartridge.
    Format = 3,
    /// Consistency-check a single cartridge.
    Check = 4,
    /// Mount a cartridge into a drive for I/O.
    Mount = 5,
    /// Move a cartridge into a drive without mounting the filesystem.
    Move = 6,
    /// Unload a cartridge from its drive.
    Unmount = 7,
}

impl Operation {
    /// Stable numeric code as persisted in the request queue.
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Inverse of [`Operation::code`].
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::TransRecall),
            1 => Some(Self::SelRecall),
            2 => Some(Self::Migration),
            3 => Some(Self::Format),
            4 => Some(Self::Check),
            5 => Some(Self::Mount),
            6 => Some(Self::Move),
            7 => Some(Self::Unmount),
            _ => None,
        }
    }

    /// True for mount/move/unmount requests issued by the tape mover.
    #[must_use]
    pub const fn is_motion(self) -> bool {
        matches!(self, Self::Mount | Self::Move | Self::Unmount)
    }

    /// Display name used by the info queries.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TransRecall => "transparent recall",
            Self::SelRecall => "selective recall",
            Self::Migration => "migration",
            Self::Format => "format",
            Self::Check => "check",
            Self::Mount => "mount",
            Self::Move => "move",
            Self::Unmount => "unmount",
        }
    }
}

/// Lifecycle of a request-queue row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(i32)]
pub enum RequestState {
    /// Admitted, not yet scheduled.
    New = 0,
    /// Resources reserved, worker running.
    InProgress = 1,
    /// Worker finished, successfully or not.
    Completed = 2,
}

impl RequestState {
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::New),
            1 => Some(Self::InProgress),
            2 => Some(Self::Completed),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InProgress => "in progress",
            Self::Completed => "completed",
        }
    }
}

/// Migration state of one file within a request.
///
/// Migration walks `Resident → Premigrated → Migrated`; recall walks the
/// same chain backwards. `Failed` is terminal for the job but not for
/// its request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(i32)]
pub enum FileState {
    /// Data lives only on disk.
    Resident = 0,
    /// Data on disk and on tape.
    Premigrated = 1,
    /// Data only on tape, stub on disk.
    Migrated = 2,
    /// The job failed; counted separately in status polls.
    Failed = 3,
}

impl FileState {
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Resident),
            1 => Some(Self::Premigrated),
            2 => Some(Self::Migrated),
            3 => Some(Self::Failed),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resident => "resident",
            Self::Premigrated => "premigrated",
            Self::Migrated => "migrated",
            Self::Failed => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_codes_round_trip() {
        for code in 0..8 {
            let op = Operation::from_code(code).unwrap();
            assert_eq!(op.code(), code);
        }
        assert!(Operation::from_code(8).is_none());
        assert!(Operation::from_code(-1).is_none());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Operation::TransRecall < Operation::SelRecall);
        assert!(Operation::SelRecall < Operation::Migration);
        assert!(Operation::Migration < Operation::Format);
        assert!(Operation::Check < Operation::Mount);
        assert!(Operation::Move < Operation::Unmount);
    }

    #[test]
    fn test_motion_classification() {
        assert!(Operation::Mount.is_motion());
        assert!(Operation::Move.is_motion());
        assert!(Operation::Unmount.is_motion());
        assert!(!Operation::Migration.is_motion());
        assert!(!Operation::SelRecall.is_motion());
    }

    #[test]
    fn test_request_state_round_trip() {
        for code in 0..3 {
            let state = RequestState::from_code(code).unwrap();
            assert_eq!(state.code(), code);
        }
        assert!(RequestState::from_code(3).is_none());
    }

    #[test]
    fn test_file_state_chain() {
        assert!(FileState::Resident < FileState::Premigrated);
        assert!(FileState::Premigrated < FileState::Migrated);
        assert_eq!(FileState::from_code(3), Some(FileState::Failed));
    }
}
