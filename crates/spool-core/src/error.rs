//! Protocol-visible error taxonomy
//!
//! Every failure a client can observe resolves to one of these numeric
//! codes inside the matching response message. The codes are part of the
//! wire contract and never change.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operation outcome codes carried in response messages.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize,
)]
pub enum OpError {
    /// Programming or unexpected OS error; fatal for the request.
    #[error("general failure")]
    General,
    /// Send/receive on the client connection failed.
    #[error("communication failure")]
    Comm,
    /// A managed file carries a malformed attribute set.
    #[error("attribute format error")]
    AttrFormat,
    /// The filesystem could not be examined during add.
    #[error("file system check failed")]
    FsCheck,
    /// The filesystem could not be brought under management.
    #[error("file system add failed")]
    FsAdd,
    /// The tape is already a member of a pool.
    #[error("tape already exists in a pool")]
    TapeExistsInPool,
    /// The tape is not a member of the named pool.
    #[error("tape does not exist in pool")]
    TapeNotExistsInPool,
    /// A pool with that name already exists.
    #[error("pool already exists")]
    PoolExists,
    /// No pool with that name exists.
    #[error("pool does not exist")]
    PoolNotExists,
    /// No cartridge with that id exists.
    #[error("tape does not exist")]
    TapeNotExists,
    /// The pool still contains cartridges.
    #[error("pool is not empty")]
    PoolNotEmpty,
    /// A migration request named more than three pools.
    #[error("wrong number of pools")]
    WrongPoolNum,
    /// At least one named pool does not exist.
    #[error("not all pools exist")]
    NotAllPoolsExist,
    /// The drive is executing other work.
    #[error("drive is busy")]
    DriveBusy,
    /// Format refused: the cartridge already carries a filesystem.
    #[error("tape already formatted")]
    AlreadyFormatted,
    /// The cartridge is write protected.
    #[error("tape is write protected")]
    WriteProtected,
    /// The cartridge is in a state that forbids the operation.
    #[error("tape state does not permit the operation")]
    TapeStateErr,
    /// The cartridge cannot be accessed at all.
    #[error("tape is inaccessible")]
    Inaccessible,
    /// The server is shutting down and rejects new work.
    #[error("server is terminating")]
    Terminating,
}

impl OpError {
    /// Wire code of this error.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::General => -1,
            Self::Comm => 1001,
            Self::AttrFormat => 1002,
            Self::FsCheck => 1003,
            Self::FsAdd => 1004,
            Self::TapeExistsInPool => 1005,
            Self::TapeNotExistsInPool => 1006,
            Self::PoolExists => 1007,
            Self::PoolNotExists => 1008,
            Self::TapeNotExists => 1009,
            Self::PoolNotEmpty => 1010,
            Self::WrongPoolNum => 1011,
            Self::NotAllPoolsExist => 1012,
            Self::DriveBusy => 1013,
            Self::AlreadyFormatted => 1050,
            Self::WriteProtected => 1051,
            Self::TapeStateErr => 1052,
            Self::Inaccessible => 1054,
            Self::Terminating => 1060,
        }
    }

    /// Inverse of [`OpError::code`]; unknown codes map to `General`.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            1001 => Self::Comm,
            1002 => Self::AttrFormat,
            1003 => Self::FsCheck,
            1004 => Self::FsAdd,
            1005 => Self::TapeExistsInPool,
            1006 => Self::TapeNotExistsInPool,
            1007 => Self::PoolExists,
            1008 => Self::PoolNotExists,
            1009 => Self::TapeNotExists,
            1010 => Self::PoolNotEmpty,
            1011 => Self::WrongPoolNum,
            1012 => Self::NotAllPoolsExist,
            1013 => Self::DriveBusy,
            1050 => Self::AlreadyFormatted,
            1051 => Self::WriteProtected,
            1052 => Self::TapeStateErr,
            1054 => Self::Inaccessible,
            1060 => Self::Terminating,
            _ => Self::General,
        }
    }
}

/// Wire code meaning success. Responses carry `OK` instead of an
/// `Option<OpError>` so that every response has a numeric outcome.
pub const OK: i32 = 0;
