//! Protocol message types
//!
//! One discriminated union per direction. The numeric `error` fields
//! carry the codes of `spool_core::OpError`, `0` meaning success.

use serde::{Deserialize, Serialize};

use spool_core::UNSET;

/// Client-to-server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// Allocate the next request number.
    ReqNum { key: u64 },
    /// Admit a migration targeting up to three comma-separated pools.
    Migrate {
        key: u64,
        req_num: i64,
        pid: u32,
        /// Comma-separated pool list.
        pools: String,
        /// Target file state code: premigrated or migrated.
        target_state: i32,
    },
    /// Admit a selective recall.
    SelRecall {
        key: u64,
        req_num: i64,
        pid: u32,
        /// Target file state code: resident or premigrated.
        target_state: i32,
    },
    /// One batch of file names for the receive-objects loop. A batch
    /// containing an empty name terminates the stream.
    SendObjects {
        key: u64,
        req_num: i64,
        file_names: Vec<String>,
    },
    /// Poll aggregated job progress until `done`.
    ReqStatus { key: u64, req_num: i64, pid: u32 },
    /// Admit a cartridge format.
    Format {
        key: u64,
        req_num: i64,
        pool: String,
        tape_id: String,
    },
    /// Admit a cartridge check.
    Check {
        key: u64,
        req_num: i64,
        pool: String,
        tape_id: String,
    },
    /// Begin server shutdown.
    Stop {
        key: u64,
        req_num: i64,
        forced: bool,
        finish: bool,
    },
    /// Liveness probe; returns the server pid.
    Status { key: u64, req_num: i64 },
    /// Bring a filesystem under management.
    Add {
        key: u64,
        req_num: i64,
        managed_fs: String,
        mount_point: String,
        fs_name: String,
    },
    /// Stream request rows; `req_num == UNSET` streams all.
    InfoRequests { key: u64, req_num: i64 },
    /// Stream job rows; `req_num == UNSET` streams all.
    InfoJobs { key: u64, req_num: i64 },
    /// Stream drive records.
    InfoDrives { key: u64 },
    /// Stream cartridge records.
    InfoTapes { key: u64 },
    /// Stream pool summaries.
    InfoPools { key: u64 },
    PoolCreate { key: u64, pool: String },
    PoolDelete { key: u64, pool: String },
    PoolAdd { key: u64, pool: String, tapes: Vec<String> },
    PoolRemove { key: u64, pool: String, tapes: Vec<String> },
    /// Rescan the tape library.
    Retrieve { key: u64 },
}

impl Request {
    /// The session key the sender presented.
    #[must_use]
    pub const fn key(&self) -> u64 {
        match self {
            Self::ReqNum { key }
            | Self::Migrate { key, .. }
            | Self::SelRecall { key, .. }
            | Self::SendObjects { key, .. }
            | Self::ReqStatus { key, .. }
            | Self::Format { key, .. }
            | Self::Check { key, .. }
            | Self::Stop { key, .. }
            | Self::Status { key, .. }
            | Self::Add { key, .. }
            | Self::InfoRequests { key, .. }
            | Self::InfoJobs { key, .. }
            | Self::InfoDrives { key }
            | Self::InfoTapes { key }
            | Self::InfoPools { key }
            | Self::PoolCreate { key, .. }
            | Self::PoolDelete { key, .. }
            | Self::PoolAdd { key, .. }
            | Self::PoolRemove { key, .. }
            | Self::Retrieve { key } => *key,
        }
    }
}

/// Outcome of an add request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddOutcome {
    Success,
    AlreadyAdded,
    Failed,
}

/// Server-to-client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    ReqNum { success: bool, req_num: i64 },
    Migrate { error: i32, req_num: i64, pid: u32 },
    SelRecall { error: i32, req_num: i64, pid: u32 },
    /// Ack for one object batch; duplicate files are reported in
    /// `diagnostics` without failing the batch.
    SendObjects {
        success: bool,
        req_num: i64,
        pid: u32,
        diagnostics: Vec<String>,
    },
    ReqStatus {
        success: bool,
        req_num: i64,
        pid: u32,
        resident: i64,
        premigrated: i64,
        migrated: i64,
        failed: i64,
        done: bool,
    },
    Maintenance { error: i32, req_num: i64 },
    Stop { success: bool },
    Status { success: bool, pid: u32 },
    Add { outcome: AddOutcome, error: i32 },
    InfoRequest {
        operation: String,
        req_num: i64,
        tape_id: String,
        target_state: String,
        state: String,
    },
    InfoJob {
        operation: String,
        file_name: String,
        req_num: i64,
        repl_num: i64,
        file_size: i64,
        tape_id: String,
        state: String,
    },
    InfoDrive {
        id: String,
        devname: String,
        slot: i64,
        status: String,
        busy: bool,
    },
    InfoTape {
        id: String,
        slot: i64,
        total_cap: i64,
        remaining_cap: i64,
        status: String,
        in_progress: i64,
        pool: String,
        state: String,
    },
    InfoPool {
        name: String,
        total: i64,
        free: i64,
        unref: i64,
        num_tapes: i64,
    },
    Pool { tape_id: String, error: i32 },
    Retrieve { error: i32 },
}

impl Response {
    /// Sentinel ending an `InfoRequests` stream.
    #[must_use]
    pub fn info_request_sentinel() -> Self {
        Self::InfoRequest {
            operation: String::new(),
            req_num: UNSET,
            tape_id: String::new(),
            target_state: String::new(),
            state: String::new(),
        }
    }

    /// Sentinel ending an `InfoJobs` stream.
    #[must_use]
    pub fn info_job_sentinel() -> Self {
        Self::InfoJob {
            operation: String::new(),
            file_name: String::new(),
            req_num: UNSET,
            repl_num: UNSET,
            file_size: UNSET,
            tape_id: String::new(),
            state: String::new(),
        }
    }

    /// Sentinel ending an `InfoDrives` stream.
    #[must_use]
    pub fn info_drive_sentinel() -> Self {
        Self::InfoDrive {
            id: String::new(),
            devname: String::new(),
            slot: 0,
            status: String::new(),
            busy: false,
        }
    }

    /// Sentinel ending an `InfoTapes` stream. Both `status` and `state`
    /// are empty.
    #[must_use]
    pub fn info_tape_sentinel() -> Self {
        Self::InfoTape {
            id: String::new(),
            slot: 0,
            total_cap: 0,
            remaining_cap: 0,
            status: String::new(),
            in_progress: 0,
            pool: String::new(),
            state: String::new(),
        }
    }

    /// Sentinel ending an `InfoPools` stream.
    #[must_use]
    pub fn info_pool_sentinel() -> Self {
        Self::InfoPool {
            name: String::new(),
            total: 0,
            free: 0,
            unref: 0,
            num_tapes: 0,
        }
    }

    /// Whether this message is the sentinel of its stream.
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        match self {
            Self::InfoRequest { operation, .. } | Self::InfoJob { operation, .. } => {
                operation.is_empty()
            }
            Self::InfoDrive { id, .. } | Self::InfoTape { id, .. } => id.is_empty(),
            Self::InfoPool { name, .. } => name.is_empty(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_extraction_covers_every_variant() {
        let variants = vec![
            Request::ReqNum { key: 9 },
            Request::Status { key: 9, req_num: 1 },
            Request::InfoDrives { key: 9 },
            Request::Retrieve { key: 9 },
            Request::Stop {
                key: 9,
                req_num: 1,
                forced: false,
                finish: false,
            },
            Request::PoolAdd {
                key: 9,
                pool: "p1".into(),
                tapes: vec!["T00001".into()],
            },
        ];
        for request in variants {
            assert_eq!(request.key(), 9);
        }
    }

    #[test]
    fn test_sentinels_identify_themselves() {
        assert!(Response::info_request_sentinel().is_sentinel());
        assert!(Response::info_job_sentinel().is_sentinel());
        assert!(Response::info_drive_sentinel().is_sentinel());
        assert!(Response::info_tape_sentinel().is_sentinel());
        assert!(Response::info_pool_sentinel().is_sentinel());

        let row = Response::InfoDrive {
            id: "dr0".into(),
            devname: "/dev/sg0".into(),
            slot: 0,
            status: "free".into(),
            busy: false,
        };
        assert!(!row.is_sentinel());
    }

    #[test]
    fn test_tape_sentinel_has_both_status_and_state_empty() {
        if let Response::InfoTape { status, state, .. } = Response::info_tape_sentinel() {
            assert!(status.is_empty());
            assert!(state.is_empty());
        } else {
            unreachable!();
        }
    }
}
