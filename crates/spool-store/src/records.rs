//! Row value types
//!
//! Snapshots of queue rows. The store owns the rows; everything handed
//! out here is a copy.

use spool_core::{FileState, Operation, RequestState, ReqNum};

/// One request-queue row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub operation: Operation,
    pub req_num: ReqNum,
    pub target_state: FileState,
    pub num_repl: i32,
    pub repl_num: i32,
    /// Target pool for migrations, empty otherwise.
    pub pool: String,
    /// Specific cartridge, empty until one is chosen.
    pub tape_id: String,
    /// Reserved drive, empty until reservation.
    pub drive_id: String,
    pub state: RequestState,
}

impl RequestRecord {
    /// A fresh `NEW` row with no resources assigned.
    #[must_use]
    pub fn new(
        operation: Operation,
        req_num: ReqNum,
        target_state: FileState,
        num_repl: i32,
        repl_num: i32,
        pool: impl Into<String>,
        tape_id: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            req_num,
            target_state,
            num_repl,
            repl_num,
            pool: pool.into(),
            tape_id: tape_id.into(),
            drive_id: String::new(),
            state: RequestState::New,
        }
    }
}

/// One job-queue row; `(file_name, req_num, repl_num)` is the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub operation: Operation,
    pub file_name: String,
    pub req_num: ReqNum,
    pub repl_num: i32,
    pub file_size: i64,
    pub tape_id: String,
    pub file_state: FileState,
}

/// Aggregated job states for one request, as reported by status polls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub resident: i64,
    pub premigrated: i64,
    pub migrated: i64,
    pub failed: i64,
}
