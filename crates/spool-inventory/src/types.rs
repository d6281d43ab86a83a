//! Inventory record types

use parking_lot::{Condvar, Mutex};

use spool_core::{Operation, ReqNum};

/// Live state of one tape drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drive {
    pub id: String,
    pub devname: String,
    pub slot: u32,
    /// True while a worker or a reserved tape motion owns the drive.
    pub busy: bool,
    /// Request that enqueued a not-yet-completed motion on this drive.
    pub move_req_num: Option<ReqNum>,
    /// Pool of that pending motion, empty when none.
    pub move_req_pool: String,
    /// Best (highest-priority, lowest-code) operation that asked the
    /// current holder of this drive's cartridge to step down. `None`
    /// means nobody asked.
    pub to_unblock: Option<Operation>,
}

impl Drive {
    /// Priority rank used when comparing against a candidate preemptor;
    /// an idle `to_unblock` ranks below every real operation.
    #[must_use]
    pub fn unblock_rank(&self) -> i32 {
        self.to_unblock.map_or(i32::MAX, Operation::code)
    }
}

/// Mount state of one cartridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartridgeState {
    Unmounted,
    Mounted,
    /// A tape mover task owns the cartridge.
    Moving,
    /// Reserved by exactly one worker.
    InUse,
    Invalid,
    Unknown,
}

impl CartridgeState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unmounted => "unmounted",
            Self::Mounted => "mounted",
            Self::Moving => "moving",
            Self::InUse => "in use",
            Self::Invalid => "invalid",
            Self::Unknown => "unknown",
        }
    }
}

/// Live state of one cartridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cartridge {
    pub id: String,
    /// Drive slot the cartridge sits in while mounted/moving/in use.
    pub slot: Option<u32>,
    /// Owning pool, empty while unpooled.
    pub pool: String,
    pub total_cap_mib: u64,
    pub remaining_cap_mib: u64,
    pub state: CartridgeState,
    /// A higher-priority request asked the current holder to suspend.
    pub requested: bool,
}

/// Wait point a preempted worker parks on until its cartridge has been
/// handed over (or the server shuts down).
#[derive(Debug, Default)]
pub struct CartridgeGate {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl CartridgeGate {
    /// Wake every parked worker; they re-check their predicate.
    pub fn notify(&self) {
        let mut generation = self.generation.lock();
        *generation += 1;
        self.cond.notify_all();
    }

    /// Park until `done` returns true. The predicate runs with the gate
    /// unlocked so it may take the inventory lock; notifications that
    /// arrive between the check and the wait are caught through the
    /// generation counter.
    pub fn wait_until(&self, mut done: impl FnMut() -> bool) {
        loop {
            let seen = *self.generation.lock();
            if done() {
                return;
            }
            let mut generation = self.generation.lock();
            while *generation == seen {
                self.cond.wait(&mut generation);
            }
        }
    }
}

/// Aggregated pool view for the info query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSummary {
    pub name: String,
    pub total_mib: u64,
    pub free_mib: u64,
    pub num_tapes: u64,
}
