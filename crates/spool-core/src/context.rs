//! Process-lifetime control state
//!
//! One [`Context`] is created at daemon start and threaded through every
//! component constructor. It owns the three monotonic termination flags,
//! the request-number counter, the shared session key and the scheduler
//! wake-up signal.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::types::ReqNum;

/// Wake-up channel for the scheduler thread.
///
/// A pending flag under the mutex makes notifications sticky: a signal
/// sent while the scheduler is mid-pass is consumed by the next wait
/// instead of being lost.
#[derive(Debug, Default)]
pub struct SchedulerSignal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl SchedulerSignal {
    /// Wake the scheduler for another pass.
    pub fn notify(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.cond.notify_one();
    }

    /// Block until the next notification. Consumes the pending flag.
    pub fn wait(&self) {
        let mut pending = self.pending.lock();
        while !*pending {
            self.cond.wait(&mut pending);
        }
        *pending = false;
    }

    /// Non-blocking variant used by tests to drain a stale notification.
    #[must_use]
    pub fn take_pending(&self) -> bool {
        let mut pending = self.pending.lock();
        std::mem::take(&mut *pending)
    }
}

/// Shared server state with process lifetime.
#[derive(Debug)]
pub struct Context {
    terminate: AtomicBool,
    forced_terminate: AtomicBool,
    finish_terminate: AtomicBool,
    req_counter: AtomicI64,
    session_key: u64,
    sched: SchedulerSignal,
}

impl Context {
    /// Create the context for one server lifetime.
    #[must_use]
    pub fn new(session_key: u64) -> Self {
        Self {
            terminate: AtomicBool::new(false),
            forced_terminate: AtomicBool::new(false),
            finish_terminate: AtomicBool::new(false),
            req_counter: AtomicI64::new(0),
            session_key,
            sched: SchedulerSignal::default(),
        }
    }

    /// The shared secret every protocol message must carry.
    #[must_use]
    pub const fn session_key(&self) -> u64 {
        self.session_key
    }

    /// Allocate the next request number. Unique within this server
    /// lifetime; the first handshake receives 1.
    pub fn next_req_num(&self) -> ReqNum {
        self.req_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Scheduler wake-up signal.
    #[must_use]
    pub const fn scheduler(&self) -> &SchedulerSignal {
        &self.sched
    }

    /// Stop admitting new work. Monotonic.
    pub fn set_terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn terminate(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    /// Additionally interrupt running workers at their next checkpoint.
    pub fn set_forced_terminate(&self) {
        self.forced_terminate.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn forced_terminate(&self) -> bool {
        self.forced_terminate.load(Ordering::SeqCst)
    }

    /// Let in-progress work finish and drain suspended replicas.
    pub fn set_finish_terminate(&self) {
        self.finish_terminate.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn finish_terminate(&self) -> bool {
        self.finish_terminate.load(Ordering::SeqCst)
    }
}
