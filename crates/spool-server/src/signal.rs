//! `SIGUSR1` wake-up
//!
//! The stop handler raises `SIGUSR1` against the server process to
//! nudge the accept loop out of its wait. The handler body is empty on
//! purpose: the side effect is the `EINTR` a blocked syscall observes.
//! Installed without `SA_RESTART` so interrupted syscalls actually
//! return instead of resuming silently.

use nix::libc::c_int;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;

use crate::{Result, ServerError};

extern "C" fn wakeup_handler(_: c_int) {}

/// Install the `SIGUSR1` handler. Call once before the accept loop.
pub fn install_wakeup() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(wakeup_handler),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe { signal::sigaction(Signal::SIGUSR1, &action) }
        .map(|_| ())
        .map_err(ServerError::Signal)
}

/// Deliver `SIGUSR1` to the server process.
pub fn raise_wakeup() {
    let _ = signal::kill(Pid::this(), Signal::SIGUSR1);
}
