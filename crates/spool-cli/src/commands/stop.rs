//! `spool stop` - drain and stop the daemon
//!
//! Polls the server until it reports zero in-progress requests, then
//! waits for the server lock to become free, which confirms the
//! process is actually gone.

use std::fs::OpenOptions;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use nix::fcntl::{Flock, FlockArg};

use spool_config::DaemonConfig;
use spool_proto::{Request, Response};

use crate::client::Client;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

pub fn execute(config: &DaemonConfig, forced: bool, finish: bool) -> Result<()> {
    let mut client = Client::connect_raw(config)?;
    println!("stopping the daemon");

    let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
    loop {
        let request = Request::Stop {
            key: client.key(),
            req_num: 0,
            forced,
            finish,
        };
        client.send(&request)?;
        match client.recv()? {
            Response::Stop { success: true } => break,
            Response::Stop { success: false } => {
                println!("requests still running");
                if Instant::now() > deadline {
                    bail!("daemon did not drain in time");
                }
                thread::sleep(Duration::from_secs(1));
            }
            other => bail!("unexpected stop response: {other:?}"),
        }
    }

    while lock_is_held(&config.lock_path()) {
        if Instant::now() > deadline {
            bail!("daemon process did not exit");
        }
        thread::sleep(Duration::from_millis(200));
    }
    println!("daemon stopped");
    Ok(())
}

fn lock_is_held(path: &Path) -> bool {
    let Ok(file) = OpenOptions::new().read(true).write(true).open(path) else {
        return false;
    };
    Flock::lock(file, FlockArg::LockExclusiveNonblock).is_err()
}
