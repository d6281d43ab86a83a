//! `spool start` - launch the daemon and wait until it answers

use std::env;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};

use spool_config::DaemonConfig;
use spool_proto::{Request, Response};

use crate::client::Client;

const CONNECT_RETRIES: u32 = 10;

pub fn execute(config_path: Option<&Path>, config: &DaemonConfig) -> Result<()> {
    // The daemon binary lives next to this executable.
    let exe = env::current_exe().context("cannot determine the executable path")?;
    let spoold = exe
        .parent()
        .context("executable has no parent directory")?
        .join("spoold");
    if !spoold.exists() {
        bail!("daemon binary not found at {}", spoold.display());
    }

    let mut command = Command::new(&spoold);
    if let Some(path) = config_path {
        command.arg("--config").arg(path);
    }
    let child = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("cannot start the daemon")?;
    println!("daemon starting with pid {}", child.id());

    for _ in 0..CONNECT_RETRIES {
        thread::sleep(Duration::from_secs(1));
        let Ok(mut client) = Client::connect(config) else {
            continue;
        };
        let request = Request::Status {
            key: client.key(),
            req_num: client.req_num(),
        };
        client.send(&request)?;
        match client.recv()? {
            Response::Status { success: true, pid } => {
                println!("daemon answering with pid {pid}");
                return Ok(());
            }
            other => bail!("unexpected status response: {other:?}"),
        }
    }
    bail!("daemon did not answer after {CONNECT_RETRIES} attempts")
}
