//! `spool migrate` - copy files to tape pools

use std::path::PathBuf;

use anyhow::{bail, Result};

use spool_config::DaemonConfig;
use spool_core::FileState;
use spool_proto::{Request, Response};

use crate::client::Client;
use crate::commands::{describe, poll_until_done, send_objects};

pub fn execute(
    config: &DaemonConfig,
    pools: &str,
    premigrate: bool,
    files: &[PathBuf],
) -> Result<()> {
    let target = if premigrate {
        FileState::Premigrated
    } else {
        FileState::Migrated
    };

    let mut client = Client::connect(config)?;
    let req_num = client.req_num();
    let request = Request::Migrate {
        key: client.key(),
        req_num,
        pid: std::process::id(),
        pools: pools.to_string(),
        target_state: target.code(),
    };
    client.send(&request)?;
    match client.recv()? {
        Response::Migrate { error: 0, .. } => {}
        Response::Migrate { error, .. } => bail!("migration rejected: {}", describe(error)),
        other => bail!("unexpected migrate response: {other:?}"),
    }

    send_objects(&mut client, req_num, files)?;
    poll_until_done(&mut client, req_num)
}
