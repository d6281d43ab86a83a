//! `spool recall` - bring tape copies back to disk

use std::path::PathBuf;

use anyhow::{bail, Result};

use spool_config::DaemonConfig;
use spool_core::FileState;
use spool_proto::{Request, Response};

use crate::client::Client;
use crate::commands::{describe, poll_until_done, send_objects};

pub fn execute(config: &DaemonConfig, resident: bool, files: &[PathBuf]) -> Result<()> {
    let target = if resident {
        FileState::Resident
    } else {
        FileState::Premigrated
    };

    let mut client = Client::connect(config)?;
    let req_num = client.req_num();
    let request = Request::SelRecall {
        key: client.key(),
        req_num,
        pid: std::process::id(),
        target_state: target.code(),
    };
    client.send(&request)?;
    match client.recv()? {
        Response::SelRecall { error: 0, .. } => {}
        Response::SelRecall { error, .. } => bail!("recall rejected: {}", describe(error)),
        other => bail!("unexpected recall response: {other:?}"),
    }

    send_objects(&mut client, req_num, files)?;
    poll_until_done(&mut client, req_num)
}
