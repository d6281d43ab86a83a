//! `spool add` - bring a filesystem under management

use std::path::Path;

use anyhow::{bail, Result};

use spool_config::DaemonConfig;
use spool_proto::{AddOutcome, Request, Response};

use crate::client::Client;
use crate::commands::describe;

pub fn execute(
    config: &DaemonConfig,
    managed_fs: &Path,
    mount_point: Option<&Path>,
    fs_name: &str,
) -> Result<()> {
    let mut client = Client::connect(config)?;
    let request = Request::Add {
        key: client.key(),
        req_num: client.req_num(),
        managed_fs: managed_fs.display().to_string(),
        mount_point: mount_point
            .unwrap_or(managed_fs)
            .display()
            .to_string(),
        fs_name: fs_name.to_string(),
    };
    client.send(&request)?;
    match client.recv()? {
        Response::Add {
            outcome: AddOutcome::Success,
            ..
        } => {
            println!("{} is now managed", managed_fs.display());
            Ok(())
        }
        Response::Add {
            outcome: AddOutcome::AlreadyAdded,
            ..
        } => {
            println!("{} is already managed", managed_fs.display());
            Ok(())
        }
        Response::Add { error, .. } => {
            bail!("add failed: {}", describe(error))
        }
        other => bail!("unexpected add response: {other:?}"),
    }
}
