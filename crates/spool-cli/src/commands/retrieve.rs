//! `spool retrieve` - rescan the tape library

use anyhow::{bail, Result};

use spool_config::DaemonConfig;
use spool_proto::{Request, Response};

use crate::client::Client;
use crate::commands::describe;

pub fn execute(config: &DaemonConfig) -> Result<()> {
    let mut client = Client::connect(config)?;
    let request = Request::Retrieve { key: client.key() };
    client.send(&request)?;
    match client.recv()? {
        Response::Retrieve { error: 0 } => {
            println!("inventory rebuilt");
            Ok(())
        }
        Response::Retrieve { error } => bail!("retrieve failed: {}", describe(error)),
        other => bail!("unexpected retrieve response: {other:?}"),
    }
}
