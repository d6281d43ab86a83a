//! `spool format` / `spool check` - cartridge maintenance

use anyhow::{bail, Result};

use spool_config::DaemonConfig;
use spool_proto::{Request, Response};

use crate::client::Client;
use crate::commands::describe;

pub fn execute(config: &DaemonConfig, check: bool, pool: &str, tape: &str) -> Result<()> {
    let mut client = Client::connect(config)?;
    let req_num = client.req_num();
    let request = if check {
        Request::Check {
            key: client.key(),
            req_num,
            pool: pool.to_string(),
            tape_id: tape.to_string(),
        }
    } else {
        Request::Format {
            key: client.key(),
            req_num,
            pool: pool.to_string(),
            tape_id: tape.to_string(),
        }
    };
    client.send(&request)?;
    match client.recv()? {
        Response::Maintenance { error: 0, req_num } => {
            println!(
                "{} of {tape} queued as request {req_num}",
                if check { "check" } else { "format" }
            );
            Ok(())
        }
        Response::Maintenance { error, .. } => {
            bail!("request rejected: {}", describe(error))
        }
        other => bail!("unexpected maintenance response: {other:?}"),
    }
}
