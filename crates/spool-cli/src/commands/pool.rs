//! `spool pool` - manage tape pools

use anyhow::{bail, Result};

use spool_config::DaemonConfig;
use spool_proto::{Request, Response};

use crate::client::Client;
use crate::commands::describe;
use crate::PoolCommands;

pub fn execute(config: &DaemonConfig, action: &PoolCommands) -> Result<()> {
    let mut client = Client::connect(config)?;
    let key = client.key();

    let (request, expected) = match action {
        PoolCommands::Create { pool } => (
            Request::PoolCreate {
                key,
                pool: pool.clone(),
            },
            1,
        ),
        PoolCommands::Delete { pool } => (
            Request::PoolDelete {
                key,
                pool: pool.clone(),
            },
            1,
        ),
        PoolCommands::Add { pool, tapes } => (
            Request::PoolAdd {
                key,
                pool: pool.clone(),
                tapes: tapes.clone(),
            },
            tapes.len(),
        ),
        PoolCommands::Remove { pool, tapes } => (
            Request::PoolRemove {
                key,
                pool: pool.clone(),
                tapes: tapes.clone(),
            },
            tapes.len(),
        ),
    };
    client.send(&request)?;

    let mut failures = 0;
    for _ in 0..expected {
        match client.recv()? {
            Response::Pool { tape_id, error: 0 } => {
                if tape_id.is_empty() {
                    println!("ok");
                } else {
                    println!("{tape_id}: ok");
                }
            }
            Response::Pool { tape_id, error } => {
                failures += 1;
                if tape_id.is_empty() {
                    eprintln!("failed: {}", describe(error));
                } else {
                    eprintln!("{tape_id}: {}", describe(error));
                }
            }
            other => bail!("unexpected pool response: {other:?}"),
        }
    }
    if failures > 0 {
        bail!("{failures} pool operations failed");
    }
    Ok(())
}
