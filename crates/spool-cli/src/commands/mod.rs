//! Command implementations

pub mod add;
pub mod info;
pub mod maintenance;
pub mod migrate;
pub mod pool;
pub mod recall;
pub mod retrieve;
pub mod start;
pub mod stop;

use std::path::PathBuf;

use anyhow::{bail, Result};

use spool_core::OpError;
use spool_proto::{Request, Response};

use crate::client::Client;

/// Files per object batch.
const BATCH: usize = 128;

/// Human-readable rendering of a wire error code.
pub(crate) fn describe(code: i32) -> String {
    format!("{} (error {code})", OpError::from_code(code))
}

/// Stream the file list, terminated by an empty name, printing any
/// per-file diagnostics the server reports.
pub(crate) fn send_objects(client: &mut Client, req_num: i64, files: &[PathBuf]) -> Result<()> {
    let mut names: Vec<String> = files
        .iter()
        .map(|path| {
            std::fs::canonicalize(path)
                .unwrap_or_else(|_| path.clone())
                .display()
                .to_string()
        })
        .collect();
    names.push(String::new());

    for chunk in names.chunks(BATCH) {
        let request = Request::SendObjects {
            key: client.key(),
            req_num,
            file_names: chunk.to_vec(),
        };
        client.send(&request)?;
        match client.recv()? {
            Response::SendObjects {
                success,
                diagnostics,
                ..
            } => {
                for line in diagnostics {
                    eprintln!("{line}");
                }
                if !success {
                    bail!("server rejected the object batch");
                }
            }
            other => bail!("unexpected response to object batch: {other:?}"),
        }
    }
    Ok(())
}

/// Poll the request until the server reports it done; exits non-zero
/// when any file failed.
pub(crate) fn poll_until_done(client: &mut Client, req_num: i64) -> Result<()> {
    loop {
        let request = Request::ReqStatus {
            key: client.key(),
            req_num,
            pid: std::process::id(),
        };
        client.send(&request)?;
        match client.recv()? {
            Response::ReqStatus {
                success,
                resident,
                premigrated,
                migrated,
                failed,
                done,
                ..
            } => {
                if !success {
                    bail!("status query failed for request {req_num}");
                }
                println!(
                    "request {req_num}: resident {resident}, premigrated {premigrated}, \
                     migrated {migrated}, failed {failed}"
                );
                if done {
                    if failed > 0 {
                        bail!("{failed} files failed");
                    }
                    return Ok(());
                }
            }
            other => bail!("unexpected status response: {other:?}"),
        }
        std::thread::sleep(std::time::Duration::from_millis(500));
    }
}
