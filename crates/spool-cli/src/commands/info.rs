//! `spool info` - stream server state tables

use anyhow::{bail, Result};

use spool_config::DaemonConfig;
use spool_core::UNSET;
use spool_proto::{Request, Response};

use crate::client::Client;
use crate::InfoCommands;

pub fn execute(config: &DaemonConfig, what: &InfoCommands) -> Result<()> {
    let mut client = Client::connect(config)?;
    let key = client.key();

    let request = match what {
        InfoCommands::Requests { req_num } => Request::InfoRequests {
            key,
            req_num: req_num.unwrap_or(UNSET),
        },
        InfoCommands::Jobs { req_num } => Request::InfoJobs {
            key,
            req_num: req_num.unwrap_or(UNSET),
        },
        InfoCommands::Drives => Request::InfoDrives { key },
        InfoCommands::Tapes => Request::InfoTapes { key },
        InfoCommands::Pools => Request::InfoPools { key },
    };
    client.send(&request)?;

    print_header(what);
    loop {
        let response = client.recv()?;
        if response.is_sentinel() {
            return Ok(());
        }
        print_row(&response)?;
    }
}

fn print_header(what: &InfoCommands) {
    match what {
        InfoCommands::Requests { .. } => println!(
            "{:<20} {:>8} {:<10} {:<14} {:<12}",
            "operation", "request", "tape", "target state", "state"
        ),
        InfoCommands::Jobs { .. } => println!(
            "{:<20} {:>8} {:>4} {:>12} {:<10} {:<12} {}",
            "operation", "request", "repl", "size", "tape", "state", "file"
        ),
        InfoCommands::Drives => println!(
            "{:<10} {:<14} {:>4} {:<8} {}",
            "id", "device", "slot", "status", "busy"
        ),
        InfoCommands::Tapes => println!(
            "{:<10} {:>4} {:>10} {:>10} {:<8} {:>4} {:<10} {}",
            "id", "slot", "total MiB", "free MiB", "status", "req", "pool", "state"
        ),
        InfoCommands::Pools => println!(
            "{:<14} {:>10} {:>10} {:>8} {:>6}",
            "pool", "total MiB", "free MiB", "unref", "tapes"
        ),
    }
}

fn print_row(response: &Response) -> Result<()> {
    match response {
        Response::InfoRequest {
            operation,
            req_num,
            tape_id,
            target_state,
            state,
        } => println!("{operation:<20} {req_num:>8} {tape_id:<10} {target_state:<14} {state:<12}"),
        Response::InfoJob {
            operation,
            file_name,
            req_num,
            repl_num,
            file_size,
            tape_id,
            state,
        } => println!(
            "{operation:<20} {req_num:>8} {repl_num:>4} {file_size:>12} {tape_id:<10} {state:<12} {file_name}"
        ),
        Response::InfoDrive {
            id,
            devname,
            slot,
            status,
            busy,
        } => println!("{id:<10} {devname:<14} {slot:>4} {status:<8} {busy}"),
        Response::InfoTape {
            id,
            slot,
            total_cap,
            remaining_cap,
            status,
            in_progress,
            pool,
            state,
        } => println!(
            "{id:<10} {slot:>4} {total_cap:>10} {remaining_cap:>10} {status:<8} {in_progress:>4} {pool:<10} {state}"
        ),
        Response::InfoPool {
            name,
            total,
            free,
            unref,
            num_tapes,
        } => println!("{name:<14} {total:>10} {free:>10} {unref:>8} {num_tapes:>6}"),
        other => bail!("unexpected info row: {other:?}"),
    }
    Ok(())
}
