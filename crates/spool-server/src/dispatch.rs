//! Per-connection message dispatcher
//!
//! Reads one handshake plus one command per connection, mutates queues
//! and inventory, streams responses, then closes. Every message is
//! checked against the shared session key before anything else; a
//! mismatch drops the connection without a reply.

use std::os::unix::net::UnixStream;
use std::path::Path;
use std::process;

use tracing::{debug, info, warn};

use spool_core::backend::BackendError;
use spool_core::error::OK;
use spool_core::{FileState, OpError, Operation, RequestState, ReqNum, UNSET};
use spool_proto::{FramedStream, ProtoError, Request, Response};
use spool_sched::{FileOperation, SchedError, Services, TapeMaintenance};
use spool_store::StoreError;

use crate::signal::raise_wakeup;

type Framed = FramedStream<UnixStream>;
type HandlerResult = std::result::Result<(), ProtoError>;

/// One dispatcher serves one accepted connection.
pub struct Dispatcher {
    services: Services,
}

impl Dispatcher {
    #[must_use]
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Serve one client connection to completion.
    pub fn run(&self, stream: UnixStream) {
        let mut framed = FramedStream::new(stream);
        let mut local_req_num: ReqNum = UNSET;

        loop {
            let request = match framed.recv_request() {
                Ok(request) => request,
                Err(ProtoError::Closed) => return,
                Err(err) => {
                    warn!(%err, "receive failed, dropping connection");
                    return;
                }
            };
            if request.key() != self.services.ctx.session_key() {
                warn!(key = request.key(), "rejecting message with foreign session key");
                return;
            }

            let result = match request {
                Request::ReqNum { .. } => {
                    local_req_num = self.services.ctx.next_req_num();
                    debug!(req_num = local_req_num, "request number handed out");
                    framed.send_response(&Response::ReqNum {
                        success: true,
                        req_num: local_req_num,
                    })
                }
                Request::Stop { forced, finish, .. } => {
                    let _ = self.stop(&mut framed, forced, finish);
                    return;
                }
                other => {
                    let _ = self.handle(&mut framed, other, local_req_num);
                    return;
                }
            };
            if result.is_err() {
                return;
            }
        }
    }

    fn handle(&self, framed: &mut Framed, request: Request, local_req_num: ReqNum) -> HandlerResult {
        match request {
            Request::Migrate {
                req_num,
                pid,
                pools,
                target_state,
                ..
            } => self.migration(framed, req_num, pid, &pools, target_state),
            Request::SelRecall {
                req_num,
                pid,
                target_state,
                ..
            } => self.sel_recall(framed, req_num, pid, target_state),
            Request::Format {
                req_num,
                pool,
                tape_id,
                ..
            } => self.maintenance(framed, Operation::Format, req_num, pool, tape_id),
            Request::Check {
                req_num,
                pool,
                tape_id,
                ..
            } => self.maintenance(framed, Operation::Check, req_num, pool, tape_id),
            Request::Status { .. } => framed.send_response(&Response::Status {
                success: true,
                pid: process::id(),
            }),
            Request::Add { managed_fs, .. } => self.add(framed, &managed_fs),
            Request::InfoRequests { req_num, .. } => self.info_requests(framed, req_num),
            Request::InfoJobs { req_num, .. } => self.info_jobs(framed, req_num),
            Request::InfoDrives { .. } => self.info_drives(framed),
            Request::InfoTapes { .. } => self.info_tapes(framed),
            Request::InfoPools { .. } => self.info_pools(framed),
            Request::PoolCreate { pool, .. } => {
                let error = self.pool_mutation(|| self.services.inventory.pool_create(&pool));
                framed.send_response(&Response::Pool {
                    tape_id: String::new(),
                    error,
                })
            }
            Request::PoolDelete { pool, .. } => {
                let error = self.pool_mutation(|| self.services.inventory.pool_delete(&pool));
                framed.send_response(&Response::Pool {
                    tape_id: String::new(),
                    error,
                })
            }
            Request::PoolAdd { pool, tapes, .. } => {
                for tape in tapes {
                    let error =
                        self.pool_mutation(|| self.services.inventory.pool_add(&pool, &tape));
                    framed.send_response(&Response::Pool { tape_id: tape, error })?;
                }
                Ok(())
            }
            Request::PoolRemove { pool, tapes, .. } => {
                for tape in tapes {
                    let error =
                        self.pool_mutation(|| self.services.inventory.pool_remove(&pool, &tape));
                    framed.send_response(&Response::Pool { tape_id: tape, error })?;
                }
                Ok(())
            }
            Request::Retrieve { .. } => {
                let error = match self.services.inventory.inventorize() {
                    Ok(()) => OK,
                    Err(err) => {
                        warn!(%err, "inventory rescan failed");
                        err.to_op_error().code()
                    }
                };
                framed.send_response(&Response::Retrieve { error })
            }
            Request::ReqNum { .. }
            | Request::Stop { .. }
            | Request::SendObjects { .. }
            | Request::ReqStatus { .. } => {
                warn!(req_num = local_req_num, "message out of sequence");
                Ok(())
            }
        }
    }

    fn migration(
        &self,
        framed: &mut Framed,
        req_num: ReqNum,
        pid: u32,
        pools_csv: &str,
        target_state: i32,
    ) -> HandlerResult {
        let mut error = OK;
        let mut operation = None;

        if self.services.ctx.terminate() {
            error = OpError::Terminating.code();
        } else {
            let mut pools: Vec<String> = Vec::new();
            for pool in pools_csv.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                if !pools.iter().any(|p| p == pool) {
                    pools.push(pool.to_string());
                }
            }
            if pools.is_empty() || pools.len() > 3 {
                error = OpError::WrongPoolNum.code();
            } else {
                let all_exist = self
                    .services
                    .inventory
                    .scoped(|| pools.iter().all(|p| self.services.inventory.pool_exists(p)));
                if !all_exist {
                    error = OpError::NotAllPoolsExist.code();
                }
            }
            if error == OK {
                let target = FileState::from_code(target_state).unwrap_or(FileState::Migrated);
                operation = Some(FileOperation::Migration {
                    pid,
                    req_num,
                    pools,
                    target_state: target,
                });
            }
        }

        framed.send_response(&Response::Migrate {
            error,
            req_num,
            pid,
        })?;

        if let Some(operation) = operation {
            self.receive_objects(framed, &operation, req_num, pid)?;
            if let Err(err) = operation.add_request(&self.services) {
                warn!(req_num, %err, "failed to admit migration request");
            }
            self.status_poll(framed, &operation)?;
        }
        Ok(())
    }

    fn sel_recall(
        &self,
        framed: &mut Framed,
        req_num: ReqNum,
        pid: u32,
        target_state: i32,
    ) -> HandlerResult {
        let mut error = OK;
        let mut operation = None;

        if self.services.ctx.terminate() {
            error = OpError::Terminating.code();
        } else {
            let target = FileState::from_code(target_state).unwrap_or(FileState::Resident);
            operation = Some(FileOperation::SelRecall {
                pid,
                req_num,
                target_state: target,
            });
        }

        framed.send_response(&Response::SelRecall {
            error,
            req_num,
            pid,
        })?;

        if let Some(operation) = operation {
            self.receive_objects(framed, &operation, req_num, pid)?;
            if let Err(err) = operation.add_request(&self.services) {
                warn!(req_num, %err, "failed to admit recall request");
            }
            self.status_poll(framed, &operation)?;
        }
        Ok(())
    }

    fn maintenance(
        &self,
        framed: &mut Framed,
        op: Operation,
        req_num: ReqNum,
        pool: String,
        tape_id: String,
    ) -> HandlerResult {
        let error = if self.services.ctx.terminate() {
            OpError::Terminating.code()
        } else if self.services.inventory.get_cartridge(&tape_id).is_none() {
            OpError::TapeNotExists.code()
        } else {
            let maintenance = TapeMaintenance {
                op,
                req_num,
                pool,
                tape_id,
            };
            match maintenance.add_request(&self.services) {
                Ok(()) => OK,
                Err(err) => {
                    warn!(req_num, %err, "failed to admit maintenance request");
                    OpError::General.code()
                }
            }
        };
        framed.send_response(&Response::Maintenance { error, req_num })
    }

    /// The receive-objects loop: batches of file names, terminated by a
    /// batch containing an empty name. Duplicates are reported per file
    /// and never abort the request.
    fn receive_objects(
        &self,
        framed: &mut Framed,
        operation: &FileOperation,
        req_num: ReqNum,
        pid: u32,
    ) -> HandlerResult {
        loop {
            if self.services.ctx.forced_terminate() {
                return Err(ProtoError::Closed);
            }
            let file_names = match framed.recv_request()? {
                Request::SendObjects {
                    key, file_names, ..
                } if key == self.services.ctx.session_key() => file_names,
                other => {
                    warn!(req_num, ?other, "expected an object batch");
                    return Err(ProtoError::Closed);
                }
            };

            let mut finished = false;
            let mut diagnostics = Vec::new();
            for file_name in &file_names {
                if self.services.ctx.terminate() {
                    return Err(ProtoError::Closed);
                }
                if file_name.is_empty() {
                    finished = true;
                    continue;
                }
                match operation.add_job(&self.services, file_name) {
                    Ok(()) => {}
                    Err(SchedError::Store(StoreError::DuplicateJob { .. })) => {
                        info!(req_num, file = %file_name, "duplicate file in request");
                        diagnostics.push(format!("file already queued: {file_name}"));
                    }
                    Err(err) => {
                        warn!(req_num, file = %file_name, %err, "cannot queue file");
                        diagnostics.push(format!("cannot queue {file_name}: {err}"));
                    }
                }
            }

            framed.send_response(&Response::SendObjects {
                success: true,
                req_num,
                pid,
                diagnostics,
            })?;
            if finished {
                return Ok(());
            }
        }
    }

    /// The status-poll loop: the client re-asks until `done`.
    fn status_poll(&self, framed: &mut Framed, operation: &FileOperation) -> HandlerResult {
        loop {
            let (req_num, pid) = match framed.recv_request()? {
                Request::ReqStatus {
                    key, req_num, pid, ..
                } if key == self.services.ctx.session_key() => (req_num, pid),
                other => {
                    warn!(?other, "expected a status poll");
                    return Err(ProtoError::Closed);
                }
            };

            let (counts, done) = match operation.query_result(&self.services) {
                Ok(result) => result,
                Err(err) => {
                    warn!(req_num, %err, "status query failed");
                    framed.send_response(&Response::ReqStatus {
                        success: false,
                        req_num,
                        pid,
                        resident: 0,
                        premigrated: 0,
                        migrated: 0,
                        failed: 0,
                        done: true,
                    })?;
                    return Ok(());
                }
            };
            framed.send_response(&Response::ReqStatus {
                success: true,
                req_num,
                pid,
                resident: counts.resident,
                premigrated: counts.premigrated,
                migrated: counts.migrated,
                failed: counts.failed,
                done,
            })?;
            if done {
                return Ok(());
            }
        }
    }

    /// The stop handler: set the termination flags, stream
    /// still-running responses until the queue drained, then wake the
    /// scheduler and the accept loop.
    fn stop(&self, framed: &mut Framed, forced: bool, finish: bool) -> HandlerResult {
        info!(forced, finish, "stop requested");
        self.services.ctx.set_terminate();
        if forced {
            self.services.ctx.set_forced_terminate();
        }
        if finish {
            self.services.ctx.set_finish_terminate();
            // Drain migration replicas parked on their cartridge gates.
            self.services.inventory.notify_all_gates();
        }
        self.services.ctx.scheduler().notify();

        loop {
            let in_progress = if self.services.ctx.forced_terminate()
                || self.services.ctx.finish_terminate()
            {
                0
            } else {
                self.services.store.in_progress_count().unwrap_or(0)
            };
            debug!(in_progress, "stop poll");
            framed.send_response(&Response::Stop {
                success: in_progress == 0,
            })?;
            if in_progress == 0 {
                break;
            }
            match framed.recv_request()? {
                Request::Stop { key, .. } if key == self.services.ctx.session_key() => {}
                other => {
                    warn!(?other, "expected a stop poll");
                    return Err(ProtoError::Closed);
                }
            }
        }

        self.services.ctx.scheduler().notify();
        raise_wakeup();
        Ok(())
    }

    fn add(&self, framed: &mut Framed, managed_fs: &str) -> HandlerResult {
        let path = Path::new(managed_fs);
        let (outcome, error) = match self.services.connector.is_managed(path) {
            Ok(true) => {
                warn!(fs = managed_fs, "file system already managed");
                (spool_proto::AddOutcome::AlreadyAdded, OK)
            }
            Ok(false) => match self.services.connector.manage_fs(path) {
                Ok(()) => {
                    info!(fs = managed_fs, "file system now managed");
                    (spool_proto::AddOutcome::Success, OK)
                }
                Err(BackendError::AlreadyManaged(_)) => {
                    (spool_proto::AddOutcome::AlreadyAdded, OK)
                }
                Err(BackendError::FsCheck(_)) => (
                    spool_proto::AddOutcome::Failed,
                    OpError::FsCheck.code(),
                ),
                Err(BackendError::FsAdd(_)) => {
                    (spool_proto::AddOutcome::Failed, OpError::FsAdd.code())
                }
                Err(err) => {
                    warn!(fs = managed_fs, %err, "add failed");
                    (spool_proto::AddOutcome::Failed, OpError::General.code())
                }
            },
            Err(err) => {
                warn!(fs = managed_fs, %err, "file system check failed");
                (
                    spool_proto::AddOutcome::Failed,
                    OpError::FsCheck.code(),
                )
            }
        };
        framed.send_response(&Response::Add { outcome, error })
    }

    fn info_requests(&self, framed: &mut Framed, req_num: ReqNum) -> HandlerResult {
        let filter = if req_num == UNSET { None } else { Some(req_num) };
        if let Ok(rows) = self.services.store.requests(filter) {
            for row in rows {
                framed.send_response(&Response::InfoRequest {
                    operation: row.operation.as_str().to_string(),
                    req_num: row.req_num,
                    tape_id: row.tape_id,
                    target_state: row.target_state.as_str().to_string(),
                    state: row.state.as_str().to_string(),
                })?;
            }
        }
        framed.send_response(&Response::info_request_sentinel())
    }

    fn info_jobs(&self, framed: &mut Framed, req_num: ReqNum) -> HandlerResult {
        let filter = if req_num == UNSET { None } else { Some(req_num) };
        if let Ok(rows) = self.services.store.jobs(filter) {
            for row in rows {
                framed.send_response(&Response::InfoJob {
                    operation: row.operation.as_str().to_string(),
                    file_name: row.file_name,
                    req_num: row.req_num,
                    repl_num: i64::from(row.repl_num),
                    file_size: row.file_size,
                    tape_id: row.tape_id,
                    state: row.file_state.as_str().to_string(),
                })?;
            }
        }
        framed.send_response(&Response::info_job_sentinel())
    }

    fn info_drives(&self, framed: &mut Framed) -> HandlerResult {
        for drive in self.services.inventory.drives() {
            framed.send_response(&Response::InfoDrive {
                id: drive.id,
                devname: drive.devname,
                slot: i64::from(drive.slot),
                status: if drive.busy { "in use" } else { "free" }.to_string(),
                busy: drive.busy,
            })?;
        }
        framed.send_response(&Response::info_drive_sentinel())
    }

    fn info_tapes(&self, framed: &mut Framed) -> HandlerResult {
        let in_progress: Vec<(String, i64)> = self
            .services
            .store
            .requests(None)
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.state == RequestState::InProgress && !r.tape_id.is_empty())
            .map(|r| (r.tape_id, 1))
            .collect();
        for cart in self.services.inventory.cartridges() {
            let busy_requests = in_progress
                .iter()
                .filter(|(tape, _)| *tape == cart.id)
                .count() as i64;
            framed.send_response(&Response::InfoTape {
                id: cart.id.clone(),
                slot: cart.slot.map_or(UNSET, i64::from),
                total_cap: cart.total_cap_mib as i64,
                remaining_cap: cart.remaining_cap_mib as i64,
                status: "valid".to_string(),
                in_progress: busy_requests,
                pool: cart.pool,
                state: cart.state.as_str().to_string(),
            })?;
        }
        framed.send_response(&Response::info_tape_sentinel())
    }

    fn info_pools(&self, framed: &mut Framed) -> HandlerResult {
        for pool in self.services.inventory.pool_summaries() {
            framed.send_response(&Response::InfoPool {
                name: pool.name,
                total: pool.total_mib as i64,
                free: pool.free_mib as i64,
                unref: 0,
                num_tapes: pool.num_tapes as i64,
            })?;
        }
        framed.send_response(&Response::info_pool_sentinel())
    }

    /// Apply one pool mutation under the inventory lock, persisting the
    /// membership file on success.
    fn pool_mutation(
        &self,
        mutate: impl FnOnce() -> spool_inventory::Result<()>,
    ) -> i32 {
        self.services.inventory.scoped(|| match mutate() {
            Ok(()) => match self.services.inventory.write_pools() {
                Ok(()) => OK,
                Err(err) => {
                    warn!(%err, "failed to persist pool membership");
                    err.to_op_error().code()
                }
            },
            Err(err) => err.to_op_error().code(),
        })
    }
}
