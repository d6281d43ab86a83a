//! File operation workers
//!
//! The sealed [`FileOperation`] variants share one contract: `add_job`
//! during the receive-objects loop, `add_request` when the object stream
//! ends, `exec_request` once the scheduler reserved resources, and
//! `query_result` for the status-poll loop. [`TapeMaintenance`] covers
//! the single-cartridge format and check requests, which need the
//! cartridge moved into the drive rather than mounted for I/O.

use std::path::Path;

use tracing::{debug, error, info, warn};

use spool_core::backend::BackendError;
use spool_core::{FileState, Operation, ReqNum};
use spool_inventory::CartridgeState;
use spool_store::{JobCounts, JobRecord, RequestRecord};

use crate::{Result, SchedError, Services};

/// Resources the scheduler reserved for one `exec_request`.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub repl_num: i32,
    pub pool: String,
    pub drive_id: String,
    pub tape_id: String,
}

/// One client-submitted file operation.
#[derive(Debug, Clone)]
pub enum FileOperation {
    Migration {
        pid: u32,
        req_num: ReqNum,
        pools: Vec<String>,
        target_state: FileState,
    },
    SelRecall {
        pid: u32,
        req_num: ReqNum,
        target_state: FileState,
    },
    /// Driven by kernel upcalls; admission happens through the
    /// connector, execution is identical to a selective recall back to
    /// resident.
    TransRecall { req_num: ReqNum },
}

impl FileOperation {
    #[must_use]
    pub const fn operation(&self) -> Operation {
        match self {
            Self::Migration { .. } => Operation::Migration,
            Self::SelRecall { .. } => Operation::SelRecall,
            Self::TransRecall { .. } => Operation::TransRecall,
        }
    }

    #[must_use]
    pub const fn req_num(&self) -> ReqNum {
        match self {
            Self::Migration { req_num, .. }
            | Self::SelRecall { req_num, .. }
            | Self::TransRecall { req_num } => *req_num,
        }
    }

    fn target_state(&self) -> FileState {
        match self {
            Self::Migration { target_state, .. } | Self::SelRecall { target_state, .. } => {
                *target_state
            }
            Self::TransRecall { .. } => FileState::Resident,
        }
    }

    /// Queue one file. Migrations insert one row per replica pool;
    /// recalls look up where the tape copy lives and record it on the
    /// row. Duplicate keys surface as `StoreError::DuplicateJob`.
    pub fn add_job(&self, services: &Services, file_name: &str) -> Result<()> {
        let path = Path::new(file_name);
        match self {
            Self::Migration { req_num, pools, .. } => {
                let size = services.connector.file_size(path)?;
                for repl_num in 0..pools.len() as i32 {
                    services.store.add_job(&JobRecord {
                        operation: Operation::Migration,
                        file_name: file_name.to_string(),
                        req_num: *req_num,
                        repl_num,
                        file_size: size as i64,
                        tape_id: String::new(),
                        file_state: FileState::Resident,
                    })?;
                }
            }
            Self::SelRecall { req_num, .. } | Self::TransRecall { req_num } => {
                let attrs = services.connector.attrs(path)?;
                let (tape_id, file_state) = match attrs {
                    Some((tape, state)) => (tape, state),
                    // Never migrated, nothing to recall; the row still
                    // counts as resident in the status poll.
                    None => (String::new(), FileState::Resident),
                };
                let size = services.connector.file_size(path).unwrap_or(0);
                services.store.add_job(&JobRecord {
                    operation: self.operation(),
                    file_name: file_name.to_string(),
                    req_num: *req_num,
                    repl_num: 0,
                    file_size: size as i64,
                    tape_id,
                    file_state,
                })?;
            }
        }
        Ok(())
    }

    /// Admit the request rows once the object stream ended, then wake
    /// the scheduler. Migrations create one row per replica pool;
    /// recalls one row per cartridge their jobs live on.
    pub fn add_request(&self, services: &Services) -> Result<()> {
        match self {
            Self::Migration {
                req_num,
                pools,
                target_state,
                ..
            } => {
                for (repl_num, pool) in pools.iter().enumerate() {
                    services.store.add_request(&RequestRecord::new(
                        Operation::Migration,
                        *req_num,
                        *target_state,
                        pools.len() as i32,
                        repl_num as i32,
                        pool.clone(),
                        "",
                    ))?;
                }
                info!(req_num, replicas = pools.len(), "migration request admitted");
            }
            Self::SelRecall { req_num, .. } | Self::TransRecall { req_num } => {
                let tapes = services.store.recall_tapes(*req_num)?;
                for tape_id in &tapes {
                    services.store.add_request(&RequestRecord::new(
                        self.operation(),
                        *req_num,
                        self.target_state(),
                        1,
                        0,
                        "",
                        tape_id.clone(),
                    ))?;
                }
                info!(req_num, tapes = tapes.len(), "recall request admitted");
            }
        }
        services.ctx.scheduler().notify();
        Ok(())
    }

    /// Aggregated job progress and the done flag for the status poll.
    pub fn query_result(&self, services: &Services) -> Result<(JobCounts, bool)> {
        let counts = services.store.job_counts(self.req_num())?;
        let done = services.store.request_done(self.req_num())?;
        Ok((counts, done))
    }

    /// Run the reserved work. Never propagates: failures mark jobs
    /// failed and the request completes regardless.
    pub fn exec_request(&self, services: &Services, assignment: &Assignment) {
        match self {
            Self::Migration { .. } => self.run_migration(services, assignment),
            Self::SelRecall { .. } | Self::TransRecall { .. } => {
                self.run_recall(services, assignment)
            }
        }
    }

    /// Worker label shown in logs and thread names.
    #[must_use]
    pub fn label(&self, assignment: &Assignment) -> String {
        match self {
            Self::Migration { req_num, .. } => format!(
                "M({},{},{})",
                req_num, assignment.repl_num, assignment.pool
            ),
            Self::SelRecall { req_num, .. } => format!("SR({req_num})"),
            Self::TransRecall { req_num } => format!("TR({req_num})"),
        }
    }

    fn run_migration(&self, services: &Services, assignment: &Assignment) {
        let req_num = self.req_num();
        let target = self.target_state();

        let jobs = match services
            .store
            .resident_jobs_by_size(req_num, assignment.repl_num)
        {
            Ok(jobs) => jobs,
            Err(err) => {
                error!(req_num, %err, "cannot load migration jobs");
                self.finish_replica(services, assignment);
                return;
            }
        };

        for job in jobs {
            if services.ctx.forced_terminate() {
                info!(req_num, "migration interrupted by forced termination");
                break;
            }
            if self.cartridge_requested(services, &assignment.tape_id) {
                self.suspend(services, assignment);
                return;
            }

            match migrate_one(services, &job, assignment, target) {
                Ok(()) => {}
                Err(SchedError::Backend(BackendError::TapeFull(_))) => {
                    self.handle_tape_full(services, assignment);
                    return;
                }
                Err(err) => {
                    warn!(req_num, file = %job.file_name, %err, "migration job failed");
                    let _ = services.store.update_job(
                        &job.file_name,
                        req_num,
                        assignment.repl_num,
                        FileState::Failed,
                        None,
                    );
                }
            }
        }

        self.finish_replica(services, assignment);
    }

    fn run_recall(&self, services: &Services, assignment: &Assignment) {
        let req_num = self.req_num();
        let target = self.target_state();

        let jobs = match services
            .store
            .recall_jobs_on_tape(req_num, &assignment.tape_id)
        {
            Ok(jobs) => jobs,
            Err(err) => {
                error!(req_num, %err, "cannot load recall jobs");
                Vec::new()
            }
        };

        for job in jobs {
            if services.ctx.forced_terminate() {
                info!(req_num, "recall interrupted by forced termination");
                break;
            }
            match recall_one(services, &job, assignment, target) {
                Ok(()) => {}
                Err(err) => {
                    warn!(req_num, file = %job.file_name, %err, "recall job failed");
                    let _ = services.store.update_job(
                        &job.file_name,
                        req_num,
                        job.repl_num,
                        FileState::Failed,
                        None,
                    );
                }
            }
        }

        if let Err(err) = services
            .store
            .mark_recall_completed(req_num, &assignment.tape_id)
        {
            error!(req_num, %err, "failed to complete recall request");
        }
        services.inventory.release_drive(
            &assignment.drive_id,
            &assignment.tape_id,
            CartridgeState::Mounted,
        );
        services.ctx.scheduler().notify();
    }

    fn cartridge_requested(&self, services: &Services, tape_id: &str) -> bool {
        services
            .inventory
            .get_cartridge(tape_id)
            .is_some_and(|c| c.requested)
    }

    /// Preemption checkpoint hit: hand the cartridge over, park on its
    /// gate until the preemptor took it (or shutdown), then requeue this
    /// replica for a regular rescheduling pass.
    fn suspend(&self, services: &Services, assignment: &Assignment) {
        let req_num = self.req_num();
        info!(
            req_num,
            repl_num = assignment.repl_num,
            tape_id = %assignment.tape_id,
            "migration suspended by higher-priority request"
        );
        if let Err(err) =
            services
                .store
                .requeue_replica(req_num, assignment.repl_num, &assignment.pool, true)
        {
            error!(req_num, %err, "failed to requeue suspended replica");
        }
        services.inventory.release_drive(
            &assignment.drive_id,
            &assignment.tape_id,
            CartridgeState::Mounted,
        );
        services.ctx.scheduler().notify();

        if let Some(gate) = services.inventory.gate(&assignment.tape_id) {
            let inventory = services.inventory.clone();
            let ctx = services.ctx.clone();
            let tape_id = assignment.tape_id.clone();
            gate.wait_until(move || {
                let handed_over = !inventory
                    .get_cartridge(&tape_id)
                    .is_some_and(|c| c.requested);
                handed_over || ctx.terminate() || ctx.finish_terminate()
            });
        }
        services.ctx.scheduler().notify();
    }

    /// The cartridge ran out of room: detach it from the unwritten jobs
    /// and requeue the replica so the scheduler picks another pool
    /// member.
    fn handle_tape_full(&self, services: &Services, assignment: &Assignment) {
        let req_num = self.req_num();
        info!(
            req_num,
            repl_num = assignment.repl_num,
            tape_id = %assignment.tape_id,
            "cartridge full, requeueing remaining jobs"
        );
        if let Err(err) = services
            .store
            .clear_tape_on_resident(req_num, assignment.repl_num)
        {
            error!(req_num, %err, "failed to clear tape from jobs");
        }
        if let Err(err) =
            services
                .store
                .requeue_replica(req_num, assignment.repl_num, &assignment.pool, false)
        {
            error!(req_num, %err, "failed to requeue replica after tape full");
        }
        services.inventory.release_drive(
            &assignment.drive_id,
            &assignment.tape_id,
            CartridgeState::Mounted,
        );
        services.ctx.scheduler().notify();
    }

    fn finish_replica(&self, services: &Services, assignment: &Assignment) {
        let req_num = self.req_num();
        if let Err(err) =
            services
                .store
                .mark_replica_completed(req_num, assignment.repl_num, &assignment.pool)
        {
            error!(req_num, %err, "failed to complete migration replica");
        }
        services.inventory.release_drive(
            &assignment.drive_id,
            &assignment.tape_id,
            CartridgeState::Mounted,
        );
        debug!(req_num, repl_num = assignment.repl_num, "replica finished");
        services.ctx.scheduler().notify();
    }
}

fn migrate_one(
    services: &Services,
    job: &JobRecord,
    assignment: &Assignment,
    target: FileState,
) -> Result<()> {
    let path = Path::new(&job.file_name);
    let data = services.connector.read_file(path)?;
    services
        .library
        .write_file(&assignment.tape_id, &job.file_name, &data)?;

    services.store.update_job(
        &job.file_name,
        job.req_num,
        assignment.repl_num,
        FileState::Premigrated,
        Some(&assignment.tape_id),
    )?;
    services
        .connector
        .set_attrs(path, &assignment.tape_id, FileState::Premigrated)?;

    // The stub is cut by whichever replica premigrates the file last,
    // after every tape copy exists.
    if target == FileState::Migrated
        && services
            .store
            .file_fully_premigrated(&job.file_name, job.req_num)?
    {
        services.connector.stub_file(path)?;
        services
            .store
            .set_file_state_all_replicas(&job.file_name, job.req_num, FileState::Migrated)?;
        services
            .connector
            .set_attrs(path, &assignment.tape_id, FileState::Migrated)?;
    }

    if let Ok(remaining) = services.library.remaining_mib(&assignment.tape_id) {
        services
            .inventory
            .update_remaining(&assignment.tape_id, remaining);
    }
    debug!(file = %job.file_name, tape_id = %assignment.tape_id, "file migrated");
    Ok(())
}

fn recall_one(
    services: &Services,
    job: &JobRecord,
    assignment: &Assignment,
    target: FileState,
) -> Result<()> {
    let path = Path::new(&job.file_name);
    let data = services
        .library
        .read_file(&assignment.tape_id, &job.file_name)?;
    services.connector.restore_file(path, &data)?;

    if target == FileState::Resident {
        services.connector.clear_attrs(path)?;
    } else {
        services
            .connector
            .set_attrs(path, &assignment.tape_id, FileState::Premigrated)?;
    }
    services
        .store
        .update_job(&job.file_name, job.req_num, job.repl_num, target, None)?;
    debug!(file = %job.file_name, tape_id = %assignment.tape_id, "file recalled");
    Ok(())
}

/// Format and check maintenance requests.
#[derive(Debug, Clone)]
pub struct TapeMaintenance {
    pub op: Operation,
    pub req_num: ReqNum,
    pub pool: String,
    pub tape_id: String,
}

impl TapeMaintenance {
    /// Admit a maintenance request row and wake the scheduler. `op`
    /// must be format or check.
    pub fn add_request(&self, services: &Services) -> Result<()> {
        debug_assert!(matches!(self.op, Operation::Format | Operation::Check));
        services.store.add_request(&RequestRecord::new(
            self.op,
            self.req_num,
            FileState::Resident,
            1,
            0,
            self.pool.clone(),
            self.tape_id.clone(),
        ))?;
        info!(
            op = self.op.as_str(),
            req_num = self.req_num,
            tape_id = %self.tape_id,
            "maintenance request admitted"
        );
        services.ctx.scheduler().notify();
        Ok(())
    }

    /// Run the maintenance action on the reserved drive.
    pub fn exec_request(&self, services: &Services, drive_id: &str) {
        let result = match self.op {
            Operation::Format => services.library.format(drive_id, &self.tape_id),
            _ => services.library.check(drive_id, &self.tape_id),
        };
        match result {
            Ok(()) => info!(
                op = self.op.as_str(),
                req_num = self.req_num,
                tape_id = %self.tape_id,
                "maintenance completed"
            ),
            Err(err) => error!(
                op = self.op.as_str(),
                req_num = self.req_num,
                tape_id = %self.tape_id,
                %err,
                "maintenance failed"
            ),
        }
        if let Err(err) = services.store.mark_completed(self.req_num) {
            error!(req_num = self.req_num, %err, "failed to complete maintenance request");
        }
        services
            .inventory
            .release_drive(drive_id, &self.tape_id, CartridgeState::Mounted);
        services.ctx.scheduler().notify();
    }

    /// Worker label shown in logs and thread names.
    #[must_use]
    pub fn label(&self) -> String {
        let tag = if self.op == Operation::Format {
            "FMT"
        } else {
            "CHK"
        };
        format!("{tag}({})", self.tape_id)
    }
}
