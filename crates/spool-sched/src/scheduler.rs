//! The scheduler thread
//!
//! Waits on its condvar, and on every wake-up scans the `NEW` request
//! rows in priority order. For each row it takes the inventory lock,
//! computes the smallest file still to migrate, and runs the resource
//! decision procedures; a successful reservation atomically moves the
//! row to `INPROGRESS` and enqueues the matching worker. Requests that
//! need a cartridge brought into position trigger a tape motion and
//! stay `NEW` until a later pass finds the motion completed.

use std::process;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use spool_core::Operation;
use spool_inventory::{CartridgeState, Drive};
use spool_store::RequestRecord;

use crate::mover::TapeMover;
use crate::ops::{Assignment, FileOperation, TapeMaintenance};
use crate::subserver::SubServer;
use crate::{Result, Services};

const MIB: u64 = 1024 * 1024;

/// The resources a scheduling attempt settles on.
#[derive(Debug, Clone, Default)]
struct Reservation {
    drive_id: String,
    tape_id: String,
}

/// The one scheduler of the server.
pub struct Scheduler {
    services: Services,
    subs: Arc<SubServer>,
}

impl Scheduler {
    #[must_use]
    pub fn new(services: Services, subs: Arc<SubServer>) -> Self {
        Self { services, subs }
    }

    /// Start the scheduler thread.
    pub fn spawn(self) -> JoinHandle<()> {
        thread::Builder::new()
            .name("scheduler".into())
            .spawn(move || self.run())
            .expect("failed to spawn scheduler thread")
    }

    /// The scheduler main loop. Returns after a termination wake-up,
    /// once every worker drained and every parked worker was notified.
    pub fn run(&self) {
        info!("scheduler running");
        loop {
            self.services.ctx.scheduler().wait();
            if self.services.ctx.terminate() {
                break;
            }
            self.pass();
        }
        info!("scheduler terminating, draining workers");
        self.subs.wait_all_remaining();
        self.services.inventory.notify_all_gates();
        info!("scheduler stopped");
    }

    /// One scan over the `NEW` rows.
    fn pass(&self) {
        let rows = match self.services.store.new_requests() {
            Ok(rows) => rows,
            Err(err) => {
                error!(%err, "cannot read request queue");
                return;
            }
        };
        for req in rows {
            let result = self
                .services
                .inventory
                .scoped(|| self.try_schedule(&req));
            if let Err(err) = result {
                error!(req_num = req.req_num, %err, "scheduling attempt failed");
            }
        }
    }

    fn try_schedule(&self, req: &RequestRecord) -> Result<()> {
        let min_file_size = if req.operation == Operation::Migration {
            self.services
                .store
                .smallest_resident_job(req.req_num, req.repl_num)?
                .unwrap_or(0) as u64
        } else {
            0
        };
        let mount_target = match req.operation {
            Operation::Format | Operation::Check => Operation::Move,
            _ => Operation::Mount,
        };

        let mut reservation = Reservation {
            drive_id: req.drive_id.clone(),
            tape_id: req.tape_id.clone(),
        };
        if !self.res_avail(req, min_file_size, mount_target, &mut reservation)? {
            return Ok(());
        }

        debug!(
            op = req.operation.as_str(),
            req_num = req.req_num,
            repl_num = req.repl_num,
            drive_id = %reservation.drive_id,
            tape_id = %reservation.tape_id,
            "request scheduled"
        );
        self.dispatch(req, &reservation)
    }

    /// Persist the reservation and start the worker.
    fn dispatch(&self, req: &RequestRecord, reservation: &Reservation) -> Result<()> {
        let services = self.services.clone();
        match req.operation {
            Operation::Mount | Operation::Move | Operation::Unmount => {
                self.services
                    .store
                    .mark_in_progress(req.req_num, &reservation.drive_id)?;
                let mover = TapeMover::new(
                    reservation.drive_id.clone(),
                    reservation.tape_id.clone(),
                    req.operation,
                );
                let req_num = req.req_num;
                self.subs.enqueue(mover.label(), move || {
                    mover.exec_request(&services, req_num);
                });
            }
            Operation::Format | Operation::Check => {
                self.services
                    .store
                    .mark_in_progress(req.req_num, &reservation.drive_id)?;
                let maintenance = TapeMaintenance {
                    op: req.operation,
                    req_num: req.req_num,
                    pool: req.pool.clone(),
                    tape_id: reservation.tape_id.clone(),
                };
                let drive_id = reservation.drive_id.clone();
                self.subs.enqueue(maintenance.label(), move || {
                    maintenance.exec_request(&services, &drive_id);
                });
            }
            Operation::Migration => {
                self.services.store.mark_migration_in_progress(
                    req.req_num,
                    req.repl_num,
                    &req.pool,
                    &reservation.tape_id,
                    &reservation.drive_id,
                )?;
                let operation = FileOperation::Migration {
                    pid: process::id(),
                    req_num: req.req_num,
                    pools: Vec::new(),
                    target_state: req.target_state,
                };
                let assignment = Assignment {
                    repl_num: req.repl_num,
                    pool: req.pool.clone(),
                    drive_id: reservation.drive_id.clone(),
                    tape_id: reservation.tape_id.clone(),
                };
                let label = operation.label(&assignment);
                self.subs.enqueue(label, move || {
                    operation.exec_request(&services, &assignment);
                });
            }
            Operation::SelRecall | Operation::TransRecall => {
                self.services.store.mark_recall_in_progress(
                    req.req_num,
                    &reservation.tape_id,
                    &reservation.drive_id,
                )?;
                let operation = if req.operation == Operation::SelRecall {
                    FileOperation::SelRecall {
                        pid: process::id(),
                        req_num: req.req_num,
                        target_state: req.target_state,
                    }
                } else {
                    FileOperation::TransRecall {
                        req_num: req.req_num,
                    }
                };
                let assignment = Assignment {
                    repl_num: 0,
                    pool: String::new(),
                    drive_id: reservation.drive_id.clone(),
                    tape_id: reservation.tape_id.clone(),
                };
                let label = operation.label(&assignment);
                self.subs.enqueue(label, move || {
                    operation.exec_request(&services, &assignment);
                });
            }
        }
        Ok(())
    }

    fn res_avail(
        &self,
        req: &RequestRecord,
        min_file_size: u64,
        mount_target: Operation,
        reservation: &mut Reservation,
    ) -> Result<bool> {
        if req.operation.is_motion() {
            self.res_avail_tape_move(req, reservation)
        } else if req.operation == Operation::Migration && req.tape_id.is_empty() {
            self.pool_res_avail(req, min_file_size, mount_target, reservation)
        } else {
            self.tape_res_avail(req, mount_target, reservation)
        }
    }

    /// A specific cartridge is required.
    fn tape_res_avail(
        &self,
        req: &RequestRecord,
        mount_target: Operation,
        reservation: &mut Reservation,
    ) -> Result<bool> {
        let inv = &self.services.inventory;
        let Some(cart) = inv.get_cartridge(&reservation.tape_id) else {
            warn!(
                req_num = req.req_num,
                tape_id = %reservation.tape_id,
                "cartridge no longer exists, completing request"
            );
            self.services.store.mark_completed(req.req_num)?;
            return Ok(false);
        };

        match cart.state {
            CartridgeState::Moving => return Ok(false),
            // The cartridge is working for somebody else: ask its holder
            // to step down, once, and try again on a later pass.
            CartridgeState::InUse => {
                if !cart.requested {
                    inv.request_suspend(req.operation, &reservation.tape_id);
                }
                return Ok(false);
            }
            CartridgeState::Mounted => {
                for drive in inv.drives() {
                    if Some(drive.slot) == cart.slot {
                        if drive.busy {
                            return Ok(false);
                        }
                        reservation.drive_id = drive.id;
                        inv.make_use(&reservation.drive_id, &reservation.tape_id)?;
                        return Ok(true);
                    }
                }
                return Ok(false);
            }
            _ => {}
        }

        // A free drive with an empty slot can take the cartridge.
        for drive in inv.drives() {
            if !drive_is_usable(&drive, req) {
                continue;
            }
            if !slot_occupied(inv, drive.slot) && cart.state == CartridgeState::Unmounted {
                self.enqueue_motion(req, &drive.id, &reservation.tape_id, mount_target)?;
                return Ok(false);
            }
        }

        // No empty drive: free one by unmounting an idle cartridge.
        for drive in inv.drives() {
            if !drive_is_usable(&drive, req) {
                continue;
            }
            let victim = inv
                .cartridges()
                .into_iter()
                .find(|c| c.slot == Some(drive.slot) && c.state == CartridgeState::Mounted);
            if let Some(victim) = victim {
                self.enqueue_motion(req, &drive.id, &victim.id, Operation::Unmount)?;
                inv.clear_requested(&reservation.tape_id);
                return Ok(false);
            }
        }

        // Every drive is working. Ask a lower-priority holder to yield,
        // once.
        if cart.requested {
            return Ok(false);
        }
        inv.request_suspend(req.operation, &reservation.tape_id);
        Ok(false)
    }

    /// Any cartridge of the pool with room for the smallest job will do.
    fn pool_res_avail(
        &self,
        req: &RequestRecord,
        min_file_size: u64,
        mount_target: Operation,
        reservation: &mut Reservation,
    ) -> Result<bool> {
        let inv = &self.services.inventory;
        let pool_carts = inv.pool_cartridges(&req.pool)?;

        let mut unmounted_exists = false;
        for cart in &pool_carts {
            match cart.state {
                CartridgeState::Mounted => {
                    let drive = inv
                        .drives()
                        .into_iter()
                        .find(|d| Some(d.slot) == cart.slot);
                    if let Some(drive) = drive {
                        if !drive.busy && cart.remaining_cap_mib * MIB >= min_file_size {
                            reservation.tape_id = cart.id.clone();
                            reservation.drive_id = drive.id;
                            inv.make_use(&reservation.drive_id, &reservation.tape_id)?;
                            return Ok(true);
                        }
                    }
                }
                CartridgeState::Unmounted => unmounted_exists = true,
                _ => {}
            }
        }

        // Nothing mountable; unmounting a foreign cartridge would not
        // help either.
        if !unmounted_exists {
            return Ok(false);
        }

        // One motion per request and pool at a time.
        if inv.request_exists(req.req_num, &req.pool) {
            return Ok(false);
        }

        // An empty usable drive takes any fitting pool cartridge.
        for drive in inv.drives() {
            if !drive_is_usable(&drive, req) {
                continue;
            }
            if slot_occupied(inv, drive.slot) {
                continue;
            }
            let candidate = pool_carts.iter().find(|c| {
                c.state == CartridgeState::Unmounted && c.remaining_cap_mib * MIB >= min_file_size
            });
            if let Some(cart) = candidate {
                self.enqueue_motion(req, &drive.id, &cart.id, mount_target)?;
                return Ok(false);
            }
        }

        // Otherwise make room by unmounting a cartridge from another
        // pool.
        for drive in inv.drives() {
            if !drive_is_usable(&drive, req) {
                continue;
            }
            let victim = inv.cartridges().into_iter().find(|c| {
                c.slot == Some(drive.slot)
                    && c.state == CartridgeState::Mounted
                    && c.pool != req.pool
            });
            if let Some(victim) = victim {
                self.enqueue_motion(req, &drive.id, &victim.id, Operation::Unmount)?;
                return Ok(false);
            }
        }

        Ok(false)
    }

    /// A queued tape motion only needs its drive free and the slot in
    /// the right state.
    fn res_avail_tape_move(
        &self,
        req: &RequestRecord,
        reservation: &mut Reservation,
    ) -> Result<bool> {
        let inv = &self.services.inventory;
        let (Some(drive), Some(cart)) = (
            inv.get_drive(&req.drive_id),
            inv.get_cartridge(&req.tape_id),
        ) else {
            warn!(
                req_num = req.req_num,
                drive_id = %req.drive_id,
                tape_id = %req.tape_id,
                "motion target no longer exists, completing request"
            );
            self.services.store.mark_completed(req.req_num)?;
            return Ok(false);
        };

        if drive.busy {
            return Ok(false);
        }
        if matches!(req.operation, Operation::Mount | Operation::Move) {
            if slot_occupied(inv, drive.slot) {
                return Ok(false);
            }
        } else if cart.slot != Some(drive.slot) || cart.state != CartridgeState::Mounted {
            return Ok(false);
        }

        reservation.drive_id = drive.id;
        reservation.tape_id = cart.id;
        inv.make_use(&reservation.drive_id, &reservation.tape_id)?;
        Ok(true)
    }

    /// Initiate a tape motion on behalf of `req`, unless one is already
    /// pending for it. Motion requests never spawn further motions.
    fn enqueue_motion(
        &self,
        req: &RequestRecord,
        drive_id: &str,
        tape_id: &str,
        op: Operation,
    ) -> Result<()> {
        if req.operation.is_motion() {
            return Ok(());
        }
        if self.services.inventory.request_exists(req.req_num, &req.pool) {
            return Ok(());
        }
        TapeMover::new(drive_id, tape_id, op).add_request(
            &self.services,
            req.req_num,
            &req.pool,
        )
    }
}

fn drive_is_usable(drive: &Drive, req: &RequestRecord) -> bool {
    if drive.busy {
        return false;
    }
    match drive.move_req_num {
        None => true,
        Some(req_num) => req_num == req.req_num && drive.move_req_pool == req.pool,
    }
}

fn slot_occupied(inv: &spool_inventory::Inventory, slot: u32) -> bool {
    inv.cartridges()
        .iter()
        .any(|c| c.slot == Some(slot) && c.state == CartridgeState::Mounted)
}
