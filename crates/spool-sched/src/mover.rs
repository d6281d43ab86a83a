//! Tape mover
//!
//! One mover instance encapsulates a single mount, move or unmount of a
//! cartridge in a drive. `add_request` only queues the motion as a
//! request row and signals the scheduler; the physical action happens in
//! `exec_request` once the scheduler found the drive free.

use tracing::{error, info};

use spool_core::{FileState, Operation, RequestState, ReqNum};
use spool_inventory::CartridgeState;
use spool_store::RequestRecord;

use crate::{Result, Services};

/// A single cartridge motion against one drive.
#[derive(Debug, Clone)]
pub struct TapeMover {
    drive_id: String,
    tape_id: String,
    op: Operation,
}

impl TapeMover {
    /// `op` must be one of the motion operations.
    #[must_use]
    pub fn new(drive_id: impl Into<String>, tape_id: impl Into<String>, op: Operation) -> Self {
        debug_assert!(op.is_motion());
        Self {
            drive_id: drive_id.into(),
            tape_id: tape_id.into(),
            op,
        }
    }

    /// Queue the motion: insert a `NEW` request row carrying the drive
    /// and cartridge, stamp the drive with the originating request so no
    /// second motion is issued for it, and wake the scheduler.
    ///
    /// `origin` is the request whose scheduling attempt needs this
    /// motion; `pool` its target pool (empty outside migrations).
    pub fn add_request(&self, services: &Services, origin: ReqNum, pool: &str) -> Result<()> {
        let motion_req = services.ctx.next_req_num();
        services
            .inventory
            .set_move_req(&self.drive_id, origin, pool)?;
        services.store.add_request(&RequestRecord {
            operation: self.op,
            req_num: motion_req,
            target_state: FileState::Resident,
            num_repl: 0,
            repl_num: 0,
            pool: String::new(),
            tape_id: self.tape_id.clone(),
            drive_id: self.drive_id.clone(),
            state: RequestState::New,
        })?;
        info!(
            op = self.op.as_str(),
            motion_req,
            origin,
            drive_id = %self.drive_id,
            tape_id = %self.tape_id,
            "tape motion queued"
        );
        services.ctx.scheduler().notify();
        Ok(())
    }

    /// Perform the motion. The scheduler has already marked the drive
    /// busy and the cartridge in use for this mover.
    pub fn exec_request(&self, services: &Services, req_num: ReqNum) {
        if let Err(err) = services
            .inventory
            .set_cartridge_state(&self.tape_id, CartridgeState::Moving)
        {
            error!(tape_id = %self.tape_id, %err, "cartridge vanished before motion");
        }

        let outcome = match self.op {
            Operation::Mount => services.library.mount(&self.drive_id, &self.tape_id),
            Operation::Move => services.library.move_to_drive(&self.drive_id, &self.tape_id),
            Operation::Unmount => services.library.unmount(&self.drive_id, &self.tape_id),
            _ => unreachable!("constructor rejects non-motion operations"),
        };

        let slot = services.inventory.get_drive(&self.drive_id).map(|d| d.slot);
        let end_state = match (&outcome, self.op) {
            (Ok(()), Operation::Unmount) => (None, CartridgeState::Unmounted),
            (Ok(()), _) => (slot, CartridgeState::Mounted),
            // A failed mount leaves the cartridge where it was; a failed
            // unmount leaves it in the drive.
            (Err(_), Operation::Unmount) => (slot, CartridgeState::Mounted),
            (Err(_), _) => (None, CartridgeState::Unmounted),
        };

        match &outcome {
            Ok(()) => info!(
                op = self.op.as_str(),
                req_num,
                drive_id = %self.drive_id,
                tape_id = %self.tape_id,
                "tape motion completed"
            ),
            Err(err) => error!(
                op = self.op.as_str(),
                req_num,
                drive_id = %self.drive_id,
                tape_id = %self.tape_id,
                %err,
                "tape motion failed"
            ),
        }

        if let Err(err) = services
            .inventory
            .set_cartridge_position(&self.tape_id, end_state.0, end_state.1)
        {
            error!(tape_id = %self.tape_id, %err, "cartridge vanished during motion");
        }
        services.inventory.clear_move_req(&self.drive_id);
        services
            .inventory
            .release_drive(&self.drive_id, &self.tape_id, end_state.1);
        if let Err(err) = services.store.mark_completed(req_num) {
            error!(req_num, %err, "failed to complete motion request");
        }
        services.ctx.scheduler().notify();
    }

    /// Worker label shown in logs and thread names.
    #[must_use]
    pub fn label(&self) -> String {
        let tag = match self.op {
            Operation::Mount => "mnt",
            Operation::Move => "mov",
            _ => "umn",
        };
        format!("{tag}({})", self.tape_id)
    }
}
