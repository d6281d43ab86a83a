//! The registry and its recursive lock

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use spool_core::backend::{BackendError, TapeLibrary};
use spool_core::{OpError, Operation, ReqNum};

use crate::types::{Cartridge, CartridgeGate, CartridgeState, Drive, PoolSummary};

/// Inventory and pool validation failures.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("pool already exists: {0}")]
    PoolExists(String),

    #[error("pool does not exist: {0}")]
    PoolNotExists(String),

    #[error("pool is not empty: {0}")]
    PoolNotEmpty(String),

    #[error("tape {0} already belongs to a pool")]
    TapeExistsInPool(String),

    #[error("tape {tape} is not a member of pool {pool}")]
    TapeNotExistsInPool { tape: String, pool: String },

    #[error("tape does not exist: {0}")]
    TapeNotExists(String),

    #[error("drive does not exist: {0}")]
    DriveNotExists(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl InventoryError {
    /// Wire code for the matching response message.
    #[must_use]
    pub fn to_op_error(&self) -> OpError {
        match self {
            Self::PoolExists(_) => OpError::PoolExists,
            Self::PoolNotExists(_) => OpError::PoolNotExists,
            Self::PoolNotEmpty(_) => OpError::PoolNotEmpty,
            Self::TapeExistsInPool(_) => OpError::TapeExistsInPool,
            Self::TapeNotExistsInPool { .. } => OpError::TapeNotExistsInPool,
            Self::TapeNotExists(_) => OpError::TapeNotExists,
            Self::DriveNotExists(_) => OpError::DriveBusy,
            Self::Io(_) | Self::Backend(_) => OpError::General,
        }
    }
}

/// Result alias for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;

#[derive(Default)]
struct Inner {
    drives: BTreeMap<String, Drive>,
    cartridges: BTreeMap<String, Cartridge>,
    pools: BTreeMap<String, BTreeSet<String>>,
    gates: HashMap<String, Arc<CartridgeGate>>,
}

/// The process-wide drive/cartridge/pool registry.
///
/// The lock is recursive because `inventorize` re-enters through
/// `pool_remove` while pruning vanished cartridges. Mutations borrow the
/// inner cell only for the duration of the change; gate notifications
/// happen after the borrow ends so parked workers can read fresh state.
pub struct Inventory {
    library: Arc<dyn TapeLibrary>,
    pools_path: PathBuf,
    state: ReentrantMutex<RefCell<Inner>>,
}

impl Inventory {
    /// Build the registry: scan the hardware, then load persisted pool
    /// membership, dropping entries whose cartridges vanished.
    pub fn open(library: Arc<dyn TapeLibrary>, pools_path: PathBuf) -> Result<Self> {
        let inventory = Self {
            library,
            pools_path,
            state: ReentrantMutex::new(RefCell::new(Inner::default())),
        };
        inventory.inventorize()?;
        inventory.read_pools()?;
        Ok(inventory)
    }

    /// Rescan the hardware and rebuild the in-memory state. Holds the
    /// registry lock for the whole scan, stalling scheduler passes while
    /// the picture is rebuilt. Pool members whose cartridge disappeared
    /// are pruned through `pool_remove`, which re-enters the lock.
    pub fn inventorize(&self) -> Result<()> {
        let guard = self.state.lock();
        let scan = self.library.scan()?;

        let stale: Vec<(String, String)> = {
            let mut inner = guard.borrow_mut();

            inner.drives = scan
                .drives
                .iter()
                .map(|d| {
                    (
                        d.id.clone(),
                        Drive {
                            id: d.id.clone(),
                            devname: d.devname.clone(),
                            slot: d.slot,
                            busy: false,
                            move_req_num: None,
                            move_req_pool: String::new(),
                            to_unblock: None,
                        },
                    )
                })
                .collect();

            let old_pools: HashMap<String, String> = inner
                .cartridges
                .values()
                .filter(|c| !c.pool.is_empty())
                .map(|c| (c.id.clone(), c.pool.clone()))
                .collect();

            inner.cartridges = scan
                .tapes
                .iter()
                .map(|t| {
                    let state = if t.slot.is_some() {
                        CartridgeState::Mounted
                    } else {
                        CartridgeState::Unmounted
                    };
                    (
                        t.id.clone(),
                        Cartridge {
                            id: t.id.clone(),
                            slot: t.slot,
                            pool: old_pools.get(&t.id).cloned().unwrap_or_default(),
                            total_cap_mib: t.total_cap_mib,
                            remaining_cap_mib: t.remaining_cap_mib,
                            state,
                            requested: false,
                        },
                    )
                })
                .collect();

            for id in scan.tapes.iter().map(|t| &t.id) {
                inner.gates.entry(id.clone()).or_default();
            }

            let mut stale = Vec::new();
            for (pool, tapes) in &inner.pools {
                for tape in tapes {
                    if !inner.cartridges.contains_key(tape) {
                        stale.push((pool.clone(), tape.clone()));
                    }
                }
            }
            stale
        };

        for (pool, tape) in stale {
            warn!(pool, tape, "pruning vanished cartridge from pool");
            self.pool_remove(&pool, &tape)?;
        }

        info!(
            drives = scan.drives.len(),
            tapes = scan.tapes.len(),
            "inventory rebuilt"
        );
        Ok(())
    }

    /// Run `f` with the registry lock held, giving the caller one
    /// consistent snapshot across a sequence of calls. Re-entrant, so
    /// the closure is free to use every other method.
    pub fn scoped<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.state.lock();
        f()
    }

    /// Copy of one drive record.
    #[must_use]
    pub fn get_drive(&self, id: &str) -> Option<Drive> {
        let guard = self.state.lock();
        let inner = guard.borrow();
        inner.drives.get(id).cloned()
    }

    /// Copy of one cartridge record.
    #[must_use]
    pub fn get_cartridge(&self, id: &str) -> Option<Cartridge> {
        let guard = self.state.lock();
        let inner = guard.borrow();
        inner.cartridges.get(id).cloned()
    }

    /// All drives, id-ordered.
    #[must_use]
    pub fn drives(&self) -> Vec<Drive> {
        let guard = self.state.lock();
        let inner = guard.borrow();
        inner.drives.values().cloned().collect()
    }

    /// All cartridges, id-ordered.
    #[must_use]
    pub fn cartridges(&self) -> Vec<Cartridge> {
        let guard = self.state.lock();
        let inner = guard.borrow();
        inner.cartridges.values().cloned().collect()
    }

    /// Tape ids of one pool, id-ordered.
    pub fn pool_tapes(&self, pool: &str) -> Result<Vec<String>> {
        let guard = self.state.lock();
        let inner = guard.borrow();
        inner
            .pools
            .get(pool)
            .map(|tapes| tapes.iter().cloned().collect())
            .ok_or_else(|| InventoryError::PoolNotExists(pool.to_string()))
    }

    /// Cartridge records of one pool, id-ordered.
    pub fn pool_cartridges(&self, pool: &str) -> Result<Vec<Cartridge>> {
        let guard = self.state.lock();
        let inner = guard.borrow();
        let tapes = inner
            .pools
            .get(pool)
            .ok_or_else(|| InventoryError::PoolNotExists(pool.to_string()))?;
        Ok(tapes
            .iter()
            .filter_map(|t| inner.cartridges.get(t).cloned())
            .collect())
    }

    /// Whether a pool with this name exists.
    #[must_use]
    pub fn pool_exists(&self, pool: &str) -> bool {
        let guard = self.state.lock();
        let inner = guard.borrow();
        inner.pools.contains_key(pool)
    }

    /// Capacity summaries for the info query.
    #[must_use]
    pub fn pool_summaries(&self) -> Vec<PoolSummary> {
        let guard = self.state.lock();
        let inner = guard.borrow();
        inner
            .pools
            .iter()
            .map(|(name, tapes)| {
                let mut summary = PoolSummary {
                    name: name.clone(),
                    total_mib: 0,
                    free_mib: 0,
                    num_tapes: 0,
                };
                for tape in tapes {
                    if let Some(cart) = inner.cartridges.get(tape) {
                        summary.num_tapes += 1;
                        summary.total_mib += cart.total_cap_mib;
                        summary.free_mib += cart.remaining_cap_mib;
                    }
                }
                summary
            })
            .collect()
    }

    /// Create an empty pool.
    pub fn pool_create(&self, pool: &str) -> Result<()> {
        let guard = self.state.lock();
        let mut inner = guard.borrow_mut();
        if inner.pools.contains_key(pool) {
            return Err(InventoryError::PoolExists(pool.to_string()));
        }
        inner.pools.insert(pool.to_string(), BTreeSet::new());
        debug!(pool, "pool created");
        Ok(())
    }

    /// Delete an empty pool.
    pub fn pool_delete(&self, pool: &str) -> Result<()> {
        let guard = self.state.lock();
        let mut inner = guard.borrow_mut();
        match inner.pools.get(pool) {
            None => return Err(InventoryError::PoolNotExists(pool.to_string())),
            Some(tapes) if !tapes.is_empty() => {
                return Err(InventoryError::PoolNotEmpty(pool.to_string()))
            }
            Some(_) => {}
        }
        inner.pools.remove(pool);
        debug!(pool, "pool deleted");
        Ok(())
    }

    /// Add a cartridge to a pool; a cartridge belongs to at most one.
    pub fn pool_add(&self, pool: &str, tape: &str) -> Result<()> {
        let guard = self.state.lock();
        let mut inner = guard.borrow_mut();
        if !inner.pools.contains_key(pool) {
            return Err(InventoryError::PoolNotExists(pool.to_string()));
        }
        let cart = inner
            .cartridges
            .get_mut(tape)
            .ok_or_else(|| InventoryError::TapeNotExists(tape.to_string()))?;
        if !cart.pool.is_empty() {
            return Err(InventoryError::TapeExistsInPool(tape.to_string()));
        }
        cart.pool = pool.to_string();
        inner
            .pools
            .get_mut(pool)
            .expect("pool presence checked above")
            .insert(tape.to_string());
        debug!(pool, tape, "tape added to pool");
        Ok(())
    }

    /// Remove a cartridge from a pool. Works for cartridges that no
    /// longer exist so `inventorize` can prune.
    pub fn pool_remove(&self, pool: &str, tape: &str) -> Result<()> {
        let guard = self.state.lock();
        let mut inner = guard.borrow_mut();
        let tapes = inner
            .pools
            .get_mut(pool)
            .ok_or_else(|| InventoryError::PoolNotExists(pool.to_string()))?;
        if !tapes.remove(tape) {
            return Err(InventoryError::TapeNotExistsInPool {
                tape: tape.to_string(),
                pool: pool.to_string(),
            });
        }
        if let Some(cart) = inner.cartridges.get_mut(tape) {
            cart.pool.clear();
        }
        debug!(pool, tape, "tape removed from pool");
        Ok(())
    }

    /// Persist pool membership, atomically replacing the previous file.
    pub fn write_pools(&self) -> Result<()> {
        let content = {
            let guard = self.state.lock();
            let inner = guard.borrow();
            let mut lines = String::new();
            for (pool, tapes) in &inner.pools {
                // Empty pools persist as a bare pool name.
                if tapes.is_empty() {
                    lines.push_str(pool);
                    lines.push('\n');
                }
                for tape in tapes {
                    lines.push_str(pool);
                    lines.push('\t');
                    lines.push_str(tape);
                    lines.push('\n');
                }
            }
            lines
        };
        let tmp = self.pools_path.with_extension("tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.pools_path)?;
        Ok(())
    }

    fn read_pools(&self) -> Result<()> {
        let raw = match fs::read_to_string(&self.pools_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            let mut parts = line.splitn(2, '\t');
            let pool = parts.next().unwrap_or_default().to_string();
            let tape = parts.next().map(str::to_string);
            if !self.pool_exists(&pool) {
                self.pool_create(&pool)?;
            }
            if let Some(tape) = tape {
                match self.pool_add(&pool, &tape) {
                    Ok(()) => {}
                    Err(InventoryError::TapeNotExists(_)) => {
                        warn!(pool, tape, "dropping pool member without cartridge");
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(())
    }

    /// True if some drive already carries a pending motion enqueued by
    /// `(req_num, pool)`.
    #[must_use]
    pub fn request_exists(&self, req_num: ReqNum, pool: &str) -> bool {
        let guard = self.state.lock();
        let inner = guard.borrow();
        inner
            .drives
            .values()
            .any(|d| d.move_req_num == Some(req_num) && d.move_req_pool == pool)
    }

    /// Stamp a drive with the motion a request just enqueued.
    pub fn set_move_req(&self, drive_id: &str, req_num: ReqNum, pool: &str) -> Result<()> {
        let guard = self.state.lock();
        let mut inner = guard.borrow_mut();
        let drive = inner
            .drives
            .get_mut(drive_id)
            .ok_or_else(|| InventoryError::DriveNotExists(drive_id.to_string()))?;
        drive.move_req_num = Some(req_num);
        drive.move_req_pool = pool.to_string();
        Ok(())
    }

    /// Clear the pending-motion bookkeeping after the motion completed.
    pub fn clear_move_req(&self, drive_id: &str) {
        let guard = self.state.lock();
        let mut inner = guard.borrow_mut();
        if let Some(drive) = inner.drives.get_mut(drive_id) {
            drive.move_req_num = None;
            drive.move_req_pool.clear();
        }
    }

    /// Reserve a drive/cartridge pair for a worker: drive goes busy, the
    /// cartridge `InUse`, and a pending preemption request is satisfied.
    pub fn make_use(&self, drive_id: &str, tape_id: &str) -> Result<()> {
        let gate = {
            let guard = self.state.lock();
            let mut inner = guard.borrow_mut();
            if !inner.drives.contains_key(drive_id) {
                return Err(InventoryError::DriveNotExists(drive_id.to_string()));
            }
            let cart = inner
                .cartridges
                .get_mut(tape_id)
                .ok_or_else(|| InventoryError::TapeNotExists(tape_id.to_string()))?;
            cart.state = CartridgeState::InUse;
            cart.requested = false;
            let drive = inner
                .drives
                .get_mut(drive_id)
                .expect("drive presence checked above");
            drive.busy = true;
            inner.gates.get(tape_id).cloned()
        };
        debug!(drive_id, tape_id, "resources reserved");
        if let Some(gate) = gate {
            gate.notify();
        }
        Ok(())
    }

    /// Release a worker's resources: drive free, preemption bookkeeping
    /// reset, cartridge into `state`.
    pub fn release_drive(&self, drive_id: &str, tape_id: &str, state: CartridgeState) {
        let gate = {
            let guard = self.state.lock();
            let mut inner = guard.borrow_mut();
            if let Some(drive) = inner.drives.get_mut(drive_id) {
                drive.busy = false;
                drive.to_unblock = None;
            }
            if let Some(cart) = inner.cartridges.get_mut(tape_id) {
                cart.state = state;
            }
            inner.gates.get(tape_id).cloned()
        };
        debug!(drive_id, tape_id, state = state.as_str(), "resources released");
        if let Some(gate) = gate {
            gate.notify();
        }
    }

    /// Record a cartridge's physical position and state after a motion.
    pub fn set_cartridge_position(
        &self,
        tape_id: &str,
        slot: Option<u32>,
        state: CartridgeState,
    ) -> Result<()> {
        let gate = {
            let guard = self.state.lock();
            let mut inner = guard.borrow_mut();
            let cart = inner
                .cartridges
                .get_mut(tape_id)
                .ok_or_else(|| InventoryError::TapeNotExists(tape_id.to_string()))?;
            cart.slot = slot;
            cart.state = state;
            inner.gates.get(tape_id).cloned()
        };
        if let Some(gate) = gate {
            gate.notify();
        }
        Ok(())
    }

    /// Mark a cartridge `Moving` while a mover owns it.
    pub fn set_cartridge_state(&self, tape_id: &str, state: CartridgeState) -> Result<()> {
        let guard = self.state.lock();
        let mut inner = guard.borrow_mut();
        let cart = inner
            .cartridges
            .get_mut(tape_id)
            .ok_or_else(|| InventoryError::TapeNotExists(tape_id.to_string()))?;
        cart.state = state;
        Ok(())
    }

    /// Refresh the remaining capacity after writes.
    pub fn update_remaining(&self, tape_id: &str, remaining_mib: u64) {
        let guard = self.state.lock();
        let mut inner = guard.borrow_mut();
        if let Some(cart) = inner.cartridges.get_mut(tape_id) {
            cart.remaining_cap_mib = remaining_mib;
        }
    }

    /// Ask the lowest-priority preemptable holder to step down: find a
    /// drive whose recorded unblock priority is strictly worse than
    /// `op`, record `op` on it and flag the cartridge as requested.
    /// Returns true when a suspension was requested.
    pub fn request_suspend(&self, op: Operation, tape_id: &str) -> bool {
        let guard = self.state.lock();
        let mut borrow = guard.borrow_mut();
        let inner = &mut *borrow;
        if !inner.cartridges.contains_key(tape_id) {
            return false;
        }
        let candidate = inner
            .drives
            .values_mut()
            .find(|d| op.code() < d.to_unblock.map_or(i32::MAX, Operation::code));
        if let Some(drive) = candidate {
            drive.to_unblock = Some(op);
            let drive_id = drive.id.clone();
            let cart = inner
                .cartridges
                .get_mut(tape_id)
                .expect("cartridge presence checked above");
            cart.requested = true;
            debug!(op = op.as_str(), tape_id, drive_id, "suspension requested");
            return true;
        }
        false
    }

    /// Clear a cartridge's suspension request.
    pub fn clear_requested(&self, tape_id: &str) {
        let gate = {
            let guard = self.state.lock();
            let mut inner = guard.borrow_mut();
            if let Some(cart) = inner.cartridges.get_mut(tape_id) {
                cart.requested = false;
            }
            inner.gates.get(tape_id).cloned()
        };
        if let Some(gate) = gate {
            gate.notify();
        }
    }

    /// The wait gate of one cartridge.
    #[must_use]
    pub fn gate(&self, tape_id: &str) -> Option<Arc<CartridgeGate>> {
        let guard = self.state.lock();
        let inner = guard.borrow();
        inner.gates.get(tape_id).cloned()
    }

    /// Wake every parked worker; used by shutdown paths.
    pub fn notify_all_gates(&self) {
        let gates: Vec<Arc<CartridgeGate>> = {
            let guard = self.state.lock();
            let inner = guard.borrow();
            inner.gates.values().cloned().collect()
        };
        for gate in gates {
            gate.notify();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spool_core::backend::{DriveSlot, LibraryScan, TapeSlot};

    /// Library stub with a fixed hardware picture.
    struct FixedLibrary {
        drives: u32,
        tapes: Vec<(String, u64)>,
    }

    impl TapeLibrary for FixedLibrary {
        fn scan(&self) -> std::result::Result<LibraryScan, BackendError> {
            Ok(LibraryScan {
                drives: (0..self.drives)
                    .map(|slot| DriveSlot {
                        id: format!("dr{slot}"),
                        devname: format!("/dev/sg{slot}"),
                        slot,
                    })
                    .collect(),
                tapes: self
                    .tapes
                    .iter()
                    .map(|(id, cap)| TapeSlot {
                        id: id.clone(),
                        slot: None,
                        total_cap_mib: *cap,
                        remaining_cap_mib: *cap,
                    })
                    .collect(),
            })
        }

        fn mount(&self, _: &str, _: &str) -> std::result::Result<(), BackendError> {
            Ok(())
        }
        fn unmount(&self, _: &str, _: &str) -> std::result::Result<(), BackendError> {
            Ok(())
        }
        fn move_to_drive(&self, _: &str, _: &str) -> std::result::Result<(), BackendError> {
            Ok(())
        }
        fn format(&self, _: &str, _: &str) -> std::result::Result<(), BackendError> {
            Ok(())
        }
        fn check(&self, _: &str, _: &str) -> std::result::Result<(), BackendError> {
            Ok(())
        }
        fn write_file(&self, tape: &str, _: &str, _: &[u8]) -> std::result::Result<(), BackendError> {
            Err(BackendError::UnknownTape(tape.to_string()))
        }
        fn read_file(&self, tape: &str, _: &str) -> std::result::Result<Vec<u8>, BackendError> {
            Err(BackendError::UnknownTape(tape.to_string()))
        }
        fn remaining_mib(&self, _: &str) -> std::result::Result<u64, BackendError> {
            Ok(0)
        }
    }

    fn fixture(tapes: &[(&str, u64)]) -> (Inventory, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let library = Arc::new(FixedLibrary {
            drives: 2,
            tapes: tapes.iter().map(|(id, c)| ((*id).to_string(), *c)).collect(),
        });
        let inventory = Inventory::open(library, tmp.path().join("pools")).unwrap();
        (inventory, tmp)
    }

    #[test]
    fn test_open_builds_registry_from_scan() {
        let (inventory, _tmp) = fixture(&[("T00001", 100), ("T00002", 200)]);
        assert_eq!(inventory.drives().len(), 2);
        assert_eq!(inventory.cartridges().len(), 2);
        let cart = inventory.get_cartridge("T00002").unwrap();
        assert_eq!(cart.state, CartridgeState::Unmounted);
        assert_eq!(cart.total_cap_mib, 200);
    }

    #[test]
    fn test_pool_lifecycle_and_validation() {
        let (inventory, _tmp) = fixture(&[("T00001", 100)]);
        inventory.pool_create("p1").unwrap();
        assert!(matches!(
            inventory.pool_create("p1"),
            Err(InventoryError::PoolExists(_))
        ));
        inventory.pool_add("p1", "T00001").unwrap();
        assert!(matches!(
            inventory.pool_add("p1", "T00001"),
            Err(InventoryError::TapeExistsInPool(_))
        ));
        assert!(matches!(
            inventory.pool_add("p1", "GHOST1"),
            Err(InventoryError::TapeNotExists(_))
        ));
        assert!(matches!(
            inventory.pool_delete("p1"),
            Err(InventoryError::PoolNotEmpty(_))
        ));
        inventory.pool_remove("p1", "T00001").unwrap();
        assert!(matches!(
            inventory.pool_remove("p1", "T00001"),
            Err(InventoryError::TapeNotExistsInPool { .. })
        ));
        inventory.pool_delete("p1").unwrap();
        assert!(!inventory.pool_exists("p1"));
    }

    #[test]
    fn test_pool_membership_persists_across_open() {
        let tmp = tempfile::tempdir().unwrap();
        let pools_path = tmp.path().join("pools");
        let library = Arc::new(FixedLibrary {
            drives: 1,
            tapes: vec![("T00001".to_string(), 100)],
        });
        {
            let library_handle: Arc<dyn TapeLibrary> = library.clone();
            let inventory = Inventory::open(library_handle, pools_path.clone()).unwrap();
            inventory.pool_create("p1").unwrap();
            inventory.pool_add("p1", "T00001").unwrap();
            inventory.write_pools().unwrap();
        }
        let inventory = Inventory::open(library, pools_path).unwrap();
        assert_eq!(inventory.pool_tapes("p1").unwrap(), vec!["T00001"]);
        assert_eq!(inventory.get_cartridge("T00001").unwrap().pool, "p1");
    }

    #[test]
    fn test_inventorize_prunes_vanished_pool_members() {
        let tmp = tempfile::tempdir().unwrap();
        let pools_path = tmp.path().join("pools");
        // Persist a membership entry for a cartridge the library no
        // longer reports.
        std::fs::write(&pools_path, "p1\tT00001\np1\tGONE01\n").unwrap();
        let library = Arc::new(FixedLibrary {
            drives: 1,
            tapes: vec![("T00001".to_string(), 100)],
        });
        let inventory = Inventory::open(library, pools_path).unwrap();
        assert_eq!(inventory.pool_tapes("p1").unwrap(), vec!["T00001"]);

        // A rescan with the same picture keeps membership intact.
        inventory.inventorize().unwrap();
        assert_eq!(inventory.pool_tapes("p1").unwrap(), vec!["T00001"]);
    }

    #[test]
    fn test_make_use_and_release_round_trip() {
        let (inventory, _tmp) = fixture(&[("T00001", 100)]);
        inventory.make_use("dr0", "T00001").unwrap();
        assert!(inventory.get_drive("dr0").unwrap().busy);
        assert_eq!(
            inventory.get_cartridge("T00001").unwrap().state,
            CartridgeState::InUse
        );

        inventory.release_drive("dr0", "T00001", CartridgeState::Mounted);
        let drive = inventory.get_drive("dr0").unwrap();
        assert!(!drive.busy);
        assert_eq!(drive.to_unblock, None);
        assert_eq!(
            inventory.get_cartridge("T00001").unwrap().state,
            CartridgeState::Mounted
        );
    }

    #[test]
    fn test_move_req_bookkeeping() {
        let (inventory, _tmp) = fixture(&[("T00001", 100)]);
        assert!(!inventory.request_exists(7, "p1"));
        inventory.set_move_req("dr0", 7, "p1").unwrap();
        assert!(inventory.request_exists(7, "p1"));
        assert!(!inventory.request_exists(7, "p2"));
        inventory.clear_move_req("dr0");
        assert!(!inventory.request_exists(7, "p1"));
    }

    #[test]
    fn test_request_suspend_orders_by_priority() {
        let (inventory, _tmp) = fixture(&[("T00001", 100)]);
        // A recall may suspend an idle drive's holder.
        assert!(inventory.request_suspend(Operation::SelRecall, "T00001"));
        let requested: Vec<_> = inventory
            .drives()
            .into_iter()
            .filter(|d| d.to_unblock == Some(Operation::SelRecall))
            .collect();
        assert_eq!(requested.len(), 1);
        assert!(inventory.get_cartridge("T00001").unwrap().requested);

        // A second, lower-priority migration cannot displace the recall
        // on that drive but can claim the other one.
        assert!(inventory.request_suspend(Operation::Migration, "T00001"));
        // With both drives claimed at recall/migration priority, another
        // migration finds nothing to suspend.
        assert!(!inventory.request_suspend(Operation::Migration, "T00001"));
    }

    #[test]
    fn test_make_use_clears_requested() {
        let (inventory, _tmp) = fixture(&[("T00001", 100)]);
        assert!(inventory.request_suspend(Operation::SelRecall, "T00001"));
        inventory.make_use("dr0", "T00001").unwrap();
        assert!(!inventory.get_cartridge("T00001").unwrap().requested);
    }
}
