//! Resource inventory
//!
//! Process-wide registry of tape drives and cartridges with their live
//! states plus the pool membership map. One coarse recursive lock guards
//! every mutation; `inventorize` holds it for its entire duration, which
//! intentionally stalls scheduler passes while the hardware picture is
//! being rebuilt. Callers receive copies of the records, never
//! references into the arena.

mod registry;
mod types;

pub use registry::{Inventory, InventoryError, Result};
pub use types::{Cartridge, CartridgeGate, CartridgeState, Drive, PoolSummary};
