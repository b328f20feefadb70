//! Inventory ledger domain module.
//!
//! Lots, expiry status and the FIFO-by-expiry allocation policy used by
//! checkout. Pure, deterministic logic: callers load a lot snapshot (locked,
//! when it will be mutated), ask this crate for a plan, and apply it.

pub mod allocation;
pub mod lot;
pub mod status;

pub use allocation::{
    DepletionPlan, DepletionStep, allocatable, available_quantity, plan_depletion,
};
pub use lot::{InventoryLot, NewLot};
pub use status::{LotStatus, NEAR_EXPIRY_DAYS, derive_status};
