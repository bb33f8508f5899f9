//! Re-export public algorithms.

pub mod collect;
pub mod collective;
pub mod communicator;
pub mod marshal;
pub mod schedule;
pub mod transfer;
pub mod wire;

pub use collect::{M2nCollect, MpiDuplicate};
pub use schedule::RedistributionScheduler;
