//! Energy storage primitives and the device-facing handler interface.

pub mod cell;
pub mod handler;
pub mod hybrid;

pub use cell::{EnergyCell, PrimaryCell, SecondaryCell};
pub use handler::{BasicStorage, EnergyHandler, SharedHybridStorage};
pub use hybrid::{HybridStorage, PriorityPolicy};
