//! Fork synchronization: the per-repository state machine and the batch
//! coordinator that fans it out.

pub mod batch;
pub mod cancel;
pub mod engine;

pub use batch::{BatchCoordinator, BatchSummary};
pub use cancel::CancelSignal;
pub use engine::{SyncEngine, SyncPhase};
