// Scheduling, concurrency gating and work dispatch

pub mod dispatch;
pub mod gate;
pub mod scheduler;

pub use dispatch::{JobDispatcher, ProgressReporter, retry_marker};
pub use gate::ConcurrencyGate;
pub use scheduler::{CycleScheduler, CycleStats, Trigger};
