//! Dispatch queue and worker pool
//!
//! Jobs are admitted through [`DispatchQueue::admit`], which claims the file,
//! reserves a queue slot and writes the `Queued` transition before handing the
//! job to the pool. A bounded set of workers then drives each job through the
//! per-file state machine. The stale job reaper re-queues work that was lost.

pub mod claims;
pub mod context;
pub mod queue;
pub mod reaper;
pub mod state_machine;

pub use claims::{ClaimGuard, ClaimTable};
pub use context::{JobFailure, JobHandler, JobOutput};
pub use queue::{
    Admission, DispatchQueue, EnqueueError, JobReport, JobReportSender, QueueConfig,
};
pub use reaper::{ReapSummary, ReaperConfig, StaleJobReaper};
pub use state_machine::FileStateMachine;
