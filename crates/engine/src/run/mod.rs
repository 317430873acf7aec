//! Run progression: the state machine that owns a run's log, and the async
//! driver that executes remaining steps while streaming lifecycle events.

pub mod driver;
pub mod state;

pub use driver::{DriveStatus, NoopExecutor, RunControl, RunEvent, StepExecutor, drive_run};
pub use state::{RunStateError, advance_run, flag_run, reassign_run, resume_run};
