//! Process Combinator Supervisor
//!
//! Drives companions from their parents' lifecycle:
//! - Periodic supervision ticks with grace-period hysteresis
//! - Start actions with launch delays and duplicate checks
//! - Teardown through an escalating termination ladder
//! - Kill-by-name fallback for processes that refuse to die

pub mod actions;
pub mod ladder;
pub mod supervisor;

pub use actions::{
    ActionContext, ActionReport, StartAction, StartReport, TeardownAction, TeardownReport,
};
pub use ladder::{LadderStep, StepAction, TerminationError, TerminationLadder, DEFAULT_STEPS};
pub use supervisor::{ActionKind, Dispatched, Supervisor, SHUTDOWN_GRACE};
