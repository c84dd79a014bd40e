// Shared type contracts for Rocketship
//
// This crate holds the suite plan (immutable after parsing), the runtime
// state persisted per run/test, and the log line shape streamed by the
// engine. It depends on nothing beyond serde/uuid/chrono so every other
// crate in the workspace can depend on it without dragging in the rest of
// the system.

pub mod log;
pub mod plan;
pub mod run;

pub use log::{LogColor, LogLine};
pub use plan::{Assertion, AssertionKind, SaveRule, SaveSource, Step, Suite, Test};
pub use run::{RunContext, RunId, RunStatus, TestState};
