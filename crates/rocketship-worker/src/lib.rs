pub mod activities;
pub mod executor;
pub mod runner;
pub mod suite_workflow;
pub mod test_workflow;
pub mod traits;
#[cfg(feature = "temporal")]
pub mod temporal;
pub mod workflow_registry;

pub use activities::{ActivityContext, LogSink};
pub use executor::Executor;
pub use runner::{create_runner, InProcessRunner, RunnerConfig, RunnerMode, SuiteRunner};
pub use suite_workflow::{SuiteWorkflow, SuiteWorkflowInput};
pub use test_workflow::{TestWorkflow, TestWorkflowInput};
pub use traits::{Workflow, WorkflowAction, WorkflowFactory, WorkflowInput};
#[cfg(feature = "temporal")]
pub use temporal::{TemporalRunner, TemporalWorker};
pub use workflow_registry::{builtin_registry, WorkflowRegistry};
