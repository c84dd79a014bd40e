// Workflow state machine contract.
//
// Mirrors everruns_worker::traits::Workflow exactly: a workflow is driven by
// a start signal and activity completion/failure callbacks, and it reports
// its own completion. All nondeterminism (time, randomness, I/O) must live in
// the activities this workflow schedules, never in the workflow itself
// (spec.md S4.4 "Determinism", S9 "Durable workflow").

use serde::de::DeserializeOwned;
use serde_json::Value;

/// A command a workflow asks the runner to perform on its behalf.
#[derive(Debug, Clone)]
pub enum WorkflowAction {
    /// Run one activity by name with the given JSON input.
    ScheduleActivity {
        activity_id: String,
        activity_type: String,
        input: Value,
    },
    /// Start a child workflow; its completion/failure is delivered back to
    /// the parent through the same `on_activity_completed`/`on_activity_failed`
    /// callbacks, keyed by `activity_id`.
    StartChildWorkflow {
        activity_id: String,
        workflow_type: String,
        input: Value,
    },
    /// Durable timer; fires a completion callback with a null payload after
    /// `duration` elapses, cancellable like any other scheduled action.
    StartTimer {
        activity_id: String,
        duration: std::time::Duration,
    },
    /// Forward a cancel signal to an outstanding child workflow or activity.
    Cancel { activity_id: String },
    /// Workflow has reached a successful terminal state.
    CompleteWorkflow { result: Value },
    /// Workflow has reached a failed terminal state.
    FailWorkflow { error: String },
    /// No action this turn (e.g. still waiting on outstanding children).
    None,
}

/// Core workflow state machine, driven by the runner (in-process or Temporal).
pub trait Workflow: Send + Sync + std::fmt::Debug {
    /// The registered type name, used for dispatch and logging.
    fn workflow_type(&self) -> &'static str;

    /// Called once when the workflow instance starts. Returns the initial
    /// batch of actions (commonly: schedule the first activities/children).
    fn on_start(&mut self) -> Vec<WorkflowAction>;

    /// Called when a previously scheduled activity/child/timer with this
    /// `activity_id` completes successfully.
    fn on_activity_completed(&mut self, activity_id: &str, result: Value) -> Vec<WorkflowAction>;

    /// Called when a previously scheduled activity/child/timer fails.
    /// `error` is the failure message; retry policy is the runner's concern,
    /// not the workflow's — by the time this callback fires, retries (if any)
    /// are already exhausted.
    fn on_activity_failed(&mut self, activity_id: &str, error: &str) -> Vec<WorkflowAction>;

    /// Called when the runner is asked to cancel this workflow instance.
    fn on_cancel(&mut self) -> Vec<WorkflowAction> {
        vec![WorkflowAction::FailWorkflow {
            error: "cancelled".to_string(),
        }]
    }

    /// Whether this workflow instance has reached a terminal state.
    fn is_completed(&self) -> bool;
}

/// Factory function stored in the workflow registry: turns a JSON input blob
/// into a boxed, type-erased workflow instance.
pub type WorkflowFactory = std::sync::Arc<dyn Fn(Value) -> Box<dyn Workflow> + Send + Sync>;

/// Implemented by concrete workflow types to register a typed constructor
/// under the registry's type-erased `WorkflowFactory` signature.
pub trait WorkflowInput: Workflow + Sized + Send + Sync + 'static {
    const WORKFLOW_TYPE: &'static str;
    type Input: DeserializeOwned;

    fn from_input(input: Self::Input) -> Self;

    fn factory() -> WorkflowFactory {
        std::sync::Arc::new(|value: Value| {
            let input: Self::Input = serde_json::from_value(value)
                .expect("workflow input must deserialize to the registered schema");
            Box::new(Self::from_input(input))
        })
    }
}
