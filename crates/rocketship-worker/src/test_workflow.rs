// TestWorkflow - the per-test durable child workflow (spec.md S4.4).
//
// Sequential steps in declaration order. Each step goes through up to three
// scheduled units: resolve template -> run activity (or durable timer for
// `delay`) -> report (forward logs, record assertion outcomes). Retry policy
// for a step's activity: initial 1s, exponential x2, max 30s, max 3 attempts,
// except assertion-typed failures, which are never retried (spec.md S4.4/S7).
//
// The retryable/fatal distinction travels as a tagged prefix on the error
// string ("retryable: ..." / "fatal: ...") rather than a typed error, mirroring
// spec.md S7's "propagated as tagged values, not type names".

use std::collections::HashMap;
use std::time::Duration;

use rocketship_schemas::{RunId, RunStatus, Step, Test};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::traits::{Workflow, WorkflowAction, WorkflowInput};

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const CANCEL_GRACE: Duration = Duration::from_secs(30);

fn resolve_id(idx: usize) -> String {
    format!("step-{idx}-resolve")
}
fn activity_id(idx: usize) -> String {
    format!("step-{idx}-activity")
}
fn delay_id(idx: usize) -> String {
    format!("step-{idx}-delay")
}
fn report_id(idx: usize) -> String {
    format!("step-{idx}-report")
}
fn retry_timer_id(idx: usize, attempt: u32) -> String {
    format!("step-{idx}-retry-{attempt}")
}
const CANCEL_GRACE_ID: &str = "cancel-grace";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepPhase {
    Resolving,
    Delaying,
    RunningActivity,
    AwaitingRetryTimer,
    Reporting,
}

#[derive(Debug)]
pub struct TestWorkflow {
    run_id: RunId,
    test: Test,
    vars: HashMap<String, Value>,
    env: HashMap<String, String>,
    runtime: HashMap<String, String>,
    step_idx: usize,
    phase: StepPhase,
    attempt: u32,
    resolved_config: HashMap<String, Value>,
    outstanding: Option<String>,
    awaiting_cancel_grace: bool,
    cancel_requested: bool,
    status: Option<RunStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestWorkflowInput {
    pub run_id: RunId,
    pub test: Test,
    pub vars: HashMap<String, Value>,
    pub env: HashMap<String, String>,
}

impl TestWorkflow {
    pub fn new(input: TestWorkflowInput) -> Self {
        Self {
            run_id: input.run_id,
            test: input.test,
            vars: input.vars,
            env: input.env,
            runtime: HashMap::new(),
            step_idx: 0,
            phase: StepPhase::Resolving,
            attempt: 0,
            resolved_config: HashMap::new(),
            outstanding: None,
            awaiting_cancel_grace: false,
            cancel_requested: false,
            status: None,
        }
    }

    fn current_step(&self) -> &Step {
        &self.test.steps[self.step_idx]
    }

    fn start_step(&mut self, idx: usize) -> Vec<WorkflowAction> {
        self.step_idx = idx;
        self.phase = StepPhase::Resolving;
        self.attempt = 0;
        let step = self.current_step().clone();
        let id = resolve_id(idx);
        self.outstanding = Some(id.clone());
        vec![WorkflowAction::ScheduleActivity {
            activity_id: id,
            activity_type: "TemplateResolverActivity".to_string(),
            input: serde_json::json!({
                "config": step.config,
                "runtime": self.runtime,
                "vars": self.vars,
                "env": self.env,
            }),
        }]
    }

    fn finish(&mut self, status: RunStatus) -> Vec<WorkflowAction> {
        self.status = Some(status);
        self.outstanding = None;
        vec![WorkflowAction::CompleteWorkflow {
            result: serde_json::json!({
                "run_id": self.run_id,
                "test_name": self.test.name,
                "status": status.to_string(),
                "saved": self.runtime,
            }),
        }]
    }

    fn advance_or_finish(&mut self) -> Vec<WorkflowAction> {
        if self.cancel_requested {
            return self.finish(RunStatus::Cancelled);
        }
        let next = self.step_idx + 1;
        if next >= self.test.steps.len() {
            self.finish(RunStatus::Passed)
        } else {
            self.start_step(next)
        }
    }

    fn backoff_for(attempt: u32) -> Duration {
        let scaled = INITIAL_BACKOFF.saturating_mul(1u32.wrapping_shl(attempt.saturating_sub(1)));
        scaled.min(MAX_BACKOFF)
    }

    fn dispatch_activity(&mut self, idx: usize) -> Vec<WorkflowAction> {
        self.phase = StepPhase::RunningActivity;
        let step = self.current_step().clone();
        let id = activity_id(idx);
        self.outstanding = Some(id.clone());
        vec![WorkflowAction::ScheduleActivity {
            activity_id: id,
            activity_type: "PluginDispatchActivity".to_string(),
            input: serde_json::json!({
                "name": step.name,
                "plugin": step.plugin,
                "config": self.resolved_config,
                "state": self.runtime,
                "vars": self.vars,
                "env": self.env,
                "saves": step.save,
                "assertions": step.assertions,
            }),
        }]
    }

    fn schedule_report(&mut self, idx: usize, output: &Value) -> Vec<WorkflowAction> {
        self.phase = StepPhase::Reporting;
        let step = self.current_step();
        let id = report_id(idx);
        self.outstanding = Some(id.clone());
        vec![WorkflowAction::ScheduleActivity {
            activity_id: id,
            activity_type: "StepReporterActivity".to_string(),
            input: serde_json::json!({
                "run_id": self.run_id,
                "test_name": self.test.name,
                "step_name": step.name,
                "logs": output.get("logs").cloned().unwrap_or(Value::Null),
                "assertions": output.get("assertions").cloned().unwrap_or(Value::Null),
            }),
        }]
    }
}

impl Workflow for TestWorkflow {
    fn workflow_type(&self) -> &'static str {
        "TestWorkflow"
    }

    fn on_start(&mut self) -> Vec<WorkflowAction> {
        if self.test.steps.is_empty() {
            return self.finish(RunStatus::Passed);
        }
        self.start_step(0)
    }

    fn on_activity_completed(&mut self, activity_id: &str, result: Value) -> Vec<WorkflowAction> {
        if self.awaiting_cancel_grace && activity_id == CANCEL_GRACE_ID {
            return self.finish(RunStatus::Cancelled);
        }
        if self.outstanding.as_deref() != Some(activity_id) {
            return vec![];
        }

        let idx = self.step_idx;
        match self.phase {
            StepPhase::Resolving => {
                self.resolved_config = result
                    .as_object()
                    .map(|m| m.clone().into_iter().collect())
                    .unwrap_or_default();

                if self.current_step().plugin == "delay" {
                    let duration = self
                        .resolved_config
                        .get("duration")
                        .and_then(|v| v.as_str())
                        .and_then(|s| rocketship_plugins::delay::parse_duration(s).ok())
                        .unwrap_or(Duration::from_secs(0));
                    self.phase = StepPhase::Delaying;
                    let id = delay_id(idx);
                    self.outstanding = Some(id.clone());
                    vec![WorkflowAction::StartTimer {
                        activity_id: id,
                        duration,
                    }]
                } else {
                    self.dispatch_activity(idx)
                }
            }
            StepPhase::Delaying => self.advance_or_finish(),
            StepPhase::RunningActivity => {
                if let Some(saved) = result.get("saved").and_then(|v| v.as_object()) {
                    for (k, v) in saved {
                        if let Some(s) = v.as_str() {
                            self.runtime.insert(k.clone(), s.to_string());
                        }
                    }
                }
                self.schedule_report(idx, &result)
            }
            StepPhase::Reporting => self.advance_or_finish(),
            StepPhase::AwaitingRetryTimer => self.dispatch_activity(idx),
        }
    }

    fn on_activity_failed(&mut self, activity_id: &str, error: &str) -> Vec<WorkflowAction> {
        if self.awaiting_cancel_grace && activity_id == CANCEL_GRACE_ID {
            return self.finish(RunStatus::Cancelled);
        }
        if self.outstanding.as_deref() != Some(activity_id) {
            return vec![];
        }

        match self.phase {
            StepPhase::Reporting => {
                tracing::warn!(run_id = %self.run_id, test = %self.test.name, error, "step report failed");
                self.advance_or_finish()
            }
            StepPhase::Resolving | StepPhase::RunningActivity => {
                if self.cancel_requested {
                    return self.finish(RunStatus::Cancelled);
                }
                let retryable = error.starts_with("retryable:");
                if retryable && self.attempt + 1 < MAX_ATTEMPTS {
                    self.attempt += 1;
                    let idx = self.step_idx;
                    let id = retry_timer_id(idx, self.attempt);
                    self.outstanding = Some(id.clone());
                    self.phase = StepPhase::AwaitingRetryTimer;
                    vec![WorkflowAction::StartTimer {
                        activity_id: id,
                        duration: Self::backoff_for(self.attempt),
                    }]
                } else {
                    tracing::warn!(run_id = %self.run_id, test = %self.test.name, error, "step failed");
                    self.finish(RunStatus::Failed)
                }
            }
            StepPhase::Delaying | StepPhase::AwaitingRetryTimer => self.finish(RunStatus::Failed),
        }
    }

    fn on_cancel(&mut self) -> Vec<WorkflowAction> {
        self.cancel_requested = true;
        let mut actions = vec![];
        if let Some(id) = self.outstanding.clone() {
            actions.push(WorkflowAction::Cancel { activity_id: id });
        }
        self.awaiting_cancel_grace = true;
        actions.push(WorkflowAction::StartTimer {
            activity_id: CANCEL_GRACE_ID.to_string(),
            duration: CANCEL_GRACE,
        });
        actions
    }

    fn is_completed(&self) -> bool {
        self.status.is_some()
    }
}

impl WorkflowInput for TestWorkflow {
    const WORKFLOW_TYPE: &'static str = "TestWorkflow";
    type Input = TestWorkflowInput;

    fn from_input(input: Self::Input) -> Self {
        Self::new(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocketship_schemas::Step;

    fn step(name: &str, plugin: &str) -> Step {
        Step {
            name: name.to_string(),
            plugin: plugin.to_string(),
            config: HashMap::new(),
            save: vec![],
            assertions: vec![],
            timeout: None,
        }
    }

    fn workflow_with(steps: Vec<Step>) -> TestWorkflow {
        TestWorkflow::new(TestWorkflowInput {
            run_id: uuid::Uuid::now_v7(),
            test: Test {
                name: "t".to_string(),
                steps,
            },
            vars: HashMap::new(),
            env: HashMap::new(),
        })
    }

    #[test]
    fn empty_test_passes_immediately() {
        let mut wf = workflow_with(vec![]);
        let actions = wf.on_start();
        assert!(wf.is_completed());
        assert!(matches!(
            &actions[0],
            WorkflowAction::CompleteWorkflow { result } if result["status"] == "PASSED"
        ));
    }

    #[test]
    fn saved_keys_carry_to_next_step() {
        let mut wf = workflow_with(vec![step("a", "http"), step("b", "http")]);
        wf.on_start();
        wf.on_activity_completed("step-0-resolve", serde_json::json!({}));
        wf.on_activity_completed(
            "step-0-activity",
            serde_json::json!({"saved": {"first_car_id": "42"}}),
        );
        wf.on_activity_completed("step-0-report", Value::Null);
        assert_eq!(wf.runtime.get("first_car_id"), Some(&"42".to_string()));
        assert_eq!(wf.step_idx, 1);
    }

    #[test]
    fn assertion_failure_is_not_retried() {
        let mut wf = workflow_with(vec![step("a", "http")]);
        wf.on_start();
        wf.on_activity_completed("step-0-resolve", serde_json::json!({}));
        let actions = wf.on_activity_failed("step-0-activity", "fatal: assertion failed: status_code expected 200 got 500");
        assert!(wf.is_completed());
        assert!(matches!(
            &actions[0],
            WorkflowAction::CompleteWorkflow { result } if result["status"] == "FAILED"
        ));
    }

    #[test]
    fn transient_failure_retries_up_to_max_attempts() {
        let mut wf = workflow_with(vec![step("a", "http")]);
        wf.on_start();
        wf.on_activity_completed("step-0-resolve", serde_json::json!({}));

        let actions = wf.on_activity_failed("step-0-activity", "retryable: connection reset");
        assert!(matches!(&actions[0], WorkflowAction::StartTimer { .. }));
        wf.on_activity_completed("step-0-retry-1", Value::Null);

        let actions = wf.on_activity_failed("step-0-activity", "retryable: connection reset");
        assert!(matches!(&actions[0], WorkflowAction::StartTimer { .. }));
        wf.on_activity_completed("step-0-retry-2", Value::Null);

        // Third attempt exhausts MAX_ATTEMPTS (3): no further retry.
        let actions = wf.on_activity_failed("step-0-activity", "retryable: connection reset");
        assert!(wf.is_completed());
        assert!(matches!(
            &actions[0],
            WorkflowAction::CompleteWorkflow { result } if result["status"] == "FAILED"
        ));
    }

    #[test]
    fn delay_step_schedules_a_timer_not_an_activity() {
        let mut wf = workflow_with(vec![step("a", "delay"), step("b", "log")]);
        wf.on_start();
        let actions = wf.on_activity_completed(
            "step-0-resolve",
            serde_json::json!({"duration": "1s"}),
        );
        assert!(matches!(&actions[0], WorkflowAction::StartTimer { .. }));
    }

    #[test]
    fn cancel_schedules_grace_timer_and_finishes_cancelled_when_it_fires() {
        let mut wf = workflow_with(vec![step("a", "delay"), step("b", "log")]);
        wf.on_start();
        wf.on_activity_completed("step-0-resolve", serde_json::json!({"duration": "60s"}));
        let actions = wf.on_cancel();
        assert!(actions
            .iter()
            .any(|a| matches!(a, WorkflowAction::StartTimer { activity_id, .. } if activity_id == "cancel-grace")));
        let actions = wf.on_activity_completed("cancel-grace", Value::Null);
        assert!(wf.is_completed());
        assert!(matches!(
            &actions[0],
            WorkflowAction::CompleteWorkflow { result } if result["status"] == "CANCELLED"
        ));
    }
}
