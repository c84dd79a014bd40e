// SuiteWorkflow - the per-run durable state machine (spec.md S4.4).
//
// State machine: PENDING -> RUNNING -> (PASSED | FAILED | CANCELLED | TIMEOUT).
// On entry, schedules one TestWorkflow child per test, in parallel, each
// seeded with its own runtime map from `vars`/`env`. Always schedules
// SuiteCleanupActivity after every child finishes, regardless of outcome;
// cleanup failures are logged but never flip PASSED to FAILED.

use std::collections::{HashMap, HashSet};

use rocketship_schemas::{RunContext, RunId, RunStatus, Suite};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::test_workflow::TestWorkflowInput;
use crate::traits::{Workflow, WorkflowAction, WorkflowInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    AwaitingCleanup,
    Done,
}

#[derive(Debug)]
pub struct SuiteWorkflow {
    run_id: RunId,
    plan: Suite,
    ctx: RunContext,
    env_snapshot: HashMap<String, String>,
    phase: Phase,
    pending_children: HashSet<String>,
    test_statuses: HashMap<String, RunStatus>,
    cancel_requested: bool,
    final_status: Option<RunStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteWorkflowInput {
    pub run_id: RunId,
    pub plan: Suite,
    pub ctx: RunContext,
    pub env_snapshot: HashMap<String, String>,
}

impl SuiteWorkflow {
    pub fn new(input: SuiteWorkflowInput) -> Self {
        Self {
            run_id: input.run_id,
            plan: input.plan,
            ctx: input.ctx,
            env_snapshot: input.env_snapshot,
            phase: Phase::Running,
            pending_children: HashSet::new(),
            test_statuses: HashMap::new(),
            cancel_requested: false,
            final_status: None,
        }
    }

    fn aggregate_status(&self) -> RunStatus {
        if self.cancel_requested {
            // Cancel supersedes a pending FAILED only if nothing already
            // recorded a failure before the signal (spec.md S7 invariant).
            let already_failed = self
                .test_statuses
                .values()
                .any(|s| matches!(s, RunStatus::Failed));
            if !already_failed {
                return RunStatus::Cancelled;
            }
        }

        if self
            .test_statuses
            .values()
            .any(|s| matches!(s, RunStatus::Failed))
        {
            RunStatus::Failed
        } else if self
            .test_statuses
            .values()
            .all(|s| matches!(s, RunStatus::Passed))
        {
            RunStatus::Passed
        } else {
            RunStatus::Failed
        }
    }

    fn schedule_cleanup_if_done(&mut self) -> Vec<WorkflowAction> {
        if !self.pending_children.is_empty() {
            return vec![];
        }
        self.final_status = Some(self.aggregate_status());
        self.phase = Phase::AwaitingCleanup;
        vec![WorkflowAction::ScheduleActivity {
            activity_id: "suite_cleanup".to_string(),
            activity_type: "SuiteCleanupActivity".to_string(),
            input: serde_json::json!({ "run_id": self.run_id }),
        }]
    }
}

impl Workflow for SuiteWorkflow {
    fn workflow_type(&self) -> &'static str {
        "SuiteWorkflow"
    }

    fn on_start(&mut self) -> Vec<WorkflowAction> {
        self.phase = Phase::Running;

        self.plan
            .tests
            .iter()
            .map(|test| {
                self.pending_children.insert(test.name.clone());
                let input = TestWorkflowInput {
                    run_id: self.run_id,
                    test: test.clone(),
                    vars: self.plan.vars.clone(),
                    env: self.env_snapshot.clone(),
                };
                WorkflowAction::StartChildWorkflow {
                    activity_id: test.name.clone(),
                    workflow_type: "TestWorkflow".to_string(),
                    input: serde_json::to_value(&input)
                        .expect("TestWorkflowInput always serializes"),
                }
            })
            .collect()
    }

    fn on_activity_completed(&mut self, activity_id: &str, result: Value) -> Vec<WorkflowAction> {
        match self.phase {
            Phase::Running => {
                if self.pending_children.remove(activity_id) {
                    let status = result
                        .get("status")
                        .and_then(|v| v.as_str())
                        .and_then(|s| s.parse::<RunStatus>().ok())
                        .unwrap_or(RunStatus::Failed);
                    self.test_statuses.insert(activity_id.to_string(), status);
                }
                self.schedule_cleanup_if_done()
            }
            Phase::AwaitingCleanup if activity_id == "suite_cleanup" => {
                self.phase = Phase::Done;
                vec![WorkflowAction::CompleteWorkflow {
                    result: serde_json::json!({
                        "status": self.final_status.unwrap_or(RunStatus::Failed).to_string(),
                        "context": self.ctx,
                    }),
                }]
            }
            _ => vec![],
        }
    }

    fn on_activity_failed(&mut self, activity_id: &str, error: &str) -> Vec<WorkflowAction> {
        match self.phase {
            Phase::Running => {
                if self.pending_children.remove(activity_id) {
                    tracing::warn!(run_id = %self.run_id, test = activity_id, error, "test workflow failed at the runtime level");
                    self.test_statuses
                        .insert(activity_id.to_string(), RunStatus::Failed);
                }
                self.schedule_cleanup_if_done()
            }
            Phase::AwaitingCleanup if activity_id == "suite_cleanup" => {
                // Cleanup errors are logged but never change a PASSED result.
                tracing::warn!(run_id = %self.run_id, error, "suite cleanup activity failed");
                self.phase = Phase::Done;
                vec![WorkflowAction::CompleteWorkflow {
                    result: serde_json::json!({
                        "status": self.final_status.unwrap_or(RunStatus::Failed).to_string(),
                        "context": self.ctx,
                    }),
                }]
            }
            _ => vec![],
        }
    }

    fn on_cancel(&mut self) -> Vec<WorkflowAction> {
        self.cancel_requested = true;
        self.pending_children
            .iter()
            .map(|activity_id| WorkflowAction::Cancel {
                activity_id: activity_id.clone(),
            })
            .collect()
    }

    fn is_completed(&self) -> bool {
        self.phase == Phase::Done
    }
}

impl WorkflowInput for SuiteWorkflow {
    const WORKFLOW_TYPE: &'static str = "SuiteWorkflow";
    type Input = SuiteWorkflowInput;

    fn from_input(input: Self::Input) -> Self {
        Self::new(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocketship_schemas::Test;

    fn plan_with_tests(names: &[&str]) -> Suite {
        Suite {
            name: "s".to_string(),
            description: None,
            vars: HashMap::new(),
            openapi: None,
            tests: names
                .iter()
                .map(|n| Test {
                    name: n.to_string(),
                    steps: vec![],
                })
                .collect(),
        }
    }

    #[test]
    fn on_start_schedules_one_child_per_test() {
        let mut wf = SuiteWorkflow::new(SuiteWorkflowInput {
            run_id: uuid::Uuid::now_v7(),
            plan: plan_with_tests(&["a", "b"]),
            ctx: RunContext::default(),
            env_snapshot: HashMap::new(),
        });
        let actions = wf.on_start();
        assert_eq!(actions.len(), 2);
        assert!(actions
            .iter()
            .all(|a| matches!(a, WorkflowAction::StartChildWorkflow { .. })));
    }

    #[test]
    fn suite_passes_only_when_every_test_passes() {
        let mut wf = SuiteWorkflow::new(SuiteWorkflowInput {
            run_id: uuid::Uuid::now_v7(),
            plan: plan_with_tests(&["a", "b"]),
            ctx: RunContext::default(),
            env_snapshot: HashMap::new(),
        });
        wf.on_start();
        wf.on_activity_completed("a", serde_json::json!({"status": "PASSED"}));
        let actions = wf.on_activity_completed("b", serde_json::json!({"status": "PASSED"}));
        assert!(actions
            .iter()
            .any(|a| matches!(a, WorkflowAction::ScheduleActivity { activity_type, .. } if activity_type == "SuiteCleanupActivity")));
        assert!(!wf.is_completed());

        let actions = wf.on_activity_completed("suite_cleanup", Value::Null);
        assert!(wf.is_completed());
        assert!(matches!(
            &actions[0],
            WorkflowAction::CompleteWorkflow { result } if result["status"] == "PASSED"
        ));
    }

    #[test]
    fn one_failed_test_fails_the_suite() {
        let mut wf = SuiteWorkflow::new(SuiteWorkflowInput {
            run_id: uuid::Uuid::now_v7(),
            plan: plan_with_tests(&["a", "b"]),
            ctx: RunContext::default(),
            env_snapshot: HashMap::new(),
        });
        wf.on_start();
        wf.on_activity_completed("a", serde_json::json!({"status": "FAILED"}));
        wf.on_activity_completed("b", serde_json::json!({"status": "PASSED"}));
        let actions = wf.on_activity_completed("suite_cleanup", Value::Null);
        assert!(matches!(
            &actions[0],
            WorkflowAction::CompleteWorkflow { result } if result["status"] == "FAILED"
        ));
    }

    #[test]
    fn cleanup_failure_does_not_downgrade_a_passed_suite() {
        let mut wf = SuiteWorkflow::new(SuiteWorkflowInput {
            run_id: uuid::Uuid::now_v7(),
            plan: plan_with_tests(&["a"]),
            ctx: RunContext::default(),
            env_snapshot: HashMap::new(),
        });
        wf.on_start();
        wf.on_activity_completed("a", serde_json::json!({"status": "PASSED"}));
        let actions = wf.on_activity_failed("suite_cleanup", "disk full");
        assert!(wf.is_completed());
        assert!(matches!(
            &actions[0],
            WorkflowAction::CompleteWorkflow { result } if result["status"] == "PASSED"
        ));
    }

    #[test]
    fn cancel_before_any_failure_yields_cancelled() {
        let mut wf = SuiteWorkflow::new(SuiteWorkflowInput {
            run_id: uuid::Uuid::now_v7(),
            plan: plan_with_tests(&["a"]),
            ctx: RunContext::default(),
            env_snapshot: HashMap::new(),
        });
        wf.on_start();
        wf.on_cancel();
        wf.on_activity_completed("a", serde_json::json!({"status": "CANCELLED"}));
        let actions = wf.on_activity_completed("suite_cleanup", Value::Null);
        assert!(matches!(
            &actions[0],
            WorkflowAction::CompleteWorkflow { result } if result["status"] == "CANCELLED"
        ));
    }
}
