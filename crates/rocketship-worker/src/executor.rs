// In-process workflow executor - the runner exercised without a Temporal
// server (spec.md S4.4 "no external server needed for local runs").
//
// Turns WorkflowAction into tokio tasks: ScheduleActivity dispatches into
// activities.rs, StartTimer is `tokio::time::sleep`, StartChildWorkflow
// recursively drives another workflow instance. Results feed back through
// on_activity_completed/on_activity_failed, exactly like the Temporal-backed
// runner would after a real activity/workflow task completes.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::AbortHandle;

use crate::activities::{self, activity_types, ActivityContext};
use crate::traits::WorkflowAction;
use crate::workflow_registry::WorkflowRegistry;

type UnitResult = (String, Result<Value, String>);

/// What `Cancel{activity_id}` needs to reach: either abort the task outright
/// (plain activities/timers have no cooperative cancellation hook) or notify
/// a child workflow so it runs its own `on_cancel`/grace-timer path instead
/// of being killed mid-flight.
enum Outstanding {
    Task(AbortHandle),
    Child(Arc<Notify>),
}

#[derive(Clone)]
pub struct Executor {
    registry: Arc<WorkflowRegistry>,
    activities: Arc<ActivityContext>,
}

impl Executor {
    pub fn new(registry: Arc<WorkflowRegistry>, activities: Arc<ActivityContext>) -> Self {
        Self { registry, activities }
    }

    pub fn run_workflow(
        self,
        workflow_type: String,
        input: Value,
    ) -> BoxFuture<'static, Result<Value, String>> {
        self.run_workflow_with_cancel(workflow_type, input, None)
    }

    /// Like `run_workflow`, but `cancel` lets a caller (the runner) deliver a
    /// cancellation signal that the root workflow observes through its own
    /// `on_cancel`, rather than having the executor kill the task outright.
    pub fn run_workflow_cancellable(
        self,
        workflow_type: String,
        input: Value,
        cancel: Arc<Notify>,
    ) -> BoxFuture<'static, Result<Value, String>> {
        self.run_workflow_with_cancel(workflow_type, input, Some(cancel))
    }

    fn run_workflow_with_cancel(
        self,
        workflow_type: String,
        input: Value,
        cancel: Option<Arc<Notify>>,
    ) -> BoxFuture<'static, Result<Value, String>> {
        Box::pin(async move {
            let factory = self
                .registry
                .get(&workflow_type)
                .cloned()
                .ok_or_else(|| format!("fatal: unknown workflow type '{workflow_type}'"))?;
            let mut wf = factory(input);
            let mut outstanding: HashMap<String, Outstanding> = HashMap::new();
            let mut pending: FuturesUnordered<tokio::task::JoinHandle<UnitResult>> =
                FuturesUnordered::new();
            let mut cancelled = false;

            let actions = wf.on_start();
            if let Some(result) = self.apply(&mut pending, &mut outstanding, actions) {
                return result;
            }

            loop {
                tokio::select! {
                    _ = cancel_notified(&cancel), if !cancelled && cancel.is_some() => {
                        cancelled = true;
                        let actions = wf.on_cancel();
                        if let Some(result) = self.apply(&mut pending, &mut outstanding, actions) {
                            return result;
                        }
                    }
                    next = pending.next() => {
                        let Some(joined) = next else { break };
                        let Ok((activity_id, outcome)) = joined else { continue };
                        outstanding.remove(&activity_id);
                        let actions = match outcome {
                            Ok(value) => wf.on_activity_completed(&activity_id, value),
                            Err(error) => wf.on_activity_failed(&activity_id, &error),
                        };
                        if let Some(result) = self.apply(&mut pending, &mut outstanding, actions) {
                            return result;
                        }
                    }
                }
            }

            Err("fatal: workflow exhausted all scheduled work without completing".to_string())
        })
    }

    fn apply(
        &self,
        pending: &mut FuturesUnordered<tokio::task::JoinHandle<UnitResult>>,
        outstanding: &mut HashMap<String, Outstanding>,
        actions: Vec<WorkflowAction>,
    ) -> Option<Result<Value, String>> {
        for action in actions {
            match action {
                WorkflowAction::CompleteWorkflow { result } => return Some(Ok(result)),
                WorkflowAction::FailWorkflow { error } => return Some(Err(error)),
                WorkflowAction::Cancel { activity_id } => match outstanding.get(&activity_id) {
                    Some(Outstanding::Task(handle)) => handle.abort(),
                    Some(Outstanding::Child(notify)) => notify.notify_one(),
                    None => {}
                },
                WorkflowAction::ScheduleActivity {
                    activity_id,
                    activity_type,
                    input,
                } => {
                    let ctx = self.activities.clone();
                    let id_for_task = activity_id.clone();
                    let handle = tokio::spawn(async move {
                        let result = dispatch_activity_type(&ctx, &activity_type, input).await;
                        (id_for_task, result)
                    });
                    outstanding.insert(activity_id, Outstanding::Task(handle.abort_handle()));
                    pending.push(handle);
                }
                WorkflowAction::StartChildWorkflow {
                    activity_id,
                    workflow_type,
                    input,
                } => {
                    let notify = Arc::new(Notify::new());
                    outstanding.insert(activity_id.clone(), Outstanding::Child(notify.clone()));
                    let executor = self.clone();
                    let handle = tokio::spawn(async move {
                        let result = executor
                            .run_workflow_with_cancel(workflow_type, input, Some(notify))
                            .await;
                        (activity_id, result)
                    });
                    pending.push(handle);
                }
                WorkflowAction::StartTimer {
                    activity_id,
                    duration,
                } => {
                    let id_for_task = activity_id.clone();
                    let handle = tokio::spawn(async move {
                        tokio::time::sleep(duration).await;
                        (id_for_task, Ok(Value::Null))
                    });
                    outstanding.insert(activity_id, Outstanding::Task(handle.abort_handle()));
                    pending.push(handle);
                }
                WorkflowAction::None => {}
            }
        }
        None
    }
}

async fn cancel_notified(cancel: &Option<Arc<Notify>>) {
    if let Some(notify) = cancel {
        notify.notified().await;
    }
}

async fn dispatch_activity_type(
    ctx: &ActivityContext,
    activity_type: &str,
    input: Value,
) -> Result<Value, String> {
    match activity_type {
        activity_types::TEMPLATE_RESOLVER => activities::resolve_template_activity(input).await,
        activity_types::PLUGIN_DISPATCH => activities::plugin_dispatch_activity(ctx, input).await,
        activity_types::STEP_REPORTER => activities::step_reporter_activity(ctx, input).await,
        activity_types::SUITE_CLEANUP => activities::suite_cleanup_activity(ctx, input).await,
        other => Err(format!("fatal: unknown activity type '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activities::LogSink;
    use async_trait::async_trait;
    use rocketship_schemas::{LogLine, RunContext, Suite, Test};
    use std::path::PathBuf;

    struct NullSink;

    #[async_trait]
    impl LogSink for NullSink {
        async fn add_log(&self, _line: LogLine) -> anyhow::Result<()> {
            Ok(())
        }
        async fn record_assertions(
            &self,
            _run_id: uuid::Uuid,
            _test_name: &str,
            _step_name: &str,
            _assertions: &[rocketship_core::plugin::AssertionResult],
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn test_executor() -> Executor {
        let ctx = Arc::new(ActivityContext {
            registry: Arc::new(rocketship_plugins::builtin_registry(PathBuf::from("/tmp"))),
            log_sink: Arc::new(NullSink),
            run_dir: PathBuf::from("/tmp"),
        });
        Executor::new(Arc::new(crate::workflow_registry::builtin_registry()), ctx)
    }

    #[tokio::test]
    async fn empty_suite_runs_to_passed() {
        let executor = test_executor();
        let input = serde_json::to_value(crate::suite_workflow::SuiteWorkflowInput {
            run_id: uuid::Uuid::now_v7(),
            plan: Suite {
                name: "s".to_string(),
                description: None,
                vars: Default::default(),
                openapi: None,
                tests: vec![Test {
                    name: "t".to_string(),
                    steps: vec![],
                }],
            },
            ctx: RunContext::default(),
            env_snapshot: Default::default(),
        })
        .unwrap();

        let result = executor
            .run_workflow("SuiteWorkflow".to_string(), input)
            .await
            .unwrap();
        assert_eq!(result["status"], "PASSED");
    }

    #[tokio::test]
    async fn unknown_workflow_type_is_a_fatal_error() {
        let executor = test_executor();
        let err = executor
            .run_workflow("NoSuchWorkflow".to_string(), Value::Null)
            .await
            .unwrap_err();
        assert!(err.starts_with("fatal:"));
    }
}
