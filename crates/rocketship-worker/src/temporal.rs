// Temporal-backed runner (spec.md S9 "Deployment" - `temporal` feature).
//
// Mirrors everruns_worker::worker almost line for line: two poll loops
// (workflow tasks, activity tasks) driving the same Workflow trait this
// crate already uses for the in-process runner, plus a thin client wrapper
// used by `TemporalRunner::start_run`/`cancel_run`. The state machines
// (SuiteWorkflow/TestWorkflow) and activities (activities.rs) are shared with
// the in-process runner unchanged - only the poll/complete plumbing differs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rocketship_core::PluginRegistry;
use rocketship_schemas::{RunContext, RunId, RunStatus, Suite};
use rocketship_storage::RunStore;
use temporal_sdk_core::protos::coresdk::{
    activity_result::{self, ActivityResult},
    activity_task::{activity_task, ActivityTask},
    common::Payload,
    workflow_activation::{wf_activation_job, WfActivation},
    workflow_commands::{
        workflow_command, CancelTimer, CompleteWorkflowExecution, FailWorkflowExecution,
        RequestCancelActivity, ScheduleActivity, StartChildWorkflowExecution, StartTimer,
        WorkflowCommand,
    },
    workflow_completion::{self, WfActivationCompletion},
    ActivityTaskCompletion,
};
use temporal_sdk_core::{init_worker, CoreRuntime, PollActivityError, PollWfError, RuntimeOptions, Worker, WorkerConfig};
use temporalio_client::{Client, ClientOptions, RetryClient, WorkflowClientTrait, WorkflowOptions};
use temporalio_common::protos::temporal::api::common::v1::Payload as ClientPayload;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::activities::{self, activity_types, ActivityContext, LogSink};
use crate::runner::SuiteRunner;
use crate::suite_workflow::SuiteWorkflowInput;
use crate::traits::{Workflow, WorkflowAction};
use crate::workflow_registry::{self, WorkflowRegistry};

const TASK_QUEUE: &str = "rocketship";
const NAMESPACE: &str = "default";

struct TemporalWorkerCore {
    worker: Worker,
    #[allow(dead_code)]
    runtime: Arc<CoreRuntime>,
}

impl TemporalWorkerCore {
    async fn new(address: &str) -> Result<Self> {
        let target_url: url::Url = format!("http://{address}")
            .parse()
            .context("invalid temporal address")?;

        let runtime = Arc::new(
            CoreRuntime::new_assume_tokio(RuntimeOptions::default())
                .context("failed to create temporal core runtime")?,
        );

        let client_opts = ClientOptions::builder()
            .target_url(target_url)
            .client_name("rocketship-worker")
            .client_version(env!("CARGO_PKG_VERSION"))
            .identity(format!("rocketship-worker-{}", uuid::Uuid::now_v7()))
            .build();
        let client = client_opts
            .connect(NAMESPACE, None)
            .await
            .context("failed to connect to temporal server")?;

        let worker_config = WorkerConfig::builder()
            .namespace(NAMESPACE)
            .task_queue(TASK_QUEUE)
            .build()
            .context("invalid temporal worker config")?;
        let worker = init_worker(&runtime, worker_config, client)
            .context("failed to initialize temporal worker")?;

        Ok(Self { worker, runtime })
    }

    fn worker(&self) -> &Worker {
        &self.worker
    }

    async fn shutdown(&self) {
        self.worker.shutdown().await;
    }
}

/// Client-side handle used to start/cancel workflow executions against a
/// running Temporal server. Kept separate from `TemporalWorkerCore` so
/// `TemporalRunner` doesn't need a full worker just to submit a run.
struct TemporalClient {
    client: RetryClient<Client>,
}

impl TemporalClient {
    async fn connect(address: &str) -> Result<Self> {
        let target_url: url::Url = format!("http://{address}")
            .parse()
            .context("invalid temporal address")?;
        let client_opts = ClientOptions::builder()
            .target_url(target_url)
            .client_name("rocketship-engine")
            .client_version(env!("CARGO_PKG_VERSION"))
            .identity(format!("rocketship-engine-{}", uuid::Uuid::now_v7()))
            .build();
        let client = client_opts
            .connect(NAMESPACE, None)
            .await
            .context("failed to connect to temporal server")?;
        Ok(Self { client })
    }

    async fn start_suite_workflow(&self, input: &SuiteWorkflowInput) -> Result<()> {
        let input_bytes = serde_json::to_vec(input).context("serializing workflow input")?;
        self.client
            .start_workflow(
                vec![ClientPayload {
                    metadata: Default::default(),
                    data: input_bytes,
                }],
                TASK_QUEUE.to_string(),
                workflow_id_for_run(input.run_id),
                "SuiteWorkflow".to_string(),
                None,
                WorkflowOptions::default(),
            )
            .await
            .context("failed to start suite workflow")?;
        Ok(())
    }

    async fn cancel_suite_workflow(&self, run_id: RunId) -> Result<()> {
        self.client
            .cancel_workflow_execution(
                workflow_id_for_run(run_id),
                None,
                "cancelled via rocketship CancelRun".to_string(),
                None,
            )
            .await
            .context("failed to cancel suite workflow")?;
        Ok(())
    }
}

fn workflow_id_for_run(run_id: RunId) -> String {
    format!("run-{run_id}")
}

/// `SuiteRunner` implementation backed by a real Temporal server: `start_run`
/// submits a workflow execution and returns immediately; the worker side
/// (`TemporalWorker::run`, usually a separate process) drives it to
/// completion and persists status via the same `RunStore` used in-process.
pub struct TemporalRunner {
    client: Arc<Mutex<Option<TemporalClient>>>,
    address: String,
    store: Arc<dyn RunStore>,
}

impl TemporalRunner {
    pub fn new(
        address: String,
        _plugins: Arc<PluginRegistry>,
        _log_sink: Arc<dyn LogSink>,
        _run_dir: std::path::PathBuf,
        store: Arc<dyn RunStore>,
    ) -> Self {
        Self {
            client: Arc::new(Mutex::new(None)),
            address,
            store,
        }
    }

    async fn client(&self) -> Result<()> {
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            *guard = Some(TemporalClient::connect(&self.address).await?);
        }
        Ok(())
    }
}

#[async_trait]
impl SuiteRunner for TemporalRunner {
    async fn start_run(
        &self,
        run_id: RunId,
        suite: Suite,
        ctx: RunContext,
        env_snapshot: HashMap<String, String>,
    ) -> Result<()> {
        self.store
            .set_run_status(run_id, RunStatus::Running, None)
            .await
            .map_err(anyhow::Error::from)?;
        for test in &suite.tests {
            self.store
                .create_test_run(run_id, &test.name)
                .await
                .map_err(anyhow::Error::from)?;
        }

        self.client().await?;
        let guard = self.client.lock().await;
        let client = guard.as_ref().expect("connected above");
        client
            .start_suite_workflow(&SuiteWorkflowInput {
                run_id,
                plan: suite,
                ctx,
                env_snapshot,
            })
            .await
    }

    async fn cancel_run(&self, run_id: RunId) -> Result<()> {
        self.client().await?;
        let guard = self.client.lock().await;
        guard.as_ref().expect("connected above").cancel_suite_workflow(run_id).await
    }

    async fn is_running(&self, run_id: RunId) -> bool {
        matches!(self.store.get_run(run_id).await, Ok(row) if !row.status.is_empty() && matches!(row.status.parse::<RunStatus>(), Ok(s) if !s.is_terminal()))
    }

    async fn active_count(&self) -> usize {
        // Temporal tracks active executions itself; this runner doesn't keep
        // its own in-memory tally the way InProcessRunner does.
        0
    }
}

/// The worker process side: polls workflow and activity tasks until told to
/// shut down.
pub struct TemporalWorker {
    core: Arc<TemporalWorkerCore>,
    registry: Arc<WorkflowRegistry>,
    activities: Arc<ActivityContext>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TemporalWorker {
    pub async fn new(address: &str, activities: Arc<ActivityContext>) -> Result<Self> {
        let core = TemporalWorkerCore::new(address).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            core: Arc::new(core),
            registry: Arc::new(workflow_registry::builtin_registry()),
            activities,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub async fn run(&self) -> Result<()> {
        info!(task_queue = TASK_QUEUE, "starting temporal worker");

        let workflow_handle = spawn_workflow_poller(
            self.core.clone(),
            self.registry.clone(),
            self.shutdown_rx.clone(),
        );
        let activity_handle = spawn_activity_poller(
            self.core.clone(),
            self.activities.clone(),
            self.shutdown_rx.clone(),
        );

        let mut shutdown_rx = self.shutdown_rx.clone();
        shutdown_rx.changed().await.ok();
        info!("shutdown signal received, stopping pollers");

        workflow_handle.abort();
        activity_handle.abort();
        self.core.shutdown().await;
        Ok(())
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn spawn_workflow_poller(
    core: Arc<TemporalWorkerCore>,
    registry: Arc<WorkflowRegistry>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let workflows: Arc<Mutex<HashMap<String, Box<dyn Workflow>>>> =
        Arc::new(Mutex::new(HashMap::new()));

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("workflow poller shutting down");
                    break;
                }
                result = poll_and_process_workflow_task(&core, &registry, workflows.clone()) => {
                    if let Err(e) = result {
                        if matches!(e.downcast_ref::<PollWfError>(), Some(PollWfError::ShutDown)) {
                            info!("workflow poller received shutdown");
                            break;
                        }
                        error!(error = %e, "workflow task processing error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    })
}

fn spawn_activity_poller(
    core: Arc<TemporalWorkerCore>,
    activities: Arc<ActivityContext>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("activity poller shutting down");
                    break;
                }
                result = poll_and_process_activity_task(&core, &activities) => {
                    if let Err(e) = result {
                        if matches!(e.downcast_ref::<PollActivityError>(), Some(PollActivityError::ShutDown)) {
                            info!("activity poller received shutdown");
                            break;
                        }
                        error!(error = %e, "activity task processing error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    })
}

async fn poll_and_process_workflow_task(
    core: &TemporalWorkerCore,
    registry: &WorkflowRegistry,
    workflows: Arc<Mutex<HashMap<String, Box<dyn Workflow>>>>,
) -> Result<()> {
    let task = core.worker().poll_workflow_task().await?;

    let is_only_eviction = task.jobs.len() == 1
        && task.jobs.first().is_some_and(|j| {
            matches!(j.variant, Some(wf_activation_job::Variant::RemoveFromCache(_)))
        });
    if is_only_eviction {
        workflows.lock().await.remove(&task.run_id);
        return Ok(());
    }

    let commands = process_workflow_activation(&task, registry, workflows).await?;
    let completion = if commands.is_empty() {
        WfActivationCompletion {
            task_token: task.task_token,
            status: Some(workflow_completion::wf_activation_completion::Status::Successful(
                workflow_completion::Success { commands: vec![] },
            )),
        }
    } else {
        let variants: Vec<workflow_command::Variant> =
            commands.into_iter().filter_map(|c| c.variant).collect();
        WfActivationCompletion::ok_from_cmds(variants, task.task_token)
    };
    core.worker().complete_workflow_task(completion).await?;
    Ok(())
}

async fn process_workflow_activation(
    task: &WfActivation,
    registry: &WorkflowRegistry,
    workflows: Arc<Mutex<HashMap<String, Box<dyn Workflow>>>>,
) -> Result<Vec<WorkflowCommand>> {
    let mut guard = workflows.lock().await;
    let mut commands = vec![];

    for job in &task.jobs {
        match &job.variant {
            Some(wf_activation_job::Variant::StartWorkflow(start)) => {
                let input: serde_json::Value = start
                    .arguments
                    .first()
                    .map(|a| serde_json::from_slice(&a.data))
                    .transpose()
                    .context("parsing workflow input")?
                    .unwrap_or(serde_json::Value::Null);

                let factory = registry
                    .get(&start.workflow_type)
                    .context("unknown workflow type")?;
                let mut workflow = factory(input);
                let actions = workflow.on_start();
                commands.extend(actions.into_iter().filter_map(action_to_command));
                guard.insert(task.run_id.clone(), workflow);
            }
            Some(wf_activation_job::Variant::ResolveActivity(resolve)) => {
                if let Some(workflow) = guard.get_mut(&task.run_id) {
                    let actions = match &resolve.result {
                        Some(ActivityResult {
                            status: Some(activity_result::activity_result::Status::Completed(success)),
                        }) => {
                            let result = success
                                .result
                                .as_ref()
                                .map(|p| serde_json::from_slice(&p.data).unwrap_or_default())
                                .unwrap_or_default();
                            workflow.on_activity_completed(&resolve.activity_id, result)
                        }
                        Some(ActivityResult {
                            status: Some(activity_result::activity_result::Status::Failed(failure)),
                        }) => {
                            let error = failure
                                .failure
                                .as_ref()
                                .map(|f| f.message.clone())
                                .unwrap_or_else(|| "unknown error".to_string());
                            workflow.on_activity_failed(&resolve.activity_id, &error)
                        }
                        Some(ActivityResult {
                            status: Some(activity_result::activity_result::Status::Canceled(_)),
                        }) => workflow.on_activity_failed(&resolve.activity_id, "cancelled"),
                        _ => {
                            warn!(activity_id = %resolve.activity_id, "unexpected activity result status");
                            vec![]
                        }
                    };
                    commands.extend(actions.into_iter().filter_map(action_to_command));
                } else {
                    warn!(run_id = %task.run_id, "workflow not found in cache for activity resolution");
                }
            }
            Some(wf_activation_job::Variant::RemoveFromCache(_)) => {
                debug!(run_id = %task.run_id, "remove-from-cache job deferred until end of batch");
            }
            other => {
                warn!(job = ?other, "unhandled workflow activation job");
            }
        }
    }

    Ok(commands)
}

fn action_to_command(action: WorkflowAction) -> Option<WorkflowCommand> {
    match action {
        WorkflowAction::ScheduleActivity {
            activity_id,
            activity_type,
            input,
        } => Some(WorkflowCommand {
            variant: Some(workflow_command::Variant::ScheduleActivity(ScheduleActivity {
                activity_id,
                activity_type,
                task_queue: TASK_QUEUE.to_string(),
                arguments: vec![Payload {
                    data: serde_json::to_vec(&input).unwrap_or_default(),
                    metadata: Default::default(),
                }],
                schedule_to_start_timeout: Some(Duration::from_secs(60).into()),
                start_to_close_timeout: Some(Duration::from_secs(300).into()),
                ..Default::default()
            })),
        }),
        WorkflowAction::StartChildWorkflow {
            activity_id,
            workflow_type,
            input,
        } => Some(WorkflowCommand {
            variant: Some(workflow_command::Variant::StartChildWorkflowExecution(
                StartChildWorkflowExecution {
                    workflow_id: activity_id,
                    workflow_type,
                    task_queue: TASK_QUEUE.to_string(),
                    input: vec![Payload {
                        data: serde_json::to_vec(&input).unwrap_or_default(),
                        metadata: Default::default(),
                    }],
                    ..Default::default()
                },
            )),
        }),
        WorkflowAction::StartTimer { activity_id, duration } => Some(WorkflowCommand {
            variant: Some(workflow_command::Variant::StartTimer(StartTimer {
                timer_id: activity_id,
                start_to_fire_timeout: Some(duration.into()),
            })),
        }),
        WorkflowAction::Cancel { activity_id } => Some(WorkflowCommand {
            variant: Some(workflow_command::Variant::RequestCancelActivity(
                RequestCancelActivity { activity_id },
            )),
        }),
        WorkflowAction::CompleteWorkflow { result } => Some(WorkflowCommand {
            variant: Some(workflow_command::Variant::CompleteWorkflowExecution(
                CompleteWorkflowExecution {
                    result: Some(Payload {
                        data: serde_json::to_vec(&result).unwrap_or_default(),
                        metadata: Default::default(),
                    }),
                },
            )),
        }),
        WorkflowAction::FailWorkflow { error } => Some(WorkflowCommand {
            variant: Some(workflow_command::Variant::FailWorkflowExecution(
                FailWorkflowExecution {
                    failure: Some(temporal_sdk_core::protos::coresdk::common::UserCodeFailure {
                        message: error,
                        ..Default::default()
                    }),
                },
            )),
        }),
        WorkflowAction::None => None,
    }
}

async fn poll_and_process_activity_task(
    core: &TemporalWorkerCore,
    activities: &ActivityContext,
) -> Result<()> {
    let task = core.worker().poll_activity_task().await?;
    if task.task_token.is_empty() {
        warn!("received activity task with empty task token, skipping");
        return Ok(());
    }

    let result = process_activity(&task, activities).await;
    let completion = ActivityTaskCompletion {
        task_token: task.task_token,
        result: Some(result),
    };
    core.worker().complete_activity_task(completion).await?;
    Ok(())
}

async fn process_activity(task: &ActivityTask, ctx: &ActivityContext) -> ActivityResult {
    match &task.variant {
        Some(activity_task::Variant::Start(start)) => {
            let input_data = start.input.first().map(|p| p.data.clone()).unwrap_or_default();
            let input: serde_json::Value = serde_json::from_slice(&input_data).unwrap_or(serde_json::Value::Null);

            let result = dispatch(ctx, &start.activity_type, input).await;
            match result {
                Ok(output) => ActivityResult::ok(Payload {
                    data: serde_json::to_vec(&output).unwrap_or_default(),
                    metadata: Default::default(),
                }),
                Err(error) => ActivityResult {
                    status: Some(activity_result::activity_result::Status::Failed(
                        activity_result::Failure {
                            failure: Some(temporal_sdk_core::protos::coresdk::common::UserCodeFailure {
                                message: error,
                                ..Default::default()
                            }),
                        },
                    )),
                },
            }
        }
        Some(activity_task::Variant::Cancel(_)) => ActivityResult {
            status: Some(activity_result::activity_result::Status::Canceled(
                activity_result::Cancelation { details: None },
            )),
        },
        None => ActivityResult {
            status: Some(activity_result::activity_result::Status::Failed(
                activity_result::Failure {
                    failure: Some(temporal_sdk_core::protos::coresdk::common::UserCodeFailure {
                        message: "activity task has no variant".to_string(),
                        ..Default::default()
                    }),
                },
            )),
        },
    }
}

async fn dispatch(
    ctx: &ActivityContext,
    activity_type: &str,
    input: serde_json::Value,
) -> Result<serde_json::Value, String> {
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

    #[test]
    fn schedule_activity_converts_to_a_command() {
        let action = WorkflowAction::ScheduleActivity {
            activity_id: "a".to_string(),
            activity_type: "PluginDispatchActivity".to_string(),
            input: serde_json::json!({}),
        };
        assert!(action_to_command(action).is_some());
    }

    #[test]
    fn none_action_converts_to_no_command() {
        assert!(action_to_command(WorkflowAction::None).is_none());
    }
}
