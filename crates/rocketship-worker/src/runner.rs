// Suite runner - the thing callers actually hold (spec.md S4.4/S6).
//
// Mirrors everruns_worker's AgentRunner split: a trait object interface plus
// an in-process default implementation, with a second Temporal-backed
// implementation behind the `temporal` feature. `create_runner` is the single
// place that decides which one a process gets, driven by `RunnerConfig`
// (spec.md S9 "Deployment").

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rocketship_core::PluginRegistry;
use rocketship_schemas::{RunContext, RunId, RunStatus, Suite};
use rocketship_storage::RunStore;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};

use crate::activities::{ActivityContext, LogSink};
use crate::executor::Executor;
use crate::suite_workflow::SuiteWorkflowInput;
use crate::workflow_registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerMode {
    InProcess,
    #[cfg(feature = "temporal")]
    Temporal,
}

pub struct RunnerConfig {
    pub mode: RunnerMode,
    #[cfg(feature = "temporal")]
    pub temporal_address: Option<String>,
}

impl RunnerConfig {
    /// `ROCKETSHIP_RUNNER_MODE=temporal` opts into the Temporal-backed runner
    /// when the crate was built with the `temporal` feature; anything else,
    /// including the variable being unset, keeps the in-process default.
    pub fn from_env() -> Self {
        #[cfg(feature = "temporal")]
        {
            let mode = match env::var("ROCKETSHIP_RUNNER_MODE").as_deref() {
                Ok("temporal") => RunnerMode::Temporal,
                _ => RunnerMode::InProcess,
            };
            Self {
                mode,
                temporal_address: env::var("TEMPORAL_ADDRESS").ok(),
            }
        }
        #[cfg(not(feature = "temporal"))]
        {
            Self {
                mode: RunnerMode::InProcess,
            }
        }
    }
}

/// What the engine drives a suite run through. Run/test-row persistence
/// happens here, not inside activities (spec.md S5: "Run rows: written only
/// by Engine; workflow activities never touch storage directly").
#[async_trait]
pub trait SuiteRunner: Send + Sync {
    async fn start_run(
        &self,
        run_id: RunId,
        suite: Suite,
        ctx: RunContext,
        env_snapshot: HashMap<String, String>,
    ) -> anyhow::Result<()>;

    async fn cancel_run(&self, run_id: RunId) -> anyhow::Result<()>;

    async fn is_running(&self, run_id: RunId) -> bool;

    async fn active_count(&self) -> usize;
}

struct ActiveRun {
    cancel: Arc<Notify>,
}

pub struct InProcessRunner {
    executor: Executor,
    store: Arc<dyn RunStore>,
    active: Arc<Mutex<HashMap<RunId, ActiveRun>>>,
}

impl InProcessRunner {
    pub fn new(
        plugins: Arc<PluginRegistry>,
        log_sink: Arc<dyn LogSink>,
        run_dir: PathBuf,
        store: Arc<dyn RunStore>,
    ) -> Self {
        let activity_ctx = Arc::new(ActivityContext {
            registry: plugins,
            log_sink,
            run_dir,
        });
        let workflows = Arc::new(workflow_registry::builtin_registry());
        Self {
            executor: Executor::new(workflows, activity_ctx),
            store,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl SuiteRunner for InProcessRunner {
    async fn start_run(
        &self,
        run_id: RunId,
        suite: Suite,
        ctx: RunContext,
        env_snapshot: HashMap<String, String>,
    ) -> anyhow::Result<()> {
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

        let input = serde_json::to_value(SuiteWorkflowInput {
            run_id,
            plan: suite,
            ctx,
            env_snapshot,
        })?;

        let cancel = Arc::new(Notify::new());
        self.active.lock().await.insert(
            run_id,
            ActiveRun {
                cancel: cancel.clone(),
            },
        );

        let executor = self.executor.clone();
        let store = self.store.clone();
        let active = self.active.clone();

        tokio::spawn(async move {
            let result = executor
                .run_workflow_cancellable("SuiteWorkflow".to_string(), input, cancel)
                .await;
            let status = finish_status(&run_id, result);
            if let Err(e) = store
                .set_run_status(run_id, status, Some(Utc::now()))
                .await
            {
                tracing::error!(%run_id, error = %e, "failed to persist final run status");
            }
            active.lock().await.remove(&run_id);
        });

        Ok(())
    }

    async fn cancel_run(&self, run_id: RunId) -> anyhow::Result<()> {
        if let Some(run) = self.active.lock().await.get(&run_id) {
            run.cancel.notify_one();
        }
        Ok(())
    }

    async fn is_running(&self, run_id: RunId) -> bool {
        self.active.lock().await.contains_key(&run_id)
    }

    async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }
}

fn finish_status(run_id: &RunId, result: Result<Value, String>) -> RunStatus {
    match result {
        Ok(value) => value
            .get("status")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<RunStatus>().ok())
            .unwrap_or(RunStatus::Failed),
        Err(error) => {
            tracing::warn!(%run_id, error, "suite workflow failed at the runtime level");
            RunStatus::Failed
        }
    }
}

pub fn create_runner(
    config: &RunnerConfig,
    plugins: Arc<PluginRegistry>,
    log_sink: Arc<dyn LogSink>,
    run_dir: PathBuf,
    store: Arc<dyn RunStore>,
) -> Arc<dyn SuiteRunner> {
    match config.mode {
        RunnerMode::InProcess => Arc::new(InProcessRunner::new(plugins, log_sink, run_dir, store)),
        #[cfg(feature = "temporal")]
        RunnerMode::Temporal => Arc::new(crate::temporal::TemporalRunner::new(
            config
                .temporal_address
                .clone()
                .unwrap_or_else(|| "127.0.0.1:7233".to_string()),
            plugins,
            log_sink,
            run_dir,
            store,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activities::LogSink;
    use async_trait::async_trait;
    use rocketship_schemas::{LogLine, Test};
    use rocketship_storage::MemoryStore;

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

    #[tokio::test]
    async fn start_run_persists_passed_status_for_an_empty_suite() {
        let store: Arc<dyn RunStore> = Arc::new(MemoryStore::new());
        let run_id = store
            .create_run("s", &RunContext::default())
            .await
            .unwrap()
            .id;
        let runner = InProcessRunner::new(
            Arc::new(rocketship_plugins::builtin_registry(PathBuf::from("/tmp"))),
            Arc::new(NullSink),
            PathBuf::from("/tmp"),
            store.clone(),
        );

        let suite = Suite {
            name: "s".to_string(),
            description: None,
            vars: Default::default(),
            openapi: None,
            tests: vec![Test {
                name: "t".to_string(),
                steps: vec![],
            }],
        };
        runner
            .start_run(run_id, suite, RunContext::default(), HashMap::new())
            .await
            .unwrap();

        for _ in 0..50 {
            if !runner.is_running(run_id).await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let row = store.get_run(run_id).await.unwrap();
        assert_eq!(row.status, "PASSED");
    }
}
