// gRPC service implementation (spec.md S4.5/S6).
//
// One method per RPC, following the teacher's runs.rs handler shape (parse
// request -> call the store/runner -> map errors -> build response) just
// translated from axum extractors to tonic's Request<T>/Response<T>.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use rocketship_core::plugin::AssertionResult;
use rocketship_schemas::{LogLine, RunStatus};
use rocketship_storage::models::{OrderBy, Pagination, RunFilter};
use rocketship_storage::RunStore;
use rocketship_worker::{ActivityContext, LogSink, SuiteRunner};
use tonic::{Request, Response, Status};

use crate::broker::SharedBroker;
use crate::conversion;
use crate::proto;

/// Forwards activity-emitted log lines to both durable storage and the
/// in-memory broker, the way the engine (not the workflow runtime) owns run
/// persistence (spec.md S5 "Run rows: written only by Engine").
pub struct EngineLogSink {
    pub store: Arc<dyn RunStore>,
    pub broker: SharedBroker,
}

#[async_trait::async_trait]
impl LogSink for EngineLogSink {
    async fn add_log(&self, line: LogLine) -> anyhow::Result<()> {
        self.store.append_log(&line).await?;
        self.broker.publish(line).await;
        Ok(())
    }

    async fn record_assertions(
        &self,
        run_id: uuid::Uuid,
        test_name: &str,
        _step_name: &str,
        assertions: &[AssertionResult],
    ) -> anyhow::Result<()> {
        if let Some(failed) = assertions.iter().find(|a| !a.passed) {
            self.store
                .set_test_run_status(run_id, test_name, RunStatus::Failed, Some(failed.message.clone()))
                .await?;
        }
        Ok(())
    }
}

pub struct EngineService {
    pub store: Arc<dyn RunStore>,
    pub runner: Arc<dyn SuiteRunner>,
    pub broker: SharedBroker,
    pub known_plugins: &'static [&'static str],
}

type LogStream = Pin<Box<dyn Stream<Item = Result<proto::LogLine, Status>> + Send + 'static>>;

#[tonic::async_trait]
impl proto::engine_server::Engine for EngineService {
    async fn create_run(
        &self,
        request: Request<proto::CreateRunRequest>,
    ) -> Result<Response<proto::CreateRunResponse>, Status> {
        let req = request.into_inner();

        let suite = rocketship_core::plan_suite(&req.yaml_payload, self.known_plugins)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        let (ctx, env) = conversion::proto_context_to_schema(req.context.unwrap_or_default())?;

        let row = self
            .store
            .create_run(&suite.name, &ctx)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;

        self.runner
            .start_run(row.id, suite, ctx, env)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;

        tracing::info!(run_id = %row.id, "run created");
        Ok(Response::new(proto::CreateRunResponse {
            run_id: row.id.to_string(),
        }))
    }

    type StreamLogsStream = LogStream;

    async fn stream_logs(
        &self,
        request: Request<proto::StreamLogsRequest>,
    ) -> Result<Response<Self::StreamLogsStream>, Status> {
        let run_id = conversion::parse_run_id(&request.into_inner().run_id)?;

        // Confirm the run exists before subscribing; avoids opening a stream
        // for a run_id nobody ever created.
        self.store
            .get_run(run_id)
            .await
            .map_err(|_| Status::not_found(format!("run {run_id} not found")))?;

        let (replay, mut rx) = self.broker.subscribe(run_id).await;
        let store = self.store.clone();
        let runner = self.runner.clone();

        let stream = async_stream::stream! {
            for line in replay {
                yield Ok(conversion::log_line_schema_to_proto(&line));
            }

            loop {
                tokio::select! {
                    line = rx.recv() => {
                        match line {
                            Some(line) => yield Ok(conversion::log_line_schema_to_proto(&line)),
                            None => break,
                        }
                    }
                    _ = tokio::time::sleep(std::time::Duration::from_millis(500)) => {
                        let terminal = match store.get_run(run_id).await {
                            Ok(row) => row.status.parse::<RunStatus>().map(RunStatus::is_terminal).unwrap_or(false),
                            Err(_) => true,
                        };
                        if terminal && !runner.is_running(run_id).await {
                            break;
                        }
                    }
                }
            }
        };

        Ok(Response::new(Box::pin(stream) as Self::StreamLogsStream))
    }

    async fn add_log(
        &self,
        request: Request<proto::AddLogRequest>,
    ) -> Result<Response<proto::AddLogResponse>, Status> {
        let line = conversion::add_log_request_to_line(&request.into_inner())?;
        self.store
            .append_log(&line)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;
        self.broker.publish(line).await;
        Ok(Response::new(proto::AddLogResponse {}))
    }

    async fn list_runs(
        &self,
        request: Request<proto::ListRunsRequest>,
    ) -> Result<Response<proto::ListRunsResponse>, Status> {
        let req = request.into_inner();

        let filter = RunFilter {
            project_id: req.project_id,
            source: req.source,
            branch: req.branch,
            status: req.status.map(|s| conversion::parse_status(&s)).transpose()?,
            schedule_name: req.schedule_name,
        };
        let order_by = match req.order_by.as_str() {
            "ended_at" => OrderBy::EndedAt,
            "duration" => OrderBy::Duration,
            _ => OrderBy::StartedAt,
        };
        let page = Pagination {
            cursor: req.cursor,
            limit: if req.limit == 0 { 50 } else { req.limit as usize },
            order_by,
            descending: req.descending,
        };

        let (rows, next_cursor, total) = self
            .store
            .list_runs(&filter, &page)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;

        Ok(Response::new(proto::ListRunsResponse {
            runs: rows.iter().map(conversion::run_row_to_summary).collect(),
            next_cursor,
            total: total as u64,
        }))
    }

    async fn get_run(
        &self,
        request: Request<proto::GetRunRequest>,
    ) -> Result<Response<proto::RunDetails>, Status> {
        let run_id = conversion::parse_run_id(&request.into_inner().run_id)?;

        let row = self
            .store
            .get_run(run_id)
            .await
            .map_err(|_| Status::not_found(format!("run {run_id} not found")))?;
        let tests = self
            .store
            .list_test_runs(run_id)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;

        Ok(Response::new(conversion::run_row_to_details(&row, &tests)))
    }

    async fn cancel_run(
        &self,
        request: Request<proto::CancelRunRequest>,
    ) -> Result<Response<proto::CancelRunResponse>, Status> {
        let run_id = conversion::parse_run_id(&request.into_inner().run_id)?;

        self.store
            .get_run(run_id)
            .await
            .map_err(|_| Status::not_found(format!("run {run_id} not found")))?;

        match self.runner.cancel_run(run_id).await {
            Ok(()) => {
                tracing::info!(run_id = %run_id, "cancel accepted");
                Ok(Response::new(proto::CancelRunResponse {
                    success: true,
                    message: "cancel signal accepted".to_string(),
                }))
            }
            Err(e) => Ok(Response::new(proto::CancelRunResponse {
                success: false,
                message: e.to_string(),
            })),
        }
    }

    async fn health(
        &self,
        _request: Request<proto::HealthRequest>,
    ) -> Result<Response<proto::HealthResponse>, Status> {
        let store_ok = self
            .store
            .list_runs(&RunFilter::default(), &Pagination { limit: 1, ..Pagination::default() })
            .await
            .is_ok();

        let status = if store_ok { "ok" } else { "error" };
        Ok(Response::new(proto::HealthResponse {
            status: status.to_string(),
        }))
    }
}

/// Binds an `ActivityContext` to this process's store/broker, for the
/// in-process runner path (`create_runner` with `RunnerMode::InProcess`).
pub fn activity_context(
    plugins: Arc<rocketship_core::PluginRegistry>,
    store: Arc<dyn RunStore>,
    broker: SharedBroker,
    run_dir: std::path::PathBuf,
) -> ActivityContext {
    ActivityContext {
        registry: plugins,
        log_sink: Arc::new(EngineLogSink { store, broker }),
        run_dir,
    }
}
