// RunStore - the persistence interface (spec.md S2 "Run Store", S6).
//
// Workflow activities never touch storage directly (spec.md S5 "Shared
// resources"); only the engine writes through this trait.

use async_trait::async_trait;
use rocketship_schemas::{LogLine, RunContext, RunId, RunStatus};

use crate::models::{LogRow, Pagination, RunFilter, RunRow, TestRunRow};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("run {0} not found")]
    RunNotFound(RunId),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, suite_name: &str, ctx: &RunContext) -> Result<RunRow>;
    async fn set_run_status(
        &self,
        run_id: RunId,
        status: RunStatus,
        ended_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()>;
    async fn get_run(&self, run_id: RunId) -> Result<RunRow>;
    async fn list_runs(&self, filter: &RunFilter, page: &Pagination) -> Result<(Vec<RunRow>, Option<String>, usize)>;

    async fn create_test_run(&self, run_id: RunId, test_name: &str) -> Result<TestRunRow>;
    async fn set_test_run_status(
        &self,
        run_id: RunId,
        test_name: &str,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<()>;
    async fn list_test_runs(&self, run_id: RunId) -> Result<Vec<TestRunRow>>;

    async fn append_log(&self, line: &LogLine) -> Result<()>;
    async fn list_logs(&self, run_id: RunId) -> Result<Vec<LogRow>>;
}
