// In-memory RunStore - used for local/dev when DATABASE_URL is unset, and by
// the test suite so tests never need a running Postgres (spec.md S6
// `[EXPANSION]`: "Absent DATABASE_URL => the engine falls back to the
// in-memory RunStore").

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rocketship_schemas::{LogLine, RunContext, RunId, RunStatus};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{LogRow, Pagination, RunFilter, RunRow, TestRunRow};
use crate::store::{Result, RunStore, StoreError};

#[derive(Default)]
struct State {
    runs: HashMap<RunId, RunRow>,
    test_runs: HashMap<RunId, Vec<TestRunRow>>,
    logs: HashMap<RunId, Vec<LogRow>>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create_run(&self, suite_name: &str, ctx: &RunContext) -> Result<RunRow> {
        let row = RunRow::new(Uuid::now_v7(), suite_name, ctx);
        self.state.write().await.runs.insert(row.id, row.clone());
        Ok(row)
    }

    async fn set_run_status(
        &self,
        run_id: RunId,
        status: RunStatus,
        ended_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let run = state
            .runs
            .get_mut(&run_id)
            .ok_or(StoreError::RunNotFound(run_id))?;
        run.status = status.to_string();
        if let Some(ended_at) = ended_at {
            run.ended_at = Some(ended_at);
        }
        Ok(())
    }

    async fn get_run(&self, run_id: RunId) -> Result<RunRow> {
        self.state
            .read()
            .await
            .runs
            .get(&run_id)
            .cloned()
            .ok_or(StoreError::RunNotFound(run_id))
    }

    async fn list_runs(
        &self,
        filter: &RunFilter,
        page: &Pagination,
    ) -> Result<(Vec<RunRow>, Option<String>, usize)> {
        let state = self.state.read().await;
        let mut matching: Vec<RunRow> = state
            .runs
            .values()
            .filter(|r| matches_filter(r, filter))
            .cloned()
            .collect();

        matching.sort_by(|a, b| {
            let ord = a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id));
            if page.descending {
                ord.reverse()
            } else {
                ord
            }
        });

        let total = matching.len();

        if let Some(cursor) = page.cursor.as_deref().and_then(crate::models::decode_cursor) {
            matching.retain(|r| {
                let row_key = (r.started_at, r.id);
                if page.descending {
                    row_key < cursor
                } else {
                    row_key > cursor
                }
            });
        }

        let page_rows: Vec<RunRow> = matching.into_iter().take(page.limit).collect();
        let next_cursor = page_rows
            .last()
            .map(|r| crate::models::encode_cursor(r.started_at, r.id));

        Ok((page_rows, next_cursor, total))
    }

    async fn create_test_run(&self, run_id: RunId, test_name: &str) -> Result<TestRunRow> {
        let row = TestRunRow {
            id: Uuid::now_v7(),
            run_id,
            test_name: test_name.to_string(),
            status: RunStatus::Pending.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            error: None,
        };
        self.state
            .write()
            .await
            .test_runs
            .entry(run_id)
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    async fn set_test_run_status(
        &self,
        run_id: RunId,
        test_name: &str,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let rows = state.test_runs.entry(run_id).or_default();
        if let Some(row) = rows.iter_mut().find(|r| r.test_name == test_name) {
            row.status = status.to_string();
            row.error = error;
            if status.is_terminal() {
                row.ended_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn list_test_runs(&self, run_id: RunId) -> Result<Vec<TestRunRow>> {
        Ok(self
            .state
            .read()
            .await
            .test_runs
            .get(&run_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append_log(&self, line: &LogLine) -> Result<()> {
        self.state
            .write()
            .await
            .logs
            .entry(line.run_id)
            .or_default()
            .push(LogRow::from(line));
        Ok(())
    }

    async fn list_logs(&self, run_id: RunId) -> Result<Vec<LogRow>> {
        Ok(self
            .state
            .read()
            .await
            .logs
            .get(&run_id)
            .cloned()
            .unwrap_or_default())
    }
}

fn matches_filter(row: &RunRow, filter: &RunFilter) -> bool {
    if let Some(status) = &filter.status {
        if row.status != status.to_string() {
            return false;
        }
    }
    if let Some(project_id) = &filter.project_id {
        let actual = row.context.get("project_id").and_then(|v| v.as_str());
        if actual != Some(project_id.as_str()) {
            return false;
        }
    }
    if let Some(branch) = &filter.branch {
        let actual = row.context.get("branch").and_then(|v| v.as_str());
        if actual != Some(branch.as_str()) {
            return false;
        }
    }
    if let Some(source) = &filter.source {
        let actual = row.context.get("source").and_then(|v| v.as_str());
        if actual != Some(source.as_str()) {
            return false;
        }
    }
    if let Some(schedule_name) = &filter.schedule_name {
        let actual = row.context.get("schedule_name").and_then(|v| v.as_str());
        if actual != Some(schedule_name.as_str()) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_get_run_round_trips() {
        let store = MemoryStore::new();
        let row = store.create_run("s", &RunContext::default()).await.unwrap();
        let fetched = store.get_run(row.id).await.unwrap();
        assert_eq!(fetched.id, row.id);
        assert_eq!(fetched.status, "PENDING");
    }

    #[tokio::test]
    async fn status_transition_is_visible_on_get() {
        let store = MemoryStore::new();
        let row = store.create_run("s", &RunContext::default()).await.unwrap();
        store
            .set_run_status(row.id, RunStatus::Passed, Some(Utc::now()))
            .await
            .unwrap();
        let fetched = store.get_run(row.id).await.unwrap();
        assert_eq!(fetched.status, "PASSED");
        assert!(fetched.ended_at.is_some());
    }

    #[tokio::test]
    async fn list_runs_filters_by_status() {
        let store = MemoryStore::new();
        let a = store.create_run("s", &RunContext::default()).await.unwrap();
        let _b = store.create_run("s", &RunContext::default()).await.unwrap();
        store
            .set_run_status(a.id, RunStatus::Passed, Some(Utc::now()))
            .await
            .unwrap();

        let filter = RunFilter {
            status: Some(RunStatus::Passed),
            ..Default::default()
        };
        let (rows, _, total) = store.list_runs(&filter, &Pagination::default()).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].id, a.id);
    }

    #[tokio::test]
    async fn logs_append_in_order() {
        let store = MemoryStore::new();
        let run_id = Uuid::now_v7();
        for i in 0..3 {
            store
                .append_log(&LogLine::new(run_id, "wf", format!("line {i}")))
                .await
                .unwrap();
        }
        let logs = store.list_logs(run_id).await.unwrap();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].msg, "line 0");
        assert_eq!(logs[2].msg, "line 2");
    }
}
