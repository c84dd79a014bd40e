// Postgres-backed RunStore, mirroring everruns_storage::repositories::Database:
// a PgPool wrapped in a cloneable struct, `from_url` constructor, one method
// per operation using `sqlx::query_as` + explicit `.bind(...)` chains.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocketship_schemas::{LogLine, RunContext, RunId, RunStatus};
use sqlx::PgPool;

use crate::models::{LogRow, Pagination, RunFilter, RunRow, TestRunRow};
use crate::store::{Result, RunStore, StoreError};

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn from_url(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations; called once at process start.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RunStore for Database {
    async fn create_run(&self, suite_name: &str, ctx: &RunContext) -> Result<RunRow> {
        let context_json = serde_json::to_value(ctx).map_err(|e| StoreError::Backend(e.into()))?;

        let row = sqlx::query_as::<_, RunRow>(
            r#"
            INSERT INTO run (id, suite_name, status, started_at, context)
            VALUES (uuid_generate_v7(), $1, $2, now(), $3)
            RETURNING id, suite_name, status, started_at, ended_at, context
            "#,
        )
        .bind(suite_name)
        .bind(RunStatus::Pending.to_string())
        .bind(&context_json)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        Ok(row)
    }

    async fn set_run_status(
        &self,
        run_id: RunId,
        status: RunStatus,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE run SET status = $1, ended_at = COALESCE($2, ended_at)
            WHERE id = $3
            "#,
        )
        .bind(status.to_string())
        .bind(ended_at)
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RunNotFound(run_id));
        }
        Ok(())
    }

    async fn get_run(&self, run_id: RunId) -> Result<RunRow> {
        sqlx::query_as::<_, RunRow>(
            r#"
            SELECT id, suite_name, status, started_at, ended_at, context
            FROM run WHERE id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?
        .ok_or(StoreError::RunNotFound(run_id))
    }

    async fn list_runs(
        &self,
        filter: &RunFilter,
        page: &Pagination,
    ) -> Result<(Vec<RunRow>, Option<String>, usize)> {
        // Filters/cursor compose into the WHERE clause; kept as a single
        // conservative query (no dynamic SQL string building) for clarity.
        let order_column = match page.order_by {
            crate::models::OrderBy::StartedAt => "started_at",
            crate::models::OrderBy::EndedAt => "ended_at",
            crate::models::OrderBy::Duration => "ended_at - started_at",
        };
        let direction = if page.descending { "DESC" } else { "ASC" };
        // The cursor always encodes (started_at, id) per spec.md S4.5,
        // regardless of order_by - it anchors pagination on insertion order,
        // not on whatever column the page happens to be sorted by.
        let cursor_cmp = if page.descending { "<" } else { ">" };
        let cursor = page.cursor.as_deref().and_then(crate::models::decode_cursor);

        let rows = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            SELECT id, suite_name, status, started_at, ended_at, context
            FROM run
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR context->>'project_id' = $2)
              AND ($3::text IS NULL OR context->>'branch' = $3)
              AND ($4::text IS NULL OR context->>'source' = $4)
              AND ($5::text IS NULL OR context->>'schedule_name' = $5)
              AND ($7::timestamptz IS NULL OR (started_at, id) {cursor_cmp} ($7, $8))
            ORDER BY {order_column} {direction}
            LIMIT $6
            "#
        ))
        .bind(filter.status.map(|s| s.to_string()))
        .bind(&filter.project_id)
        .bind(&filter.branch)
        .bind(&filter.source)
        .bind(&filter.schedule_name)
        .bind(page.limit as i64)
        .bind(cursor.map(|(ts, _)| ts))
        .bind(cursor.map(|(_, id)| id))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        let total = rows.len();
        let next_cursor = rows
            .last()
            .map(|r| crate::models::encode_cursor(r.started_at, r.id));
        Ok((rows, next_cursor, total))
    }

    async fn create_test_run(&self, run_id: RunId, test_name: &str) -> Result<TestRunRow> {
        sqlx::query_as::<_, TestRunRow>(
            r#"
            INSERT INTO test_run (id, run_id, test_name, status, started_at)
            VALUES (uuid_generate_v7(), $1, $2, $3, now())
            RETURNING id, run_id, test_name, status, started_at, ended_at, error
            "#,
        )
        .bind(run_id)
        .bind(test_name)
        .bind(RunStatus::Pending.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))
    }

    async fn set_test_run_status(
        &self,
        run_id: RunId,
        test_name: &str,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE test_run
            SET status = $1, error = $2, ended_at = CASE WHEN $3 THEN now() ELSE ended_at END
            WHERE run_id = $4 AND test_name = $5
            "#,
        )
        .bind(status.to_string())
        .bind(&error)
        .bind(status.is_terminal())
        .bind(run_id)
        .bind(test_name)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn list_test_runs(&self, run_id: RunId) -> Result<Vec<TestRunRow>> {
        sqlx::query_as::<_, TestRunRow>(
            r#"
            SELECT id, run_id, test_name, status, started_at, ended_at, error
            FROM test_run WHERE run_id = $1 ORDER BY started_at ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))
    }

    async fn append_log(&self, line: &LogLine) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO log (run_id, ts, test_name, step_name, msg, color, bold)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(line.run_id)
        .bind(line.ts)
        .bind(&line.test_name)
        .bind(&line.step_name)
        .bind(&line.msg)
        .bind(line.color.to_string())
        .bind(line.bold)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn list_logs(&self, run_id: RunId) -> Result<Vec<LogRow>> {
        sqlx::query_as::<_, LogRow>(
            r#"
            SELECT run_id, ts, test_name, step_name, msg, color, bold
            FROM log WHERE run_id = $1 ORDER BY ts ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))
    }
}
