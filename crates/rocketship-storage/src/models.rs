// Row shapes persisted by the store (spec.md S6 "Persisted state layout").

use chrono::{DateTime, Utc};
use rocketship_schemas::{LogColor, RunContext, RunId, RunStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RunRow {
    pub id: RunId,
    pub suite_name: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub context: serde_json::Value,
}

impl RunRow {
    pub fn new(id: RunId, suite_name: impl Into<String>, ctx: &RunContext) -> Self {
        Self {
            id,
            suite_name: suite_name.into(),
            status: RunStatus::Pending.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            context: serde_json::to_value(ctx).unwrap_or(serde_json::Value::Null),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TestRunRow {
    pub id: Uuid,
    pub run_id: RunId,
    pub test_name: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LogRow {
    pub run_id: RunId,
    pub ts: DateTime<Utc>,
    pub test_name: Option<String>,
    pub step_name: Option<String>,
    pub msg: String,
    pub color: String,
    pub bold: bool,
}

impl From<&rocketship_schemas::LogLine> for LogRow {
    fn from(line: &rocketship_schemas::LogLine) -> Self {
        Self {
            run_id: line.run_id,
            ts: line.ts,
            test_name: line.test_name.clone(),
            step_name: line.step_name.clone(),
            msg: line.msg.clone(),
            color: line.color.to_string(),
            bold: line.bold,
        }
    }
}

/// Filters accepted by `ListRuns` (spec.md S4.5/S6).
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub project_id: Option<String>,
    pub source: Option<String>,
    pub branch: Option<String>,
    pub status: Option<RunStatus>,
    pub schedule_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    StartedAt,
    EndedAt,
    Duration,
}

#[derive(Debug, Clone)]
pub struct Pagination {
    pub cursor: Option<String>,
    pub limit: usize,
    pub order_by: OrderBy,
    pub descending: bool,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            cursor: None,
            limit: 50,
            order_by: OrderBy::StartedAt,
            descending: true,
        }
    }
}

/// Opaque cursor encoding `(started_at, run_id)`, per spec.md S4.5.
pub fn encode_cursor(started_at: DateTime<Utc>, run_id: RunId) -> String {
    use base64::Engine;
    let raw = format!("{}|{}", started_at.to_rfc3339(), run_id);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw)
}

pub fn decode_cursor(cursor: &str) -> Option<(DateTime<Utc>, RunId)> {
    use base64::Engine;
    let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(cursor)
        .ok()?;
    let raw = String::from_utf8(raw).ok()?;
    let (ts, id) = raw.split_once('|')?;
    Some((DateTime::parse_from_rfc3339(ts).ok()?.with_timezone(&Utc), id.parse().ok()?))
}

pub fn color_from_str(s: &str) -> LogColor {
    match s {
        "green" => LogColor::Green,
        "red" => LogColor::Red,
        "purple" => LogColor::Purple,
        _ => LogColor::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trips() {
        let ts = Utc::now();
        let id = Uuid::now_v7();
        let cursor = encode_cursor(ts, id);
        let (decoded_ts, decoded_id) = decode_cursor(&cursor).unwrap();
        assert_eq!(decoded_id, id);
        assert_eq!(decoded_ts.timestamp_millis(), ts.timestamp_millis());
    }
}
