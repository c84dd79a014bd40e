// proto <-> schema conversions, following internal-protocol's
// `proto_x_to_schema`/`schema_x_to_proto` pairing and JSON-serialized
// complex-field convention rather than hand-rolled field-by-field protobuf
// messages for nested maps.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rocketship_schemas::{LogColor, LogLine, RunContext, RunId, RunStatus};
use rocketship_storage::models::{LogRow, RunRow, TestRunRow};

use crate::proto;

#[derive(Debug)]
pub enum ConversionError {
    MissingField(&'static str),
    InvalidUuid(uuid::Error),
    InvalidTimestamp(String),
    InvalidStatus(String),
    Json(serde_json::Error),
}

impl std::fmt::Display for ConversionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversionError::MissingField(field) => write!(f, "missing required field: {field}"),
            ConversionError::InvalidUuid(e) => write!(f, "invalid uuid: {e}"),
            ConversionError::InvalidTimestamp(s) => write!(f, "invalid timestamp: {s}"),
            ConversionError::InvalidStatus(s) => write!(f, "invalid status: {s}"),
            ConversionError::Json(e) => write!(f, "json error: {e}"),
        }
    }
}

impl std::error::Error for ConversionError {}

impl From<ConversionError> for tonic::Status {
    fn from(e: ConversionError) -> Self {
        tonic::Status::invalid_argument(e.to_string())
    }
}

pub fn parse_run_id(raw: &str) -> Result<RunId, ConversionError> {
    raw.parse().map_err(ConversionError::InvalidUuid)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ConversionError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ConversionError::InvalidTimestamp(raw.to_string()))
}

pub fn parse_status(raw: &str) -> Result<RunStatus, ConversionError> {
    raw.parse().map_err(ConversionError::InvalidStatus)
}

/// `context`'s `env` map is split out of `RunContext` on return: it feeds the
/// workflow's `env` template scope directly and is never persisted as part
/// of the run row (spec.md S6 "Secrets ... never persisted").
pub fn proto_context_to_schema(
    ctx: proto::RunContext,
) -> Result<(RunContext, HashMap<String, String>), ConversionError> {
    let metadata = if ctx.metadata_json.is_empty() {
        HashMap::new()
    } else {
        serde_json::from_str(&ctx.metadata_json).map_err(ConversionError::Json)?
    };

    Ok((
        RunContext {
            project_id: ctx.project_id,
            source: ctx.source,
            branch: ctx.branch,
            commit_sha: ctx.commit_sha,
            trigger: ctx.trigger,
            schedule_name: ctx.schedule_name,
            metadata,
        },
        ctx.env,
    ))
}

pub fn schema_context_to_proto(ctx: &RunContext) -> proto::RunContext {
    proto::RunContext {
        project_id: ctx.project_id.clone(),
        source: ctx.source.clone(),
        branch: ctx.branch.clone(),
        commit_sha: ctx.commit_sha.clone(),
        trigger: ctx.trigger.clone(),
        schedule_name: ctx.schedule_name.clone(),
        metadata_json: serde_json::to_string(&ctx.metadata).unwrap_or_default(),
        env: HashMap::new(),
    }
}

pub fn log_line_schema_to_proto(line: &LogLine) -> proto::LogLine {
    proto::LogLine {
        ts: line.ts.to_rfc3339(),
        run_id: line.run_id.to_string(),
        workflow_id: line.workflow_id.clone(),
        test_name: line.test_name.clone(),
        step_name: line.step_name.clone(),
        msg: line.msg.clone(),
        color: line.color.to_string(),
        bold: line.bold,
    }
}

pub fn log_row_to_proto(row: &LogRow) -> proto::LogLine {
    proto::LogLine {
        ts: row.ts.to_rfc3339(),
        run_id: row.run_id.to_string(),
        workflow_id: String::new(),
        test_name: row.test_name.clone(),
        step_name: row.step_name.clone(),
        msg: row.msg.clone(),
        color: row.color.clone(),
        bold: row.bold,
    }
}

fn color_from_proto(s: &str) -> LogColor {
    rocketship_storage::models::color_from_str(s)
}

pub fn add_log_request_to_line(req: &proto::AddLogRequest) -> Result<LogLine, ConversionError> {
    let run_id = parse_run_id(&req.run_id)?;
    Ok(LogLine {
        ts: Utc::now(),
        run_id,
        workflow_id: req.workflow_id.clone(),
        test_name: req.test_name.clone(),
        step_name: req.step_name.clone(),
        msg: req.message.clone(),
        color: color_from_proto(&req.color),
        bold: req.bold,
    })
}

pub fn run_row_to_summary(row: &RunRow) -> proto::RunSummary {
    proto::RunSummary {
        run_id: row.id.to_string(),
        suite_name: row.suite_name.clone(),
        status: row.status.clone(),
        started_at: row.started_at.to_rfc3339(),
        ended_at: row.ended_at.map(|t| t.to_rfc3339()),
    }
}

pub fn test_run_row_to_details(row: &TestRunRow) -> proto::TestDetails {
    proto::TestDetails {
        test_name: row.test_name.clone(),
        status: row.status.clone(),
        started_at: row.started_at.to_rfc3339(),
        ended_at: row.ended_at.map(|t| t.to_rfc3339()),
        error: row.error.clone(),
    }
}

pub fn run_row_to_details(row: &RunRow, tests: &[TestRunRow]) -> proto::RunDetails {
    proto::RunDetails {
        run_id: row.id.to_string(),
        suite_name: row.suite_name.clone(),
        status: row.status.clone(),
        started_at: row.started_at.to_rfc3339(),
        ended_at: row.ended_at.map(|t| t.to_rfc3339()),
        context_json: serde_json::to_string(&row.context).unwrap_or_default(),
        tests: tests.iter().map(test_run_row_to_details).collect(),
    }
}
