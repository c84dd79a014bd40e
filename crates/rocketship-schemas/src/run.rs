// Runtime state persisted per run/test.
//
// StepState is deliberately absent here - spec.md says it is ephemeral and
// not persisted beyond log lines and assertion outcomes, so it lives only in
// the workflow runtime's in-memory working set (rocketship-worker).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for a suite invocation. v7 so rows sort by creation time.
pub type RunId = Uuid;

/// Closed status set shared by the gRPC surface and the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Cancelled,
    Timeout,
}

impl RunStatus {
    /// Terminal statuses cannot transition further (testable property #5).
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Pending | RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Passed => "PASSED",
            RunStatus::Failed => "FAILED",
            RunStatus::Cancelled => "CANCELLED",
            RunStatus::Timeout => "TIMEOUT",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(RunStatus::Pending),
            "RUNNING" => Ok(RunStatus::Running),
            "PASSED" => Ok(RunStatus::Passed),
            "FAILED" => Ok(RunStatus::Failed),
            "CANCELLED" => Ok(RunStatus::Cancelled),
            "TIMEOUT" => Ok(RunStatus::Timeout),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Opaque-to-the-core context supplied at `CreateRun` and persisted with the run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunContext {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub trigger: Option<String>,
    #[serde(default)]
    pub schedule_name: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// Per-test persisted state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestState {
    pub run_id: RunId,
    pub test_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TestState {
    pub fn pending(run_id: RunId, test_name: impl Into<String>) -> Self {
        Self {
            run_id,
            test_name: test_name.into(),
            status: RunStatus::Pending,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Passed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(RunStatus::Timeout.is_terminal());
    }

    #[test]
    fn status_round_trips_through_display_and_from_str() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Passed,
            RunStatus::Failed,
            RunStatus::Cancelled,
            RunStatus::Timeout,
        ] {
            let parsed: RunStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }
}
