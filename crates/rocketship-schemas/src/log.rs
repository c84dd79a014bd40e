// Log line - the unit streamed from activities to gRPC consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal color hint for a log line, matching the CLI's historical output style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogColor {
    Green,
    Red,
    Purple,
    None,
}

impl Default for LogColor {
    fn default() -> Self {
        LogColor::None
    }
}

impl std::fmt::Display for LogColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogColor::Green => write!(f, "green"),
            LogColor::Red => write!(f, "red"),
            LogColor::Purple => write!(f, "purple"),
            LogColor::None => write!(f, ""),
        }
    }
}

/// Append-only log entry. Ordering per `(run_id, workflow_id)` must be preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub ts: DateTime<Utc>,
    pub run_id: Uuid,
    /// The test/child-workflow this line belongs to, used for ordering.
    pub workflow_id: String,
    #[serde(default)]
    pub test_name: Option<String>,
    #[serde(default)]
    pub step_name: Option<String>,
    pub msg: String,
    #[serde(default)]
    pub color: LogColor,
    #[serde(default)]
    pub bold: bool,
}

impl LogLine {
    pub fn new(run_id: Uuid, workflow_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            run_id,
            workflow_id: workflow_id.into(),
            test_name: None,
            step_name: None,
            msg: msg.into(),
            color: LogColor::None,
            bold: false,
        }
    }

    pub fn with_test(mut self, test_name: impl Into<String>) -> Self {
        self.test_name = Some(test_name.into());
        self
    }

    pub fn with_step(mut self, step_name: impl Into<String>) -> Self {
        self.step_name = Some(step_name.into());
        self
    }

    pub fn colored(mut self, color: LogColor, bold: bool) -> Self {
        self.color = color;
        self.bold = bold;
        self
    }
}
