// The step activity contract (spec.md S4.2).
//
// Grounded on everruns_core::tools::{Tool, ToolRegistry}: a plugin is the
// same shape as a Tool, just renamed to the suite-execution domain. The
// envelope (ActivityInput/ActivityOutput) is fixed and plugin-agnostic so the
// workflow runtime never needs to know which plugin it is driving.

use std::collections::HashMap;

use async_trait::async_trait;
use rocketship_schemas::{Assertion, AssertionKind, LogLine, SaveRule};
use serde_json::Value;

use crate::error::Result;

/// Everything a plugin needs to run a single step. `config` is the step's raw
/// YAML block, unresolved; callers are expected to have already resolved
/// templates in any field that matters (the workflow runtime does this via
/// `TemplateResolverActivity` before invoking the plugin). `saves`/`assertions`
/// carry the step's declared `save`/`assertions` blocks through so the plugin
/// can produce an `ActivityOutput` that fulfils them, per the fixed output
/// envelope in spec.md S4.2.
#[derive(Debug, Clone)]
pub struct ActivityInput {
    pub name: String,
    pub plugin: String,
    pub config: HashMap<String, Value>,
    /// Current `runtime` mapping (mutable scope), read-only to the plugin.
    pub state: HashMap<String, String>,
    pub vars: HashMap<String, Value>,
    pub env: HashMap<String, String>,
    pub saves: Vec<SaveRule>,
    pub assertions: Vec<Assertion>,
}

/// Outcome of evaluating one `Assertion` against a plugin's raw result.
#[derive(Debug, Clone)]
pub struct AssertionResult {
    pub kind: AssertionKind,
    pub name: Option<String>,
    pub passed: bool,
    pub message: String,
}

impl AssertionResult {
    pub fn pass(assertion: &Assertion) -> Self {
        Self {
            kind: assertion.kind,
            name: assertion.name.clone(),
            passed: true,
            message: format!("{} assertion passed", assertion.kind),
        }
    }

    pub fn fail(assertion: &Assertion, message: impl Into<String>) -> Self {
        Self {
            kind: assertion.kind,
            name: assertion.name.clone(),
            passed: false,
            message: message.into(),
        }
    }
}

/// What a plugin returns on success: keys to merge into `runtime`
/// (last-writer-wins within a step), any log lines to forward, and the
/// outcome of every assertion it was asked to evaluate.
#[derive(Debug, Clone, Default)]
pub struct ActivityOutput {
    pub saved: HashMap<String, String>,
    pub logs: Vec<LogLine>,
    pub assertions: Vec<AssertionResult>,
}

impl ActivityOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_saved(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.saved.insert(key.into(), value.into());
        self
    }

    pub fn with_log(mut self, log: LogLine) -> Self {
        self.logs.push(log);
        self
    }

    pub fn with_assertion(mut self, result: AssertionResult) -> Self {
        self.assertions.push(result);
        self
    }

    /// An assertion-typed failure is the one case the workflow runtime never
    /// retries (spec.md S4.4/S7), so callers check this before deciding policy.
    pub fn any_assertion_failed(&self) -> bool {
        self.assertions.iter().any(|a| !a.passed)
    }
}

/// One step-type executor. A plugin is stateless across invocations; any
/// state it needs (HTTP client, DB pool) lives behind `Arc` inside the impl.
#[async_trait]
pub trait Activity: Send + Sync {
    /// The lowercase `plugin:` string this activity answers to (spec.md S4.2).
    fn plugin_type(&self) -> &'static str;

    /// Run the step. Implementations must: resolve templates in the fields
    /// they consume, respect cancellation via the surrounding task, and be
    /// idempotent whenever the operation allows it (at-least-once execution).
    async fn execute(&self, input: ActivityInput) -> Result<ActivityOutput>;
}
