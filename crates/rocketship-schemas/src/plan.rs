// Suite plan types
//
// A Suite is immutable once parsed by the planner (rocketship-core::planner).
// Nothing downstream of the planner ever mutates a Suite/Test/Step - the
// workflow runtime only reads them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A suite: the top-level YAML unit, a named collection of tests sharing `vars`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suite {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub vars: HashMap<String, Value>,
    #[serde(default)]
    pub openapi: Option<OpenApiRef>,
    pub tests: Vec<Test>,
}

/// Reference to an OpenAPI spec used for request validation/codegen hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenApiRef {
    pub spec: String,
    #[serde(default)]
    pub cache_ttl: Option<String>,
}

/// An ordered list of steps executed as a single durable child workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Test {
    pub name: String,
    pub steps: Vec<Step>,
}

/// One plugin invocation plus optional save/assertion rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub plugin: String,
    #[serde(default)]
    pub config: HashMap<String, Value>,
    #[serde(default)]
    pub save: Vec<SaveRule>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    /// Optional per-step timeout (e.g. "30s"); defaults are plugin-specific.
    #[serde(default)]
    pub timeout: Option<String>,
}

/// Where a saved value comes from and what runtime key it is bound to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveRule {
    #[serde(default)]
    pub json_path: Option<String>,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(rename = "as")]
    pub as_name: String,
}

impl SaveRule {
    pub fn source(&self) -> SaveSource<'_> {
        match (&self.json_path, &self.header) {
            (Some(path), _) => SaveSource::JsonPath(path),
            (None, Some(header)) => SaveSource::Header(header),
            (None, None) => SaveSource::Runtime,
        }
    }
}

/// Resolved view of [`SaveRule`] - which extraction strategy applies.
#[derive(Debug, Clone, Copy)]
pub enum SaveSource<'a> {
    JsonPath(&'a str),
    Header(&'a str),
    Runtime,
}

/// A check run against a step's activity output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assertion {
    #[serde(rename = "type")]
    pub kind: AssertionKind,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub expected: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionKind {
    StatusCode,
    Header,
    JsonPath,
    Expr,
}

impl std::fmt::Display for AssertionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssertionKind::StatusCode => write!(f, "status_code"),
            AssertionKind::Header => write!(f, "header"),
            AssertionKind::JsonPath => write!(f, "json_path"),
            AssertionKind::Expr => write!(f, "expr"),
        }
    }
}

impl Suite {
    /// Every step's `plugin` value across every test, in declaration order.
    pub fn plugin_names(&self) -> impl Iterator<Item = &str> {
        self.tests
            .iter()
            .flat_map(|t| t.steps.iter())
            .map(|s| s.plugin.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_rule_prefers_json_path_over_header() {
        let rule = SaveRule {
            json_path: Some("$.id".into()),
            header: Some("X-Id".into()),
            as_name: "id".into(),
        };
        assert!(matches!(rule.source(), SaveSource::JsonPath("$.id")));
    }

    #[test]
    fn save_rule_falls_back_to_runtime() {
        let rule = SaveRule {
            json_path: None,
            header: None,
            as_name: "id".into(),
        };
        assert!(matches!(rule.source(), SaveSource::Runtime));
    }
}
