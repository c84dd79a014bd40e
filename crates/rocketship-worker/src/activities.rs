// Step activities dispatched by TestWorkflow (spec.md S4.4).
//
// Errors are returned as tagged strings ("retryable: ..." / "fatal: ...")
// rather than a typed error, matching spec.md S7's "propagated as tagged
// values, not type names" and letting the workflow branch on the tag alone
// without importing rocketship_core::RocketshipError into its deterministic
// replay path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rocketship_core::dsl::{resolve, VarsEnv};
use rocketship_core::error::RocketshipError;
use rocketship_core::plugin::ActivityInput as PluginActivityInput;
use rocketship_core::PluginRegistry;
use rocketship_schemas::{Assertion, LogLine, SaveRule};
use serde_json::Value;

pub mod activity_types {
    pub const TEMPLATE_RESOLVER: &str = "TemplateResolverActivity";
    pub const PLUGIN_DISPATCH: &str = "PluginDispatchActivity";
    pub const STEP_REPORTER: &str = "StepReporterActivity";
    pub const SUITE_CLEANUP: &str = "SuiteCleanupActivity";
}

/// Where a `StepReporterActivity` forwards logs/assertion outcomes. The
/// engine implements this directly against its log broker + store; a
/// Temporal-mode worker process implements it as an `AddLog` gRPC client, so
/// this crate never depends on either.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn add_log(&self, line: LogLine) -> anyhow::Result<()>;
    async fn record_assertions(
        &self,
        run_id: uuid::Uuid,
        test_name: &str,
        step_name: &str,
        assertions: &[rocketship_core::plugin::AssertionResult],
    ) -> anyhow::Result<()>;
}

/// Everything a running activity needs, built once at worker startup.
pub struct ActivityContext {
    pub registry: Arc<PluginRegistry>,
    pub log_sink: Arc<dyn LogSink>,
    pub run_dir: PathBuf,
}

fn retryable(msg: impl std::fmt::Display) -> String {
    format!("retryable: {msg}")
}

fn fatal(msg: impl std::fmt::Display) -> String {
    format!("fatal: {msg}")
}

/// Resolves `step.config` against `(runtime, vars, env)`. Pure and short;
/// the workflow retries this only on the "retryable:" tag (internal error).
pub async fn resolve_template_activity(input: Value) -> Result<Value, String> {
    let config: HashMap<String, Value> = serde_json::from_value(input["config"].clone())
        .map_err(|e| retryable(format!("decoding step config: {e}")))?;
    let runtime: HashMap<String, String> = serde_json::from_value(input["runtime"].clone())
        .unwrap_or_default();
    let vars: HashMap<String, Value> = serde_json::from_value(input["vars"].clone())
        .unwrap_or_default();
    let env: HashMap<String, String> = serde_json::from_value(input["env"].clone())
        .unwrap_or_default();
    let scope = VarsEnv::new(&vars, &env, &runtime);

    let mut resolved = serde_json::Map::new();
    for (key, value) in config {
        resolved.insert(key, resolve_value(&value, &scope).map_err(|e| fatal(e))?);
    }
    Ok(Value::Object(resolved))
}

fn resolve_value(
    value: &Value,
    scope: &VarsEnv<'_>,
) -> Result<Value, RocketshipError> {
    match value {
        Value::String(s) => Ok(Value::String(resolve(s, scope)?)),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_value(item, scope)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, scope)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Dispatches a step to its registered `Activity` implementation.
pub async fn plugin_dispatch_activity(ctx: &ActivityContext, input: Value) -> Result<Value, String> {
    let plugin = input["plugin"]
        .as_str()
        .ok_or_else(|| fatal("missing 'plugin' field"))?;
    let activity = ctx
        .registry
        .get(plugin)
        .ok_or_else(|| fatal(format!("no activity registered for plugin '{plugin}'")))?;

    let config: HashMap<String, Value> = serde_json::from_value(input["config"].clone()).unwrap_or_default();
    let state: HashMap<String, String> = serde_json::from_value(input["state"].clone()).unwrap_or_default();
    let vars: HashMap<String, Value> = serde_json::from_value(input["vars"].clone()).unwrap_or_default();
    let env: HashMap<String, String> = serde_json::from_value(input["env"].clone()).unwrap_or_default();
    let saves: Vec<SaveRule> = serde_json::from_value(input["saves"].clone()).unwrap_or_default();
    let assertions: Vec<Assertion> = serde_json::from_value(input["assertions"].clone()).unwrap_or_default();
    let name = input["name"].as_str().unwrap_or_default().to_string();

    let plugin_input = PluginActivityInput {
        name,
        plugin: plugin.to_string(),
        config,
        state,
        vars,
        env,
        saves,
        assertions,
    };

    let output = activity.execute(plugin_input).await.map_err(|e| match &e {
        RocketshipError::Transient(_) => retryable(e),
        _ => fatal(e),
    })?;

    Ok(serde_json::json!({
        "saved": output.saved,
        "logs": output.logs,
        "assertions": output
            .assertions
            .iter()
            .map(|a| serde_json::json!({
                "kind": a.kind.to_string(),
                "name": a.name,
                "passed": a.passed,
                "message": a.message,
            }))
            .collect::<Vec<_>>(),
    }))
}

/// Forwards a step's logs and records its assertion outcomes.
pub async fn step_reporter_activity(ctx: &ActivityContext, input: Value) -> Result<Value, String> {
    let run_id: uuid::Uuid = serde_json::from_value(input["run_id"].clone())
        .map_err(|e| fatal(format!("bad run_id: {e}")))?;
    let test_name = input["test_name"].as_str().unwrap_or_default();
    let step_name = input["step_name"].as_str().unwrap_or_default();

    if let Some(logs) = input.get("logs").and_then(|v| v.as_array()) {
        for raw in logs {
            if let Ok(mut line) = serde_json::from_value::<LogLine>(raw.clone()) {
                // Plugins construct `LogLine`s with a nil run id (they don't
                // know it); stamp the real identity on the way out so the
                // broker keys the line under the subscriber's actual run_id.
                line.run_id = run_id;
                line.test_name = Some(test_name.to_string());
                line.step_name = Some(step_name.to_string());
                ctx.log_sink
                    .add_log(line)
                    .await
                    .map_err(|e| retryable(format!("forwarding log: {e}")))?;
            }
        }
    }

    if let Some(assertions) = input.get("assertions").and_then(|v| v.as_array()) {
        let parsed: Vec<rocketship_core::plugin::AssertionResult> = assertions
            .iter()
            .filter_map(|a| {
                Some(rocketship_core::plugin::AssertionResult {
                    kind: serde_json::from_value(a.get("kind")?.clone()).ok()?,
                    name: a.get("name").and_then(|n| n.as_str()).map(String::from),
                    passed: a.get("passed")?.as_bool()?,
                    message: a.get("message")?.as_str()?.to_string(),
                })
            })
            .collect();
        ctx.log_sink
            .record_assertions(run_id, test_name, step_name, &parsed)
            .await
            .map_err(|e| retryable(format!("recording assertions: {e}")))?;
    }

    Ok(Value::Null)
}

/// Compensation run after every test in a suite completes, regardless of
/// outcome (spec.md S4.4). Removes ephemeral per-run browser session files.
pub async fn suite_cleanup_activity(ctx: &ActivityContext, input: Value) -> Result<Value, String> {
    let run_id: uuid::Uuid = serde_json::from_value(input["run_id"].clone())
        .map_err(|e| fatal(format!("bad run_id: {e}")))?;

    let sessions_dir = ctx.run_dir.join("tmp/browser_sessions");
    if sessions_dir.exists() {
        if let Ok(entries) = std::fs::read_dir(&sessions_dir) {
            for entry in entries.flatten() {
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }

    tracing::info!(%run_id, "suite cleanup complete");
    Ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_templated_fields_against_runtime() {
        let input = serde_json::json!({
            "config": {"url": "/cars/{{ id }}"},
            "runtime": {"id": "42"},
            "vars": {},
            "env": {},
        });
        let resolved = resolve_template_activity(input).await.unwrap();
        assert_eq!(resolved["url"], "/cars/42");
    }

    #[tokio::test]
    async fn unresolvable_template_is_a_fatal_error() {
        let input = serde_json::json!({
            "config": {"url": "/cars/{{ missing }}"},
            "runtime": {},
            "vars": {},
            "env": {},
        });
        let err = resolve_template_activity(input).await.unwrap_err();
        assert!(err.starts_with("fatal:"));
        assert!(err.contains("missing"));
    }
}
