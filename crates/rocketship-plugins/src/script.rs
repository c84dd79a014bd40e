// `script` plugin - `language: javascript` runs on an embedded engine,
// `language: shell` runs as a child process. Both get `save()`/`assert()`
// injected and honor a caller-supplied timeout (spec.md S4.2 table).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use boa_engine::object::builtins::JsArray;
use boa_engine::property::Attribute;
use boa_engine::{js_string, Context, JsResult, JsValue, NativeFunction, Source};
use rocketship_core::error::{Result, RocketshipError};
use rocketship_core::plugin::{Activity, ActivityInput, ActivityOutput, AssertionResult};
use rocketship_schemas::{AssertionKind, LogLine};
use serde_json::Value;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, serde::Deserialize)]
struct ScriptConfig {
    language: Language,
    #[serde(default)]
    inline: Option<String>,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    timeout: Option<String>,
}

#[derive(Debug, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum Language {
    Javascript,
    Shell,
}

#[derive(Default)]
pub struct ScriptActivity;

#[async_trait]
impl Activity for ScriptActivity {
    fn plugin_type(&self) -> &'static str {
        "script"
    }

    async fn execute(&self, input: ActivityInput) -> Result<ActivityOutput> {
        let config = parse_config(&input.config)?;
        let source = load_source(&config)?;
        let timeout = match &config.timeout {
            Some(raw) => crate::delay::parse_duration(raw)?,
            None => DEFAULT_TIMEOUT,
        };

        let outcome = match config.language {
            Language::Javascript => {
                tokio::time::timeout(
                    timeout,
                    run_javascript(source, input.state.clone(), input.vars.clone(), input.env.clone()),
                )
                .await
                .map_err(|_| RocketshipError::transient("script timed out".to_string()))??
            }
            Language::Shell => {
                tokio::time::timeout(timeout, run_shell(source, &input.state, &input.vars, &input.env))
                    .await
                    .map_err(|_| RocketshipError::transient("script timed out".to_string()))??
            }
        };

        if outcome.assertions.iter().any(|a| !a.passed) {
            let failed: Vec<&str> = outcome
                .assertions
                .iter()
                .filter(|a| !a.passed)
                .map(|a| a.message.as_str())
                .collect();
            return Err(RocketshipError::assertion_failed(failed.join("; ")));
        }

        Ok(outcome)
    }
}

fn parse_config(raw: &HashMap<String, Value>) -> Result<ScriptConfig> {
    let value = Value::Object(raw.clone().into_iter().collect());
    serde_json::from_value(value)
        .map_err(|e| RocketshipError::plugin_config_invalid("script", e.to_string()))
}

fn load_source(config: &ScriptConfig) -> Result<String> {
    match (&config.inline, &config.file) {
        (Some(inline), _) => Ok(inline.clone()),
        (None, Some(path)) => std::fs::read_to_string(path)
            .map_err(|e| RocketshipError::plugin_config_invalid("script", format!("reading {path}: {e}"))),
        (None, None) => Err(RocketshipError::plugin_config_invalid(
            "script",
            "one of 'inline' or 'file' is required",
        )),
    }
}

/// Host-side accumulator the injected `save()`/`assert()` JS functions write into.
#[derive(Default)]
struct ScriptHost {
    saved: HashMap<String, String>,
    assertions: Vec<AssertionResult>,
}

async fn run_javascript(
    source: String,
    state: HashMap<String, String>,
    vars: HashMap<String, Value>,
    env: HashMap<String, String>,
) -> Result<ActivityOutput> {
    // boa_engine is not Send; run it on a blocking thread so it never crosses
    // an await point inside the async runtime.
    tokio::task::spawn_blocking(move || run_javascript_blocking(&source, &state, &vars, &env))
        .await
        .map_err(|e| RocketshipError::Internal(anyhow::anyhow!("script task panicked: {e}")))?
}

fn run_javascript_blocking(
    source: &str,
    state: &HashMap<String, String>,
    vars: &HashMap<String, Value>,
    env: &HashMap<String, String>,
) -> Result<ActivityOutput> {
    let host = Rc::new(RefCell::new(ScriptHost::default()));
    let mut context = Context::default();

    let state_array = JsArray::new(&mut context);
    for (key, value) in state {
        state_array
            .set(js_string!(key.clone()), js_string!(value.clone()), true, &mut context)
            .map_err(js_error("state"))?;
    }
    context
        .register_global_property(js_string!("state"), state_array, Attribute::all())
        .map_err(js_error("state"))?;

    // `vars`/`env` are injected as plain JSON globals rather than built up
    // through boa's object API field by field - vars carries arbitrary
    // JSON values, so this reuses serde_json's encoder instead of writing a
    // second JSON-to-JsValue converter.
    let vars_json = serde_json::to_string(vars).unwrap_or_else(|_| "{}".to_string());
    let env_json = serde_json::to_string(env).unwrap_or_else(|_| "{}".to_string());
    context
        .eval(Source::from_bytes(&format!(
            "var vars = {vars_json}; var env = {env_json};"
        )))
        .map_err(|e| RocketshipError::plugin_config_invalid("script", format!("vars/env: {e}")))?;

    let save_host = host.clone();
    context
        .register_global_callable(
            js_string!("save"),
            2,
            NativeFunction::from_copy_closure(move |_this, args, _ctx| {
                let key = arg_as_string(args, 0);
                let value = arg_as_string(args, 1);
                save_host.borrow_mut().saved.insert(key, value);
                Ok(JsValue::undefined())
            }),
        )
        .map_err(js_error("save"))?;

    let assert_host = host.clone();
    context
        .register_global_callable(
            js_string!("assert"),
            2,
            NativeFunction::from_copy_closure(move |_this, args, _ctx| {
                let condition = args.first().map(|v| v.to_boolean()).unwrap_or(false);
                let message = arg_as_string(args, 1);
                assert_host.borrow_mut().assertions.push(AssertionResult {
                    kind: AssertionKind::Expr,
                    name: None,
                    passed: condition,
                    message,
                });
                Ok(JsValue::undefined())
            }),
        )
        .map_err(js_error("assert"))?;

    context
        .eval(Source::from_bytes(source))
        .map_err(|e| RocketshipError::assertion_failed(format!("script error: {e}")))?;

    let host = Rc::try_unwrap(host)
        .map_err(|_| RocketshipError::Internal(anyhow::anyhow!("script host still borrowed")))?
        .into_inner();

    let mut output = ActivityOutput::new();
    output.saved = host.saved;
    output.assertions = host.assertions;
    Ok(output)
}

fn arg_as_string(args: &[JsValue], index: usize) -> String {
    args.get(index)
        .and_then(|v| v.as_string())
        .map(|s| s.to_std_string_escaped())
        .unwrap_or_default()
}

fn js_error(what: &'static str) -> impl FnOnce(boa_engine::JsError) -> RocketshipError {
    move |e| RocketshipError::plugin_config_invalid("script", format!("{what}: {e}"))
}

/// Renders a `vars` value as an env var: strings pass through unquoted,
/// everything else is JSON-encoded.
fn value_to_env_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

async fn run_shell(
    source: String,
    state: &HashMap<String, String>,
    vars: &HashMap<String, Value>,
    env: &HashMap<String, String>,
) -> Result<ActivityOutput> {
    let mut command = tokio::process::Command::new("sh");
    command.arg("-c").arg(&source);
    for (key, value) in state {
        command.env(format!("ROCKETSHIP_{key}"), value);
    }
    for (key, value) in vars {
        command.env(format!("ROCKETSHIP_VAR_{key}"), value_to_env_string(value));
    }
    for (key, value) in env {
        command.env(format!("ROCKETSHIP_ENV_{key}"), value);
    }

    let output = command
        .output()
        .await
        .map_err(|e| RocketshipError::transient(format!("spawning shell script: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut result = ActivityOutput::new();
    if !stdout.is_empty() {
        result.logs.push(LogLine::new(uuid::Uuid::nil(), "script", stdout));
    }

    if !output.status.success() {
        return Err(RocketshipError::assertion_failed(format!(
            "shell script exited with {}: {stderr}",
            output.status
        )));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shell_nonzero_exit_is_fatal() {
        let err = run_shell("exit 1".to_string(), &HashMap::new(), &HashMap::new(), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RocketshipError::AssertionFailed(_)));
    }

    #[tokio::test]
    async fn shell_captures_stdout_as_log() {
        let output = run_shell(
            "echo hello".to_string(),
            &HashMap::new(),
            &HashMap::new(),
            &HashMap::new(),
        )
        .await
        .unwrap();
        assert_eq!(output.logs.len(), 1);
        assert!(output.logs[0].msg.contains("hello"));
    }

    #[tokio::test]
    async fn shell_exposes_vars_and_env() {
        let mut vars = HashMap::new();
        vars.insert("greeting".to_string(), Value::String("hi".to_string()));
        let mut env = HashMap::new();
        env.insert("TOKEN".to_string(), "secret".to_string());

        let output = run_shell(
            "echo \"$ROCKETSHIP_VAR_greeting $ROCKETSHIP_ENV_TOKEN\"".to_string(),
            &HashMap::new(),
            &vars,
            &env,
        )
        .await
        .unwrap();
        assert!(output.logs[0].msg.contains("hi secret"));
    }

    #[test]
    fn javascript_save_and_assert_populate_output() {
        let output = run_javascript_blocking(
            "save('greeting', 'hi'); assert(1 + 1 === 2, 'math works');",
            &HashMap::new(),
            &HashMap::new(),
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(output.saved.get("greeting"), Some(&"hi".to_string()));
        assert_eq!(output.assertions.len(), 1);
        assert!(output.assertions[0].passed);
    }

    #[test]
    fn javascript_reads_injected_vars_and_env() {
        let mut vars = HashMap::new();
        vars.insert("limit".to_string(), Value::Number(3.into()));
        let mut env = HashMap::new();
        env.insert("API_KEY".to_string(), "xyz".to_string());

        let output = run_javascript_blocking(
            "assert(vars.limit === 3, 'vars visible'); assert(env.API_KEY === 'xyz', 'env visible');",
            &HashMap::new(),
            &vars,
            &env,
        )
        .unwrap();
        assert_eq!(output.assertions.len(), 2);
        assert!(output.assertions.iter().all(|a| a.passed));
    }
}
