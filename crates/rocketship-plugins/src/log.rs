// `log` plugin - resolve the message template and emit one log line
// (spec.md S4.2 table: color "n/a" i.e. `LogColor::None`, bold false).

use async_trait::async_trait;
use rocketship_core::error::{Result, RocketshipError};
use rocketship_core::plugin::{Activity, ActivityInput, ActivityOutput};
use rocketship_schemas::LogLine;
use uuid::Uuid;

#[derive(Default)]
pub struct LogActivity;

#[async_trait]
impl Activity for LogActivity {
    fn plugin_type(&self) -> &'static str {
        "log"
    }

    async fn execute(&self, input: ActivityInput) -> Result<ActivityOutput> {
        let message = input
            .config
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                RocketshipError::plugin_config_invalid("log", "missing required field 'message'")
            })?;

        // Template resolution already happened in TemplateResolverActivity
        // before this plugin runs (spec.md S4.4 step 1); `message` here is
        // the already-resolved string.
        let line = LogLine::new(Uuid::nil(), input.name.clone(), message.to_string());
        Ok(ActivityOutput::new().with_log(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use serde_json::Value;

    #[tokio::test]
    async fn emits_one_log_line_from_message() {
        let mut config = HashMap::new();
        config.insert("message".to_string(), Value::String("hello world".into()));
        let input = ActivityInput {
            name: "greet".into(),
            plugin: "log".into(),
            config,
            state: HashMap::new(),
            vars: HashMap::new(),
            env: HashMap::new(),
            saves: vec![],
            assertions: vec![],
        };
        let output = LogActivity.execute(input).await.unwrap();
        assert_eq!(output.logs.len(), 1);
        assert_eq!(output.logs[0].msg, "hello world");
    }

    #[tokio::test]
    async fn missing_message_is_plugin_config_invalid() {
        let input = ActivityInput {
            name: "greet".into(),
            plugin: "log".into(),
            config: HashMap::new(),
            state: HashMap::new(),
            vars: HashMap::new(),
            env: HashMap::new(),
            saves: vec![],
            assertions: vec![],
        };
        let err = LogActivity.execute(input).await.unwrap_err();
        assert!(matches!(err, rocketship_core::error::RocketshipError::PluginConfigInvalid { .. }));
    }
}
