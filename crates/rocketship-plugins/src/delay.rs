// `delay` plugin - registry marker only.
//
// spec.md S4.2/S4.4: delay has no activity execution; the workflow runtime
// sleeps via a durable timer itself so the sleep survives a worker restart.
// This type exists purely so the planner's known-plugin check (spec.md S4.3)
// accepts `plugin: delay` in suite YAML; its `execute` is never invoked by
// `TestWorkflow`, which special-cases `plugin == "delay"` before dispatch.

use async_trait::async_trait;
use rocketship_core::error::{Result, RocketshipError};
use rocketship_core::plugin::{Activity, ActivityInput, ActivityOutput};

#[derive(Default)]
pub struct DelayActivity;

#[async_trait]
impl Activity for DelayActivity {
    fn plugin_type(&self) -> &'static str {
        "delay"
    }

    async fn execute(&self, _input: ActivityInput) -> Result<ActivityOutput> {
        Err(RocketshipError::plugin_config_invalid(
            "delay",
            "delay steps are executed by the workflow runtime directly, not dispatched to an activity",
        ))
    }
}

/// Parses the step's `duration` field into a `std::time::Duration`. The
/// workflow runtime calls this directly (not through `Activity::execute`)
/// when it special-cases a `delay` step.
pub fn parse_duration(raw: &str) -> Result<std::time::Duration> {
    humantime_parse(raw)
        .map_err(|e| RocketshipError::plugin_config_invalid("delay", format!("bad duration '{raw}': {e}")))
}

fn humantime_parse(raw: &str) -> std::result::Result<std::time::Duration, String> {
    let raw = raw.trim();
    let split_at = raw
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("'{raw}' has no unit"))?;
    let (number, unit) = raw.split_at(split_at);
    let value: u64 = number
        .parse()
        .map_err(|_| format!("'{number}' is not a number"))?;
    let seconds = match unit {
        "s" => value,
        "ms" => return Ok(std::time::Duration::from_millis(value)),
        "m" => value * 60,
        "h" => value * 3600,
        other => return Err(format!("unsupported duration unit '{other}'")),
    };
    Ok(std::time::Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seconds_minutes_hours_and_millis() {
        assert_eq!(parse_duration("60s").unwrap(), std::time::Duration::from_secs(60));
        assert_eq!(parse_duration("2m").unwrap(), std::time::Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), std::time::Duration::from_secs(3600));
        assert_eq!(parse_duration("500ms").unwrap(), std::time::Duration::from_millis(500));
    }

    #[test]
    fn rejects_unsupported_unit() {
        assert!(parse_duration("5d").is_err());
    }
}
