// Suite planner - parses YAML bytes into an immutable Suite plan (spec.md S4.3).
//
// Validation happens once, at parse time, so nothing downstream (workflow
// runtime, activities) ever observes a malformed plan:
//   - test names are unique within the suite
//   - every step names a known plugin
//   - `save.as` names are unique within a test
//   - template syntax is well-formed (braces balanced; free variables are
//     NOT checked here - those are per-step runtime, per spec.md S4.3)

use std::collections::HashSet;

use rocketship_schemas::Suite;

use crate::error::{Result, RocketshipError};

/// Parse and validate suite YAML, producing an immutable plan.
///
/// `known_plugins` is the set of `plugin:` strings the caller's
/// [`crate::registry::PluginRegistry`] has registered; the planner rejects
/// any step naming a plugin outside that set.
pub fn plan_suite(yaml: &str, known_plugins: &[&str]) -> Result<Suite> {
    let suite: Suite = serde_yaml::from_str(yaml).map_err(|e| {
        RocketshipError::plan_invalid(format!(
            "suite YAML parse error at {}: {e}",
            location_of(&e)
        ))
    })?;

    validate(&suite, known_plugins)?;
    Ok(suite)
}

fn location_of(err: &serde_yaml::Error) -> String {
    match err.location() {
        Some(loc) => format!("line {}, column {}", loc.line(), loc.column()),
        None => "unknown location".to_string(),
    }
}

fn validate(suite: &Suite, known_plugins: &[&str]) -> Result<()> {
    if suite.tests.is_empty() {
        return Err(RocketshipError::plan_invalid(
            "suite must declare at least one test",
        ));
    }

    let mut seen_tests = HashSet::new();
    for test in &suite.tests {
        if !seen_tests.insert(test.name.as_str()) {
            return Err(RocketshipError::plan_invalid(format!(
                "duplicate test name '{}'",
                test.name
            )));
        }

        if test.steps.is_empty() {
            return Err(RocketshipError::plan_invalid(format!(
                "test '{}' has no steps",
                test.name
            )));
        }

        let mut seen_saves = HashSet::new();
        for step in &test.steps {
            if !known_plugins.contains(&step.plugin.as_str()) {
                return Err(RocketshipError::plan_invalid(format!(
                    "test '{}' step '{}' names unknown plugin '{}'",
                    test.name, step.name, step.plugin
                )));
            }

            for save in &step.save {
                if !seen_saves.insert(save.as_name.as_str()) {
                    return Err(RocketshipError::plan_invalid(format!(
                        "test '{}' has duplicate save.as '{}'",
                        test.name, save.as_name
                    )));
                }
            }

            check_template_syntax(&step.name, &test.name, &step.config)?;
        }
    }

    Ok(())
}

/// Checks brace-matching only; free variable names inside `{{ }}` are
/// per-step runtime and intentionally not validated here (spec.md S4.3).
fn check_template_syntax(
    step_name: &str,
    test_name: &str,
    config: &std::collections::HashMap<String, serde_json::Value>,
) -> Result<()> {
    for value in config.values() {
        walk_strings(value, &mut |s| balanced_braces(s, test_name, step_name))?;
    }
    Ok(())
}

fn walk_strings(
    value: &serde_json::Value,
    check: &mut impl FnMut(&str) -> Result<()>,
) -> Result<()> {
    match value {
        serde_json::Value::String(s) => check(s),
        serde_json::Value::Array(items) => {
            for item in items {
                walk_strings(item, check)?;
            }
            Ok(())
        }
        serde_json::Value::Object(map) => {
            for v in map.values() {
                walk_strings(v, check)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn balanced_braces(s: &str, test_name: &str, step_name: &str) -> Result<()> {
    let mut depth: i32 = 0;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            chars.next();
            continue;
        }
        if c == '{' && chars.peek() == Some(&'{') {
            chars.next();
            depth += 1;
        } else if c == '}' && chars.peek() == Some(&'}') {
            chars.next();
            depth -= 1;
            if depth < 0 {
                return Err(RocketshipError::plan_invalid(format!(
                    "test '{test_name}' step '{step_name}' has an unmatched '}}}}' in '{s}'"
                )));
            }
        }
    }
    if depth != 0 {
        return Err(RocketshipError::plan_invalid(format!(
            "test '{test_name}' step '{step_name}' has an unterminated template expression in '{s}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KNOWN: &[&str] = &["http", "delay", "log", "script", "sql", "browser"];

    fn suite_yaml() -> &'static str {
        r#"
name: cars suite
tests:
  - name: create and fetch
    steps:
      - name: create
        plugin: http
        config:
          method: POST
          url: /cars
        save:
          - json_path: $.id
            as: first_car_id
        assertions:
          - type: status_code
            expected: 200
      - name: fetch
        plugin: http
        config:
          method: GET
          url: "/cars/{{ first_car_id }}"
"#
    }

    #[test]
    fn parses_a_well_formed_suite() {
        let suite = plan_suite(suite_yaml(), KNOWN).unwrap();
        assert_eq!(suite.name, "cars suite");
        assert_eq!(suite.tests.len(), 1);
        assert_eq!(suite.tests[0].steps.len(), 2);
    }

    #[test]
    fn rejects_unknown_plugin() {
        let yaml = r#"
name: s
tests:
  - name: t
    steps:
      - name: step1
        plugin: not_a_real_plugin
        config: {}
"#;
        let err = plan_suite(yaml, KNOWN).unwrap_err();
        assert!(matches!(err, RocketshipError::PlanInvalid(_)));
        assert!(err.to_string().contains("not_a_real_plugin"));
    }

    #[test]
    fn rejects_duplicate_test_names() {
        let yaml = r#"
name: s
tests:
  - name: dup
    steps:
      - name: a
        plugin: log
        config: {}
  - name: dup
    steps:
      - name: b
        plugin: log
        config: {}
"#;
        let err = plan_suite(yaml, KNOWN).unwrap_err();
        assert!(err.to_string().contains("duplicate test name"));
    }

    #[test]
    fn rejects_duplicate_save_as_within_a_test() {
        let yaml = r#"
name: s
tests:
  - name: t
    steps:
      - name: a
        plugin: http
        config: {}
        save:
          - json_path: $.id
            as: x
      - name: b
        plugin: http
        config: {}
        save:
          - header: X-Id
            as: x
"#;
        let err = plan_suite(yaml, KNOWN).unwrap_err();
        assert!(err.to_string().contains("duplicate save.as"));
    }

    #[test]
    fn rejects_unterminated_template_expression() {
        let yaml = r#"
name: s
tests:
  - name: t
    steps:
      - name: a
        plugin: log
        config:
          message: "hello {{ name"
"#;
        let err = plan_suite(yaml, KNOWN).unwrap_err();
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn free_variables_are_not_checked_at_plan_time() {
        // `{{ undeclared_thing }}` is syntactically valid; whether it resolves
        // is a per-step runtime concern, not a planning-time one.
        let yaml = r#"
name: s
tests:
  - name: t
    steps:
      - name: a
        plugin: log
        config:
          message: "{{ undeclared_thing }}"
"#;
        assert!(plan_suite(yaml, KNOWN).is_ok());
    }
}
