// Template DSL - `{{ ... }}` resolution against a scoped value environment.
//
// Grammar (spec.md S4.1):
//   expr := "{{" WS? ref WS? "}}"
//   ref  := key                      -- lookup in `runtime`
//         | ".vars." path            -- dotted path in `vars`
//         | ".env." KEY               -- lookup in `env`
//         | ".runtime." path         -- dotted path in `runtime` (JSON-decoded)
//   escaped \{{ ... }} passes through literally, the leading backslash consumed.
//
// Resolution is left-to-right, single-pass: the output of a resolved
// expression is never re-scanned for further `{{ }}` (testable property #1/#2,
// and the thing that keeps this from being an injection vector).

use std::collections::HashMap;

use serde_json::Value;

use crate::error::RocketshipError;

/// The three scopes a template expression can read from (spec.md S3).
pub struct VarsEnv<'a> {
    pub vars: &'a HashMap<String, Value>,
    pub env: &'a HashMap<String, String>,
    pub runtime: &'a HashMap<String, String>,
}

impl<'a> VarsEnv<'a> {
    pub fn new(
        vars: &'a HashMap<String, Value>,
        env: &'a HashMap<String, String>,
        runtime: &'a HashMap<String, String>,
    ) -> Self {
        Self { vars, env, runtime }
    }
}

/// Resolve every `{{ ... }}` expression in `input` against `scope`.
///
/// Pure and idempotent on input without `{{` (testable property #1): a string
/// that never opens an expression is returned unchanged.
pub fn resolve(input: &str, scope: &VarsEnv<'_>) -> Result<String, RocketshipError> {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && input[i..].starts_with("\\{{") {
            // Escaped expression: consume the backslash, copy the rest literally
            // up to (and including) the matching "}}".
            let rest = &input[i + 1..];
            if let Some(end) = rest.find("}}") {
                out.push_str(&rest[..end + 2]);
                i += 1 + end + 2;
            } else {
                out.push_str(rest);
                i = input.len();
            }
            continue;
        }

        if input[i..].starts_with("{{") {
            let rest = &input[i + 2..];
            let end = rest.find("}}").ok_or_else(|| {
                RocketshipError::plan_invalid(format!(
                    "unterminated template expression in '{input}'"
                ))
            })?;
            let raw_ref = rest[..end].trim();
            let value = resolve_ref(raw_ref, scope)?;
            out.push_str(&value);
            i += 2 + end + 2;
            continue;
        }

        let ch_len = input[i..].chars().next().map(char::len_utf8).unwrap_or(1);
        out.push_str(&input[i..i + ch_len]);
        i += ch_len;
    }

    Ok(out)
}

fn resolve_ref(raw_ref: &str, scope: &VarsEnv<'_>) -> Result<String, RocketshipError> {
    if let Some(path) = raw_ref.strip_prefix(".vars.") {
        let value = lookup_dotted(scope.vars, path).ok_or_else(|| {
            RocketshipError::template_undefined(
                format!(".vars.{path}"),
                &sorted_keys(scope.vars.keys()),
            )
        })?;
        return Ok(stringify(value));
    }

    if let Some(key) = raw_ref.strip_prefix(".env.") {
        let value = scope.env.get(key).ok_or_else(|| {
            RocketshipError::template_undefined(
                format!(".env.{key}"),
                &sorted_keys(scope.env.keys()),
            )
        })?;
        return Ok(value.clone());
    }

    if let Some(path) = raw_ref.strip_prefix(".runtime.") {
        return resolve_runtime_path(path, scope.runtime);
    }

    // Bare key: lookup in `runtime`.
    scope.runtime.get(raw_ref).cloned().ok_or_else(|| {
        RocketshipError::template_undefined(raw_ref, &sorted_keys(scope.runtime.keys()))
    })
}

fn resolve_runtime_path(
    path: &str,
    runtime: &HashMap<String, String>,
) -> Result<String, RocketshipError> {
    let mut segments = path.split('.');
    let head = segments.next().unwrap_or(path);

    let raw = runtime.get(head).ok_or_else(|| {
        RocketshipError::template_undefined(
            format!(".runtime.{path}"),
            &sorted_keys(runtime.keys()),
        )
    })?;

    let remainder: Vec<&str> = segments.collect();
    if remainder.is_empty() {
        return Ok(raw.clone());
    }

    // The stored value may be JSON (an object/array saved by a previous step);
    // decode on demand and navigate the rest of the dotted path into it.
    let decoded: Value = serde_json::from_str(raw).map_err(|_| {
        RocketshipError::template_undefined(format!(".runtime.{path}"), &sorted_keys(runtime.keys()))
    })?;
    let value = lookup_dotted_value(&decoded, &remainder).ok_or_else(|| {
        RocketshipError::template_undefined(format!(".runtime.{path}"), &sorted_keys(runtime.keys()))
    })?;
    Ok(stringify(value))
}

fn lookup_dotted<'a>(map: &'a HashMap<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let head = segments.next()?;
    let first = map.get(head)?;
    let remainder: Vec<&str> = segments.collect();
    if remainder.is_empty() {
        Some(first)
    } else {
        lookup_dotted_value(first, &remainder)
    }
}

fn lookup_dotted_value<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |acc, key| acc.get(key))
}

/// Non-string scalars stringify via default decimal/JSON formatting (spec.md S4.1 (b)).
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn sorted_keys<'a>(keys: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut out: Vec<String> = keys.cloned().collect();
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_fixture() -> (
        HashMap<String, Value>,
        HashMap<String, String>,
        HashMap<String, String>,
    ) {
        let mut vars = HashMap::new();
        vars.insert("name".to_string(), Value::String("toyota".into()));
        vars.insert(
            "nested".to_string(),
            serde_json::json!({"make": "toyota", "year": 2024}),
        );

        let mut env = HashMap::new();
        env.insert("API_KEY".to_string(), "secret".to_string());

        let mut runtime = HashMap::new();
        runtime.insert("first_car_id".to_string(), "42".to_string());
        runtime.insert(
            "last_response".to_string(),
            serde_json::json!({"id": "7", "status": "ok"}).to_string(),
        );

        (vars, env, runtime)
    }

    #[test]
    fn idempotent_on_plain_strings() {
        let (vars, env, runtime) = env_fixture();
        let scope = VarsEnv::new(&vars, &env, &runtime);
        let s = "just a plain string with no expressions";
        assert_eq!(resolve(s, &scope).unwrap(), s);
    }

    #[test]
    fn resolves_bare_runtime_key() {
        let (vars, env, runtime) = env_fixture();
        let scope = VarsEnv::new(&vars, &env, &runtime);
        assert_eq!(
            resolve("/cars/{{ first_car_id }}", &scope).unwrap(),
            "/cars/42"
        );
    }

    #[test]
    fn resolves_dotted_vars_path() {
        let (vars, env, runtime) = env_fixture();
        let scope = VarsEnv::new(&vars, &env, &runtime);
        assert_eq!(
            resolve("{{ .vars.nested.make }}", &scope).unwrap(),
            "toyota"
        );
    }

    #[test]
    fn resolves_env_key() {
        let (vars, env, runtime) = env_fixture();
        let scope = VarsEnv::new(&vars, &env, &runtime);
        assert_eq!(resolve("{{ .env.API_KEY }}", &scope).unwrap(), "secret");
    }

    #[test]
    fn resolves_runtime_dotted_json() {
        let (vars, env, runtime) = env_fixture();
        let scope = VarsEnv::new(&vars, &env, &runtime);
        assert_eq!(
            resolve("{{ .runtime.last_response.status }}", &scope).unwrap(),
            "ok"
        );
    }

    #[test]
    fn escaped_expression_passes_through_literally() {
        let (vars, env, runtime) = env_fixture();
        let scope = VarsEnv::new(&vars, &env, &runtime);
        assert_eq!(
            resolve("\\{{ not_a_var }}", &scope).unwrap(),
            "{{ not_a_var }}"
        );
    }

    #[test]
    fn unknown_key_lists_available_runtime_keys() {
        let (vars, env, runtime) = env_fixture();
        let scope = VarsEnv::new(&vars, &env, &runtime);
        let err = resolve("{{ missing_key }}", &scope).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("missing_key"));
        assert!(msg.contains("first_car_id"));
        assert!(msg.contains("last_response"));
    }

    #[test]
    fn unknown_key_with_empty_runtime_lists_nothing() {
        let vars = HashMap::new();
        let env = HashMap::new();
        let runtime = HashMap::new();
        let scope = VarsEnv::new(&vars, &env, &runtime);
        let err = resolve("{{ missing_key }}", &scope).unwrap_err();
        assert!(matches!(
            err,
            RocketshipError::TemplateUndefined { ref key, ref available }
                if key == "missing_key" && available.is_empty()
        ));
    }

    #[test]
    fn determinism_repeated_resolution_same_bytes() {
        let (vars, env, runtime) = env_fixture();
        let scope = VarsEnv::new(&vars, &env, &runtime);
        let s = "id={{ first_car_id }} key={{ .env.API_KEY }}";
        let a = resolve(s, &scope).unwrap();
        let b = resolve(s, &scope).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn output_is_not_re_expanded() {
        let mut vars = HashMap::new();
        vars.insert("injected".to_string(), Value::String("{{ first_car_id }}".into()));
        let env = HashMap::new();
        let mut runtime = HashMap::new();
        runtime.insert("first_car_id".to_string(), "42".to_string());
        let scope = VarsEnv::new(&vars, &env, &runtime);
        let out = resolve("{{ .vars.injected }}", &scope).unwrap();
        assert_eq!(out, "{{ first_car_id }}");
    }

    #[test]
    fn numbers_stringify_via_default_formatting() {
        let mut vars = HashMap::new();
        vars.insert("count".to_string(), serde_json::json!(3));
        let env = HashMap::new();
        let runtime = HashMap::new();
        let scope = VarsEnv::new(&vars, &env, &runtime);
        assert_eq!(resolve("{{ .vars.count }}", &scope).unwrap(), "3");
    }
}
