// `http` plugin - issues an HTTP request, evaluates assertions, extracts
// `save` values via JSONPath or response header (spec.md S4.2 table).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rocketship_core::error::{Result, RocketshipError};
use rocketship_core::plugin::{Activity, ActivityInput, ActivityOutput, AssertionResult};
use rocketship_schemas::AssertionKind;
use serde_json::Value;

pub struct HttpActivity {
    client: Client,
}

impl HttpActivity {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client builds with static TLS config"),
        }
    }
}

impl Default for HttpActivity {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, serde::Deserialize)]
struct HttpConfig {
    method: String,
    url: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<Value>,
}

#[async_trait]
impl Activity for HttpActivity {
    fn plugin_type(&self) -> &'static str {
        "http"
    }

    async fn execute(&self, input: ActivityInput) -> Result<ActivityOutput> {
        let config: HttpConfig = parse_config("http", &input.config)?;

        let method: reqwest::Method = config.method.parse().map_err(|_| {
            RocketshipError::plugin_config_invalid(
                "http",
                format!("unsupported method '{}'", config.method),
            )
        })?;

        let mut request = self.client.request(method, &config.url);
        for (name, value) in &config.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &config.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RocketshipError::transient(format!("http request to {} failed: {e}", config.url)))?;

        let status = response.status().as_u16();
        let response_headers = response.headers().clone();
        let body_text = response
            .text()
            .await
            .map_err(|e| RocketshipError::transient(format!("reading response body: {e}")))?;
        let body_json: Option<Value> = serde_json::from_str(&body_text).ok();

        let mut output = ActivityOutput::new();

        for save in find_saves(&input) {
            let value = match save.source() {
                rocketship_schemas::SaveSource::JsonPath(path) => {
                    extract_json_path(body_json.as_ref(), path)?
                }
                rocketship_schemas::SaveSource::Header(name) => response_headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.to_string())
                    .ok_or_else(|| {
                        RocketshipError::assertion_failed(format!(
                            "response header '{name}' not present"
                        ))
                    })?,
                rocketship_schemas::SaveSource::Runtime => continue,
            };
            output.saved.insert(save.as_name.clone(), value);
        }

        for assertion in &input.assertions {
            let result = evaluate_assertion(assertion, status, &response_headers, body_json.as_ref());
            output.assertions.push(result);
        }

        if output.any_assertion_failed() {
            let failed: Vec<&str> = output
                .assertions
                .iter()
                .filter(|a| !a.passed)
                .map(|a| a.message.as_str())
                .collect();
            return Err(RocketshipError::assertion_failed(failed.join("; ")));
        }

        Ok(output)
    }
}

fn find_saves(input: &ActivityInput) -> &[rocketship_schemas::SaveRule] {
    &input.saves
}

fn extract_json_path(body: Option<&Value>, path: &str) -> Result<String> {
    let body = body.ok_or_else(|| {
        RocketshipError::assertion_failed(format!(
            "cannot evaluate json_path '{path}': response body is not JSON"
        ))
    })?;
    let matches = jsonpath_lib::select(body, path)
        .map_err(|e| RocketshipError::plugin_config_invalid("http", format!("bad json_path '{path}': {e}")))?;
    let first = matches.first().ok_or_else(|| {
        RocketshipError::assertion_failed(format!("json_path '{path}' matched nothing"))
    })?;
    Ok(stringify(first))
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn evaluate_assertion(
    assertion: &rocketship_schemas::Assertion,
    status: u16,
    headers: &reqwest::header::HeaderMap,
    body: Option<&Value>,
) -> AssertionResult {
    match assertion.kind {
        AssertionKind::StatusCode => {
            let expected = assertion.expected.as_u64().unwrap_or_default() as u16;
            if status == expected {
                AssertionResult::pass(assertion)
            } else {
                AssertionResult::fail(
                    assertion,
                    format!("status_code expected {expected} got {status}"),
                )
            }
        }
        AssertionKind::Header => {
            let name = assertion.path.clone().unwrap_or_default();
            let expected = assertion.expected.as_str().unwrap_or_default();
            match headers.get(&name).and_then(|v| v.to_str().ok()) {
                Some(actual) if actual == expected => AssertionResult::pass(assertion),
                Some(actual) => AssertionResult::fail(
                    assertion,
                    format!("header '{name}' expected '{expected}' got '{actual}'"),
                ),
                None => AssertionResult::fail(assertion, format!("header '{name}' not present")),
            }
        }
        AssertionKind::JsonPath => {
            let path = assertion.path.clone().unwrap_or_default();
            match body.and_then(|b| jsonpath_lib::select(b, &path).ok()) {
                Some(matches) if matches.first() == Some(&&assertion.expected) => {
                    AssertionResult::pass(assertion)
                }
                Some(matches) => AssertionResult::fail(
                    assertion,
                    format!(
                        "json_path '{path}' expected {:?} got {:?}",
                        assertion.expected,
                        matches.first()
                    ),
                ),
                None => AssertionResult::fail(assertion, format!("json_path '{path}' matched nothing")),
            }
        }
        AssertionKind::Expr => {
            // Expression assertions are evaluated by the `script` plugin's
            // embedded engine, not here; http never emits an `expr` check.
            AssertionResult::fail(assertion, "expr assertions are not supported by http".into())
        }
    }
}

fn parse_config<T: serde::de::DeserializeOwned>(
    plugin: &str,
    config: &HashMap<String, Value>,
) -> Result<T> {
    let value = Value::Object(config.clone().into_iter().collect());
    serde_json::from_value(value)
        .map_err(|e| RocketshipError::plugin_config_invalid(plugin, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocketship_schemas::{Assertion, SaveRule};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn input(url: String, assertions: Vec<Assertion>, saves: Vec<SaveRule>) -> ActivityInput {
        let mut config = HashMap::new();
        config.insert("method".to_string(), Value::String("GET".into()));
        config.insert("url".to_string(), Value::String(url));
        ActivityInput {
            name: "step".into(),
            plugin: "http".into(),
            config,
            state: HashMap::new(),
            vars: HashMap::new(),
            env: HashMap::new(),
            assertions,
            saves,
        }
    }

    #[tokio::test]
    async fn saves_json_path_value_and_passes_assertion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cars/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "42"})))
            .mount(&server)
            .await;

        let activity = HttpActivity::new();
        let assertions = vec![Assertion {
            kind: AssertionKind::StatusCode,
            path: None,
            name: None,
            expected: serde_json::json!(200),
        }];
        let saves = vec![SaveRule {
            json_path: Some("$.id".into()),
            header: None,
            as_name: "car_id".into(),
        }];
        let result = activity
            .execute(input(format!("{}/cars/42", server.uri()), assertions, saves))
            .await
            .unwrap();

        assert_eq!(result.saved.get("car_id"), Some(&"42".to_string()));
        assert!(!result.any_assertion_failed());
    }

    #[tokio::test]
    async fn status_mismatch_fails_with_assertion_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cars/42"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({"id": "42"})))
            .mount(&server)
            .await;

        let activity = HttpActivity::new();
        let assertions = vec![Assertion {
            kind: AssertionKind::StatusCode,
            path: None,
            name: None,
            expected: serde_json::json!(200),
        }];
        let err = activity
            .execute(input(format!("{}/cars/42", server.uri()), assertions, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, RocketshipError::AssertionFailed(_)));
    }
}
