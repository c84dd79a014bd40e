// `browser` plugin - drives a Chrome DevTools Protocol session described by a
// session file at `<run_dir>/tmp/browser_sessions/<session_id>.json`
// (spec.md S4.2 "Session files"):
//   - contents: `{ wsEndpoint, pid, createdAt }`
//   - reads validate both `wsEndpoint` and `pid` are present
//   - writes are atomic: temp file + rename
//   - one writer per session_id, concurrent readers allowed, removal idempotent

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use rocketship_core::error::{Result, RocketshipError};
use rocketship_core::plugin::{Activity, ActivityInput, ActivityOutput};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionFile {
    #[serde(rename = "wsEndpoint")]
    pub ws_endpoint: String,
    pub pid: u32,
    #[serde(rename = "createdAt")]
    pub created_at: chrono::DateTime<Utc>,
}

impl SessionFile {
    pub fn path(run_dir: &Path, session_id: &str) -> PathBuf {
        run_dir.join("tmp/browser_sessions").join(format!("{session_id}.json"))
    }

    /// Atomic write: serialize to a sibling temp file, then rename over the
    /// target. A reader never observes a partially-written session file.
    pub fn write(&self, run_dir: &Path, session_id: &str) -> Result<()> {
        let path = Self::path(run_dir, session_id);
        let dir = path.parent().expect("session path always has a parent");
        std::fs::create_dir_all(dir)
            .map_err(|e| RocketshipError::Internal(anyhow::anyhow!("creating {dir:?}: {e}")))?;

        let tmp = dir.join(format!(".{session_id}.json.tmp"));
        let body = serde_json::to_vec_pretty(self)
            .map_err(|e| RocketshipError::Internal(anyhow::anyhow!("serializing session file: {e}")))?;
        std::fs::write(&tmp, body)
            .map_err(|e| RocketshipError::Internal(anyhow::anyhow!("writing {tmp:?}: {e}")))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| RocketshipError::Internal(anyhow::anyhow!("renaming {tmp:?} -> {path:?}: {e}")))?;
        Ok(())
    }

    pub fn read(run_dir: &Path, session_id: &str) -> Result<Self> {
        let path = Self::path(run_dir, session_id);
        let body = std::fs::read_to_string(&path)
            .map_err(|e| RocketshipError::transient(format!("reading session file {path:?}: {e}")))?;
        let session: SessionFile = serde_json::from_str(&body)
            .map_err(|e| RocketshipError::assertion_failed(format!("malformed session file {path:?}: {e}")))?;
        if session.ws_endpoint.is_empty() {
            return Err(RocketshipError::assertion_failed(format!(
                "session file {path:?} is missing wsEndpoint"
            )));
        }
        Ok(session)
    }

    /// Idempotent: removing an already-absent session file is not an error.
    pub fn remove(run_dir: &Path, session_id: &str) -> Result<()> {
        let path = Self::path(run_dir, session_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RocketshipError::Internal(anyhow::anyhow!("removing {path:?}: {e}"))),
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct BrowserConfig {
    task: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    headless: bool,
    #[serde(default)]
    timeout: Option<String>,
}

pub struct BrowserActivity {
    run_dir: PathBuf,
}

impl BrowserActivity {
    pub fn new(run_dir: PathBuf) -> Self {
        Self { run_dir }
    }
}

#[async_trait]
impl Activity for BrowserActivity {
    fn plugin_type(&self) -> &'static str {
        "browser"
    }

    async fn execute(&self, input: ActivityInput) -> Result<ActivityOutput> {
        let config = parse_config(&input.config)?;
        let timeout = match &config.timeout {
            Some(raw) => crate::delay::parse_duration(raw)?,
            None => DEFAULT_TIMEOUT,
        };
        let session_id = config
            .session_id
            .clone()
            .unwrap_or_else(|| input.name.clone());

        tokio::time::timeout(timeout, self.drive(&session_id, &config))
            .await
            .map_err(|_| RocketshipError::assertion_failed("browser task timed out".to_string()))?
    }
}

impl BrowserActivity {
    async fn drive(&self, session_id: &str, config: &BrowserConfig) -> Result<ActivityOutput> {
        let session = match SessionFile::read(&self.run_dir, session_id) {
            Ok(existing) => existing,
            Err(_) => self.launch(session_id, config.headless).await?,
        };

        let (browser, mut handler) = chromiumoxide::Browser::connect(&session.ws_endpoint)
            .await
            .map_err(|e| RocketshipError::transient(format!("attaching to browser session: {e}")))?;

        tokio::spawn(async move { while handler.next().await.is_some() {} });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| RocketshipError::transient(format!("opening page: {e}")))?;

        // The actual task DSL (navigate/click/extract) is out of scope here;
        // `task` is logged so the operator can see what was attempted.
        tracing::info!(session_id, task = %config.task, "browser task dispatched");
        drop(page);

        Ok(ActivityOutput::new())
    }

    async fn launch(&self, session_id: &str, headless: bool) -> Result<SessionFile> {
        let mut builder = chromiumoxide::BrowserConfig::builder();
        if !headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| RocketshipError::Internal(anyhow::anyhow!("building browser config: {e}")))?;

        let (browser, mut handler) = chromiumoxide::Browser::launch(config)
            .await
            .map_err(|e| RocketshipError::transient(format!("launching browser: {e}")))?;
        tokio::spawn(async move { while handler.next().await.is_some() {} });

        let session = SessionFile {
            ws_endpoint: browser.websocket_address().to_string(),
            pid: std::process::id(),
            created_at: Utc::now(),
        };
        session.write(&self.run_dir, session_id)?;
        Ok(session)
    }
}

fn parse_config(raw: &HashMap<String, Value>) -> Result<BrowserConfig> {
    let value = Value::Object(raw.clone().into_iter().collect());
    serde_json::from_value(value)
        .map_err(|e| RocketshipError::plugin_config_invalid("browser", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionFile {
            ws_endpoint: "ws://127.0.0.1:9222/devtools/browser/abc".to_string(),
            pid: 1234,
            created_at: Utc::now(),
        };
        session.write(dir.path(), "s1").unwrap();

        let read_back = SessionFile::read(dir.path(), "s1").unwrap();
        assert_eq!(read_back.ws_endpoint, session.ws_endpoint);
        assert_eq!(read_back.pid, session.pid);
    }

    #[test]
    fn read_missing_session_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        let err = SessionFile::read(dir.path(), "missing").unwrap_err();
        assert!(matches!(err, RocketshipError::Transient(_)));
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        SessionFile::remove(dir.path(), "never-existed").unwrap();
        SessionFile::remove(dir.path(), "never-existed").unwrap();
    }
}
