//! Moonraker HTTP API as a print state source.

use std::time::Duration;

use printcast_core::types::PrintState;
use tracing::debug;

use crate::StreamerError;
use crate::controller::StatusSource;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MoonrakerSource {
    base_url: String,
    client: reqwest::Client,
}

impl MoonrakerSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self, StreamerError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Value, StreamerError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "moonraker request");

        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(StreamerError::Status(format!(
                "moonraker returned {} for {path}",
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }
}

#[async_trait::async_trait]
impl StatusSource for MoonrakerSource {
    async fn is_ready(&self) -> bool {
        match self.get_json("/server/info").await {
            Ok(body) => parse_klippy_ready(&body),
            Err(e) => {
                debug!(error = %e, "moonraker not reachable yet");
                false
            }
        }
    }

    async fn print_state(&self) -> Result<PrintState, StreamerError> {
        let body = self.get_json("/printer/objects/query?print_stats").await?;
        parse_print_state(&body)
    }
}

/// `result.klippy_state == "ready"` in a `/server/info` response.
pub fn parse_klippy_ready(body: &serde_json::Value) -> bool {
    body.pointer("/result/klippy_state").and_then(|v| v.as_str()) == Some("ready")
}

pub fn parse_print_state(body: &serde_json::Value) -> Result<PrintState, StreamerError> {
    body.pointer("/result/status/print_stats/state")
        .and_then(|v| v.as_str())
        .map(PrintState::from_status)
        .ok_or_else(|| StreamerError::Status("print_stats.state missing from response".into()))
}
