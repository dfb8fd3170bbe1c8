//! Slack Web API client
//!
//! Minimal `chat.postMessage` / `chat.update` client. The `ts` returned by
//! Slack for a posted message is the handle used to edit it later.

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_API_BASE: &str = "https://slack.com/api";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum SlackError {
    #[error("Slack HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Slack API error: {0}")]
    Api(String),

    #[error("Invalid response from Slack: missing message timestamp")]
    MissingTimestamp,
}

/// Slack connection settings
#[derive(Clone)]
pub struct SlackConfig {
    /// Bot token (`xoxb-...`)
    pub bot_token: String,
    /// Channel id or name messages are posted to
    pub channel: String,
    pub api_base: String,
}

impl SlackConfig {
    pub fn new(bot_token: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            channel: channel.into(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

// Keep the token out of logs.
impl std::fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackConfig")
            .field("channel", &self.channel)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl SlackResponse {
    fn check(self) -> Result<Self, SlackError> {
        if self.ok {
            Ok(self)
        } else {
            Err(SlackError::Api(
                self.error.unwrap_or_else(|| "unknown_error".to_string()),
            ))
        }
    }
}

#[derive(Debug, Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    config: Arc<SlackConfig>,
}

impl SlackClient {
    pub fn new(config: SlackConfig) -> Result<Self, SlackError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    /// Post `text` to the configured channel, returning the message `ts`.
    pub async fn post_message(&self, text: &str) -> Result<String, SlackError> {
        let body = json!({ "channel": self.config.channel, "text": text });
        let response = self.call("chat.postMessage", body).await?;
        response.ts.ok_or(SlackError::MissingTimestamp)
    }

    /// Replace the text of the message identified by `ts`.
    pub async fn update_message(&self, ts: &str, text: &str) -> Result<(), SlackError> {
        let body = json!({ "channel": self.config.channel, "ts": ts, "text": text });
        self.call("chat.update", body).await?;
        Ok(())
    }

    async fn call(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<SlackResponse, SlackError> {
        let url = format!("{}/{}", self.config.api_base.trim_end_matches('/'), method);

        let response: SlackResponse = self
            .http
            .post(url)
            .bearer_auth(&self.config.bot_token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        tracing::debug!(method, ok = response.ok, "Slack API call completed");
        response.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_response_keeps_ts() {
        let response: SlackResponse =
            serde_json::from_str(r#"{"ok":true,"channel":"C1","ts":"1700000000.000100"}"#).unwrap();
        let response = response.check().unwrap();
        assert_eq!(response.ts.as_deref(), Some("1700000000.000100"));
    }

    #[test]
    fn test_error_response_is_api_error() {
        let response: SlackResponse =
            serde_json::from_str(r#"{"ok":false,"error":"channel_not_found"}"#).unwrap();
        match response.check() {
            Err(SlackError::Api(code)) => assert_eq!(code, "channel_not_found"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_config_debug_hides_token() {
        let config = SlackConfig::new("xoxb-secret", "#alerts");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("xoxb-secret"));
        assert!(rendered.contains("#alerts"));
    }
}
