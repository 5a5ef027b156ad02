//! daka-notify: best-effort outcome notifications.
//!
//! A broken notification channel must never fail or block a task, so the
//! `Notifier` seam returns unit and implementations swallow and log errors.

use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use daka_types::Severity;

/// Outbound notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver best-effort; failures are logged, never propagated.
    async fn notify(&self, title: &str, message: &str, severity: Severity);
}

/// Discards notifications (used when WxPusher is not configured).
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, title: &str, _message: &str, severity: Severity) {
        tracing::debug!(?severity, "Notification dropped (no channel configured): {title}");
    }
}

const WXPUSHER_SEND_URL: &str = "https://wxpusher.zjiecode.com/api/send/message";

/// Markdown content type in the WxPusher API.
const CONTENT_TYPE_MARKDOWN: u8 = 3;

/// API status code for a successful send.
const CODE_OK: i64 = 1000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageParams<'a> {
    app_token: &'a str,
    content: String,
    summary: &'a str,
    content_type: u8,
    uids: [&'a str; 1],
    verify_pay: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
}

/// WxPusher push channel.
pub struct WxPusher {
    client: Client,
    app_token: String,
    uid: String,
}

impl WxPusher {
    pub fn new(app_token: impl Into<String>, uid: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            app_token: app_token.into(),
            uid: uid.into(),
        }
    }

    async fn send(&self, title: &str, message: &str, severity: Severity) -> anyhow::Result<()> {
        let marker = match severity {
            Severity::Info => "✅",
            Severity::Error => "❌",
        };
        let params = SendMessageParams {
            app_token: &self.app_token,
            content: format!("# {marker} {title}\n\n{message}"),
            summary: title,
            content_type: CONTENT_TYPE_MARKDOWN,
            uids: [&self.uid],
            verify_pay: false,
        };

        let resp: ApiResponse = self
            .client
            .post(WXPUSHER_SEND_URL)
            .json(&params)
            .send()
            .await
            .context("send request failed")?
            .json()
            .await
            .context("send response parse failed")?;

        if resp.code != CODE_OK {
            bail!(
                "send rejected: {}",
                resp.msg.unwrap_or_else(|| format!("code {}", resp.code))
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WxPusher {
    async fn notify(&self, title: &str, message: &str, severity: Severity) {
        match self.send(title, message, severity).await {
            Ok(()) => tracing::info!("WxPusher notification sent: {title}"),
            Err(e) => tracing::warn!("WxPusher notification failed: {e:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_params_wire_shape() {
        let params = SendMessageParams {
            app_token: "AT_x",
            content: "# ✅ Morning check-in\n\ndone".to_string(),
            summary: "Morning check-in",
            content_type: CONTENT_TYPE_MARKDOWN,
            uids: ["UID_y"],
            verify_pay: false,
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["appToken"], "AT_x");
        assert_eq!(value["contentType"], 3);
        assert_eq!(value["uids"][0], "UID_y");
        assert_eq!(value["verifyPay"], false);
    }

    #[test]
    fn test_api_response_parses_without_msg() {
        let resp: ApiResponse = serde_json::from_str(r#"{"code":1000}"#).unwrap();
        assert_eq!(resp.code, CODE_OK);
        assert!(resp.msg.is_none());
    }

    #[tokio::test]
    async fn test_noop_notifier_never_fails() {
        NoopNotifier.notify("t", "m", Severity::Error).await;
    }
}
