// kubebackup/src/notify/mod.rs
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Good,
    Warning,
    Danger,
}

#[derive(Debug, Serialize)]
struct Attachment<'a> {
    fallback: &'a str,
    color: Color,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Payload<'a> {
    attachments: [Attachment<'a>; 1],
}

fn payload(message: &str, color: Color) -> Payload<'_> {
    Payload {
        attachments: [Attachment {
            fallback: message,
            color,
            text: message,
        }],
    }
}

/// Best-effort webhook notifications. Delivery problems are logged, never returned.
#[derive(Debug, Clone)]
pub struct Notifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!("⚠️ Failed to build HTTP client with timeout, using defaults: {}", e);
                reqwest::Client::new()
            });
        Self { client, webhook_url }
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// Posts the message. Returns whether the webhook accepted it.
    pub async fn send(&self, message: &str, color: Color) -> bool {
        let Some(url) = self.webhook_url.as_deref() else {
            debug!("No webhook configured, skipping notification");
            return false;
        };
        if message.trim().is_empty() {
            debug!("Empty notification message, skipping");
            return false;
        }
        if let Err(e) = url::Url::parse(url) {
            warn!("⚠️ Webhook URL is invalid, notification not sent: {}", e);
            return false;
        }

        match self.client.post(url).json(&payload(message, color)).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!("✓ Notification sent ({:?})", color);
                true
            }
            Ok(resp) => {
                warn!("⚠️ Webhook rejected notification with status {}", resp.status());
                false
            }
            Err(e) => {
                warn!("⚠️ Failed to deliver notification: {}", e);
                false
            }
        }
    }
}
