use anyhow::{anyhow, Context, Result};
use tracing::error;

use crate::types::{FailureClass, Health, HeartbeatLeaf, SlackPayload};

/// Report lines gathered for one environment during a cycle, in observation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentChunks {
    pub environment: String,
    pub chunks: Vec<String>,
}

impl EnvironmentChunks {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            chunks: Vec::new(),
        }
    }

    pub fn push(&mut self, chunk: String) {
        self.chunks.push(chunk);
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

pub fn service_chunk(service: &str, leaf: &HeartbeatLeaf, health: Health) -> String {
    let icon = match health {
        Health::Healthy => ":white_check_mark:",
        Health::Unhealthy => ":x:",
    };
    let mut line = format!("{} *{}*", icon, service);
    if !leaf.version.is_empty() {
        line.push_str(&format!(" v{}", leaf.version));
    }
    line.push_str(&format!(" (status {})", leaf.status));
    if !leaf.message.is_empty() {
        line.push_str(&format!(": {}", leaf.message));
    }
    line
}

/// Generic chunk for an environment that could not be checked at all.
pub fn failure_chunk(class: FailureClass, count: u32, message: &str, status: Option<u16>) -> String {
    let status = status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default();
    format!(
        ":rotating_light: {} failed {} times in a row, still failing: {}{}",
        class.label(),
        count,
        message,
        status
    )
}

/// Builds one section per environment with content, separated by dividers.
/// Returns `None` when there is nothing to say.
pub fn build_slack_payload(environments: &[EnvironmentChunks], full_state: bool) -> Option<SlackPayload> {
    let mut blocks: Vec<serde_json::Value> = Vec::new();
    for env in environments.iter().filter(|e| !e.is_empty()) {
        if !blocks.is_empty() {
            blocks.push(serde_json::json!({"type": "divider"}));
        }
        blocks.push(serde_json::json!({
            "type": "section",
            "text": {"type": "mrkdwn", "text": format!("*{}*\n{}", env.environment, env.chunks.join("\n"))}
        }));
    }
    if blocks.is_empty() {
        return None;
    }

    let title = if full_state {
        "Full heartbeat status report"
    } else {
        "Heartbeat status report"
    };
    let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    Some(SlackPayload {
        text: Some(format!("{} ({})", title, now)),
        blocks,
    })
}

/// Delivery side of the notification channel.
#[allow(async_fn_in_trait)]
pub trait Notifier {
    async fn send(&self, payload: &SlackPayload) -> Result<()>;
}

pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackNotifier {
    pub fn new(client: reqwest::Client, webhook_url: impl Into<String>) -> Self {
        Self {
            client,
            webhook_url: webhook_url.into(),
        }
    }
}

impl Notifier for SlackNotifier {
    async fn send(&self, payload: &SlackPayload) -> Result<()> {
        send_to_slack(&self.client, &self.webhook_url, payload).await
    }
}

pub async fn send_to_slack(client: &reqwest::Client, webhook_url: &str, payload: &SlackPayload) -> Result<()> {
    let res = client
        .post(webhook_url)
        .json(payload)
        .send()
        .await
        .context("Failed to send Slack request")?;
    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        error!("Slack webhook failed: {} - {}", status, body);
        return Err(anyhow!("Slack webhook returned non-success status"));
    }
    Ok(())
}
