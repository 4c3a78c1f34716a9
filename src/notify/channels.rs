// src/notify/channels.rs
//
// Delivery adapters. Console is a structured log line; JSONL appends to a
// local file; webhook POSTs the notification as JSON.

use crate::incidents::{IncidentPayload, IncidentState};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// One delivery, as every channel sees it.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    /// Unique per delivery, for correlation on the receiving side
    pub delivery_id: String,
    pub sent_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: IncidentPayload,
    /// Base64 JPEG of the representative frame
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_base64: Option<String>,
}

impl Notification {
    pub fn new(payload: IncidentPayload, snapshot_base64: Option<String>) -> Self {
        Self {
            delivery_id: uuid::Uuid::new_v4().to_string(),
            sent_at: Utc::now(),
            payload,
            snapshot_base64,
        }
    }
}

pub enum Channel {
    Console,
    Jsonl(JsonlChannel),
    Webhook(WebhookChannel),
}

impl Channel {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Console => "console",
            Self::Jsonl(_) => "jsonl",
            Self::Webhook(_) => "webhook",
        }
    }

    pub fn wants_snapshot(&self) -> bool {
        matches!(self, Self::Webhook(_))
    }

    pub async fn send(&self, notification: &Notification) -> Result<()> {
        match self {
            Self::Console => {
                let p = &notification.payload;
                match p.state {
                    IncidentState::Resolved => info!(
                        "🔔 {} [{}] resolved ({})",
                        p.headline(),
                        p.event_id,
                        p.resolution.map(|r| r.as_str()).unwrap_or("-")
                    ),
                    _ => warn!(
                        "🔔 {} [{}] area={}",
                        p.headline(),
                        p.event_id,
                        p.area.as_deref().unwrap_or("-")
                    ),
                }
                Ok(())
            }
            Self::Jsonl(ch) => ch.append(notification).await,
            Self::Webhook(ch) => ch.post(notification).await,
        }
    }
}

pub struct JsonlChannel {
    path: PathBuf,
}

impl JsonlChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn append(&self, notification: &Notification) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(notification)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

pub struct WebhookChannel {
    http_client: reqwest::Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: String, timeout_secs: u64) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http_client, url })
    }

    async fn post(&self, notification: &Notification) -> Result<()> {
        debug!(
            "Posting {} for {} to {}",
            notification.delivery_id, notification.payload.event_id, self.url
        );
        let response = self
            .http_client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .with_context(|| format!("Webhook request to {} failed", self.url))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            bail!("Webhook returned {}: {}", status, body);
        }
        Ok(())
    }
}
