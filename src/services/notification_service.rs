use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};

const DELIVERY_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub event_type: String,
    pub candidate_id: Uuid,
    pub payload: JsonValue,
}

impl Notification {
    pub fn new(event_type: &str, candidate_id: Uuid, payload: JsonValue) -> Self {
        Self {
            event_type: event_type.to_string(),
            candidate_id,
            payload,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Used when no webhook is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        tracing::info!(
            event_type = %notification.event_type,
            candidate_id = %notification.candidate_id,
            "notification"
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    target_url: String,
    secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(client: Client, target_url: String, secret: Option<String>) -> Self {
        Self {
            client,
            target_url,
            secret,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let mut req = self.client.post(&self.target_url).json(notification);
        if let Some(secret) = &self.secret {
            req = req.header("X-Webhook-Secret", secret);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Internal(format!(
                "webhook answered {}: {}",
                status, body
            )));
        }
        Ok(())
    }
}

/// Fire-and-forget delivery: callers never wait on, or fail because of, a notification.
#[derive(Clone)]
pub struct NotificationService {
    notifier: Arc<dyn Notifier>,
}

impl NotificationService {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    pub fn dispatch(&self, notification: Notification) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let mut delay = Duration::from_millis(500);
            for attempt in 1..=DELIVERY_ATTEMPTS {
                match notifier.notify(&notification).await {
                    Ok(()) => return,
                    Err(err) => {
                        tracing::warn!(
                            event_type = %notification.event_type,
                            candidate_id = %notification.candidate_id,
                            attempt,
                            error = %err,
                            "notification delivery failed"
                        );
                        if attempt < DELIVERY_ATTEMPTS {
                            tokio::time::sleep(delay).await;
                            delay *= 2;
                        }
                    }
                }
            }
        });
    }
}
