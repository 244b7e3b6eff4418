//! Fire-and-forget outbound notifications.
//!
//! Mutation call sites spawn these off the request path; a delivery failure
//! is logged and dropped, never surfaced to the caller.

use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde_json::json;
use tracing::warn;

use crate::domain::types::UserId;
use crate::infra::error::InfraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Like,
    Follow,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Like => "like",
            NotificationKind::Follow => "follow",
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: UserId, kind: NotificationKind, message: &str, ref_id: i64);
}

/// Posts notification payloads to an external endpoint as JSON.
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpNotifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, InfraError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(InfraError::Http)?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, recipient: UserId, kind: NotificationKind, message: &str, ref_id: i64) {
        let payload = json!({
            "recipient": recipient,
            "kind": kind.as_str(),
            "message": message,
            "ref_id": ref_id,
        });
        let outcome = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .and_then(|response| response.error_for_status());
        match outcome {
            Ok(_) => {
                counter!("tideline_notifications_total", "kind" => kind.as_str(), "outcome" => "sent")
                    .increment(1);
            }
            Err(error) => {
                counter!("tideline_notifications_total", "kind" => kind.as_str(), "outcome" => "failed")
                    .increment(1);
                warn!(
                    recipient = %recipient,
                    kind = kind.as_str(),
                    %error,
                    "Failed to deliver notification"
                );
            }
        }
    }
}

/// Used when notifications are disabled and in tests.
#[derive(Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _: UserId, _: NotificationKind, _: &str, _: i64) {}
}
