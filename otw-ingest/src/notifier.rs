//! Change notification publishing
//!
//! Delivery is at-most-once: a failed publish is logged and dropped. By the
//! time a notification is published the store has already been reconciled,
//! and nothing here can roll that back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use otw_common::{CanonicalEvent, ChangeNotification};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Hub queue is full")]
    QueueFull,

    #[error("Hub queue is closed")]
    QueueClosed,

    #[error("Webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Webhook returned HTTP {0}")]
    Status(u16),
}

/// A downstream subscription point for change notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    async fn publish(&self, notification: Arc<ChangeNotification>) -> Result<(), NotifyError>;
}

/// Publish to every sink; failures are logged and never propagated
///
/// Returns how many sinks accepted the notification.
pub async fn publish_all(
    notifiers: &[Arc<dyn Notifier>],
    notification: Arc<ChangeNotification>,
) -> usize {
    let mut accepted = 0;
    for notifier in notifiers {
        match notifier.publish(Arc::clone(&notification)).await {
            Ok(()) => {
                debug!(sink = notifier.name(), id = %notification.notification_id, "Notification published");
                accepted += 1;
            }
            Err(e) => warn!(
                sink = notifier.name(),
                id = %notification.notification_id,
                error = %e,
                "Notification publish failed (not retried)"
            ),
        }
    }
    accepted
}

/// Hands notifications to the in-process fan-out hub over a bounded queue
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<Arc<ChangeNotification>>,
}

impl ChannelNotifier {
    pub fn new(tx: mpsc::Sender<Arc<ChangeNotification>>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    fn name(&self) -> &str {
        "hub-channel"
    }

    async fn publish(&self, notification: Arc<ChangeNotification>) -> Result<(), NotifyError> {
        self.tx.try_send(notification).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NotifyError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => NotifyError::QueueClosed,
        })
    }
}

/// Event-Grid style envelope posted by [`WebhookNotifier`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEnvelope {
    pub id: Uuid,
    pub event_type: String,
    pub subject: String,
    pub event_time: DateTime<Utc>,
    pub data: EnvelopeData,
    #[serde(default = "default_data_version")]
    pub data_version: String,
    #[serde(default)]
    pub metadata_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeData {
    #[serde(default)]
    pub events: Vec<CanonicalEvent>,
}

fn default_data_version() -> String {
    "1.0".to_string()
}

impl From<&ChangeNotification> for NotificationEnvelope {
    fn from(notification: &ChangeNotification) -> Self {
        Self {
            id: notification.notification_id,
            event_type: notification.event_type.clone(),
            subject: notification.subject.clone(),
            event_time: notification.event_time,
            data: EnvelopeData {
                events: notification.events.clone(),
            },
            data_version: default_data_version(),
            metadata_version: Some("1".to_string()),
        }
    }
}

/// Posts notifications to a topic/webhook endpoint
pub struct WebhookNotifier {
    http_client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn publish(&self, notification: Arc<ChangeNotification>) -> Result<(), NotifyError> {
        let payload = [NotificationEnvelope::from(notification.as_ref())];

        let response = self
            .http_client
            .post(&self.url)
            .header("aeg-event-type", "Notification")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }

        info!(
            url = %self.url,
            events = notification.events.len(),
            "Posted change notification to webhook"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        fn name(&self) -> &str {
            "failing"
        }

        async fn publish(&self, _notification: Arc<ChangeNotification>) -> Result<(), NotifyError> {
            Err(NotifyError::Status(503))
        }
    }

    #[tokio::test]
    async fn test_channel_notifier_delivers() {
        let (tx, mut rx) = mpsc::channel(4);
        let notifier = ChannelNotifier::new(tx);
        let notification = Arc::new(ChangeNotification::new(Vec::new()));

        notifier.publish(Arc::clone(&notification)).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.notification_id, notification.notification_id);
    }

    #[tokio::test]
    async fn test_channel_notifier_full_and_closed() {
        let (tx, rx) = mpsc::channel(1);
        let notifier = ChannelNotifier::new(tx);

        notifier
            .publish(Arc::new(ChangeNotification::new(Vec::new())))
            .await
            .unwrap();
        let err = notifier
            .publish(Arc::new(ChangeNotification::new(Vec::new())))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::QueueFull));

        drop(rx);
        let err = notifier
            .publish(Arc::new(ChangeNotification::new(Vec::new())))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::QueueClosed));
    }

    #[tokio::test]
    async fn test_publish_all_isolates_failures() {
        let (tx, mut rx) = mpsc::channel(4);
        let notifiers: Vec<Arc<dyn Notifier>> =
            vec![Arc::new(FailingNotifier), Arc::new(ChannelNotifier::new(tx))];

        let accepted =
            publish_all(&notifiers, Arc::new(ChangeNotification::new(Vec::new()))).await;

        assert_eq!(accepted, 1);
        assert!(rx.recv().await.is_some());
    }

    #[test]
    fn test_envelope_shape() {
        let notification = ChangeNotification::new(Vec::new());
        let value = serde_json::to_value(NotificationEnvelope::from(&notification)).unwrap();

        assert_eq!(value["eventType"], "Traffic.Ingested");
        assert_eq!(value["subject"], "traffic/ingestion");
        assert_eq!(value["dataVersion"], "1.0");
        assert_eq!(value["metadataVersion"], "1");
        assert!(value["data"]["events"].as_array().unwrap().is_empty());
        assert_eq!(value["id"], notification.notification_id.to_string());
    }
}
