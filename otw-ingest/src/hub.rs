//! Fan-out hub for live viewers
//!
//! Each registered client owns a bounded frame queue. A broadcast enqueues
//! the frame for every client with `try_send`, so no client can block
//! delivery to the others; a client whose queue is full or whose receiver
//! has gone away is evicted. Late joiners get nothing until the next frame.

use otw_common::{ChangeNotification, PushFrame};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub type ClientId = u64;

/// Receiving side handed to a connection handler
pub struct ClientSubscription {
    pub id: ClientId,
    pub frames: mpsc::Receiver<Arc<PushFrame>>,
}

/// Result of one broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub evicted: Vec<ClientId>,
}

#[derive(Default)]
struct Registry {
    next_id: ClientId,
    clients: BTreeMap<ClientId, mpsc::Sender<Arc<PushFrame>>>,
}

#[derive(Clone)]
pub struct FanoutHub {
    registry: Arc<Mutex<Registry>>,
    client_buffer: usize,
}

impl FanoutHub {
    /// `client_buffer` frames may queue per client before it is evicted
    pub fn new(client_buffer: usize) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            client_buffer: client_buffer.max(1),
        }
    }

    pub async fn register(&self) -> ClientSubscription {
        let (tx, rx) = mpsc::channel(self.client_buffer);
        let mut registry = self.registry.lock().await;
        registry.next_id += 1;
        let id = registry.next_id;
        registry.clients.insert(id, tx);
        info!(client = id, total = registry.clients.len(), "Client registered");
        ClientSubscription { id, frames: rx }
    }

    /// Remove a client; returns false if it was already gone
    pub async fn unregister(&self, id: ClientId) -> bool {
        let mut registry = self.registry.lock().await;
        let removed = registry.clients.remove(&id).is_some();
        if removed {
            info!(client = id, total = registry.clients.len(), "Client unregistered");
        }
        removed
    }

    pub async fn client_count(&self) -> usize {
        self.registry.lock().await.clients.len()
    }

    /// Push one frame to every registered client
    pub async fn on_notification(&self, frame: PushFrame) -> DeliveryReport {
        let frame = Arc::new(frame);
        let mut report = DeliveryReport::default();
        let mut registry = self.registry.lock().await;

        for (id, tx) in registry.clients.iter() {
            match tx.try_send(Arc::clone(&frame)) {
                Ok(()) => report.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(client = id, "Client queue full, evicting");
                    report.evicted.push(*id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(client = id, "Client disconnected, evicting");
                    report.evicted.push(*id);
                }
            }
        }

        for id in &report.evicted {
            registry.clients.remove(id);
        }

        info!(
            events = frame.events.len(),
            delivered = report.delivered,
            evicted = report.evicted.len(),
            "Broadcast frame"
        );
        report
    }
}

/// Forward notifications from the pipeline's channel into the hub
///
/// Ends when every sender has been dropped.
pub fn spawn_dispatcher(
    hub: FanoutHub,
    mut notifications: mpsc::Receiver<Arc<ChangeNotification>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            debug!(id = %notification.notification_id, "Dispatching notification to hub");
            hub.on_notification(notification.push_frame()).await;
        }
        info!("Notification channel closed, hub dispatcher stopping");
    })
}
