//! Fan-out of server events to every connected socket.
//!
//! Plain broadcast: every session gets every event and decides relevance on
//! its own. No acknowledgement, no retry, no queue for absent clients; they
//! catch up through the list endpoint.

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::models::event::ServerEvent;
use crate::models::notification::Notification;

/// Default channel capacity per subscriber before it starts lagging.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Broadcast failures. Only ever logged.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("no connected sessions")]
    NoSubscribers,

    #[error("session lagged behind and skipped {0} events")]
    Lagged(u64),

    #[error("socket send failed: {0}")]
    Socket(String),
}

#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<ServerEvent>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    /// Publish to all current subscribers. Returns how many received it.
    pub fn publish(&self, event: ServerEvent) -> usize {
        let name = event.name();
        match self.tx.send(event) {
            Ok(n) => {
                debug!(event = name, receivers = n, "broadcast event");
                n
            }
            Err(_) => {
                debug!(event = name, error = %DeliveryError::NoSubscribers, "broadcast dropped");
                0
            }
        }
    }

    pub fn publish_notification(&self, n: &Notification) -> usize {
        self.publish(ServerEvent::NotificationNew(n.into()))
    }
}

/// Next event for a subscriber, skipping over lag gaps. `None` once the
/// broadcaster is gone.
pub async fn next_event(rx: &mut broadcast::Receiver<ServerEvent>) -> Option<ServerEvent> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(error = %DeliveryError::Lagged(skipped), "subscriber lagging");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
