//! Live socket feed for one signed-in user.
//!
//! Keeps a [`NotificationSession`] current: on every (re)connect it sends
//! `identify`, refetches the authoritative list and hydrates, then applies
//! broadcast events until the socket drops. Reconnects back off
//! exponentially up to a cap. Presence comes from socket events plus a
//! periodic poll whose failures are ignored. Reminders fired by a
//! [`ReminderScheduler`](super::reminders::ReminderScheduler) are raised in
//! the same session whether or not the socket is up.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::event::{ClientEvent, IdentifyPayload, ServerEvent};
use crate::models::notification::Notification;

use super::reminders::Reminder;
use super::session::{Arrival, NotificationSession};
use super::ApiClient;

#[derive(Debug, Clone)]
pub struct LiveFeedConfig {
    /// Sent in `identify` so the server can track presence.
    pub user_id: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub presence_poll: Duration,
}

impl LiveFeedConfig {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            presence_poll: Duration::from_secs(30),
        }
    }
}

/// Changes observed by the feed, for UIs that want to react to them.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedUpdate {
    Connected,
    Hydrated { count: usize },
    Notification { notification: Notification, arrival: Arrival },
    Read { ids: Vec<Uuid> },
    Online(Vec<String>),
    Disconnected,
}

pub struct LiveFeed {
    api: ApiClient,
    config: LiveFeedConfig,
    session: Arc<Mutex<NotificationSession>>,
    online: Arc<RwLock<BTreeSet<String>>>,
    updates: Option<mpsc::UnboundedSender<FeedUpdate>>,
    reminders: Option<mpsc::UnboundedReceiver<Reminder>>,
}

/// Owns the background tasks; dropping it stops the feed.
pub struct LiveFeedHandle {
    task: JoinHandle<()>,
    reminders: Option<JoinHandle<()>>,
}

impl LiveFeedHandle {
    pub fn stop(&self) {
        self.task.abort();
        if let Some(reminders) = &self.reminders {
            reminders.abort();
        }
    }
}

impl Drop for LiveFeedHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

enum SessionEnd {
    /// Never got a socket; keep backing off.
    ConnectFailed(anyhow::Error),
    /// Was connected and the socket went away; start over from the
    /// initial backoff.
    Closed,
}

impl LiveFeed {
    pub fn new(api: ApiClient, session: NotificationSession, config: LiveFeedConfig) -> Self {
        Self {
            api,
            config,
            session: Arc::new(Mutex::new(session)),
            online: Arc::new(RwLock::new(BTreeSet::new())),
            updates: None,
            reminders: None,
        }
    }

    pub fn with_updates(mut self, tx: mpsc::UnboundedSender<FeedUpdate>) -> Self {
        self.updates = Some(tx);
        self
    }

    /// Raise reminders arriving on `rx` in the session.
    pub fn with_reminders(mut self, rx: mpsc::UnboundedReceiver<Reminder>) -> Self {
        self.reminders = Some(rx);
        self
    }

    pub fn session(&self) -> Arc<Mutex<NotificationSession>> {
        self.session.clone()
    }

    pub fn online_users(&self) -> Arc<RwLock<BTreeSet<String>>> {
        self.online.clone()
    }

    pub fn spawn(mut self) -> LiveFeedHandle {
        let reminders = self.reminders.take().map(|rx| {
            tokio::spawn(deliver_reminders(
                rx,
                self.session.clone(),
                self.updates.clone(),
            ))
        });
        LiveFeedHandle {
            task: tokio::spawn(self.run()),
            reminders,
        }
    }

    pub async fn run(self) {
        let mut backoff = self.config.initial_backoff;
        loop {
            match self.connect_once().await {
                SessionEnd::Closed => {
                    self.emit(FeedUpdate::Disconnected);
                    backoff = self.config.initial_backoff;
                }
                SessionEnd::ConnectFailed(e) => {
                    debug!(retry_in_ms = backoff.as_millis() as u64, "socket connect failed: {:#}", e);
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.max_backoff);
        }
    }

    async fn connect_once(&self) -> SessionEnd {
        let url = match self.api.socket_url() {
            Ok(url) => url,
            Err(e) => return SessionEnd::ConnectFailed(e),
        };
        let (socket, _) = match connect_async(url.as_str()).await {
            Ok(conn) => conn,
            Err(e) => return SessionEnd::ConnectFailed(e.into()),
        };
        info!(url = %url, user_id = %self.config.user_id, "socket connected");
        self.emit(FeedUpdate::Connected);

        let (mut sink, mut stream) = socket.split();

        let identify = ClientEvent::Identify(IdentifyPayload {
            user_id: self.config.user_id.clone(),
        });
        match serde_json::to_string(&identify) {
            Ok(text) => {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("failed to send identify: {}", e);
                    return SessionEnd::Closed;
                }
            }
            Err(e) => warn!("failed to encode identify: {}", e),
        }

        // hydrate after subscribing so nothing created in between is missed
        self.hydrate().await;
        self.poll_presence().await;

        let mut poll = tokio::time::interval(self.config.presence_poll);
        poll.tick().await;

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_frame(&text).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("socket read failed: {}", e);
                        break;
                    }
                },
                _ = poll.tick() => self.poll_presence().await,
            }
        }

        info!("socket disconnected");
        SessionEnd::Closed
    }

    async fn hydrate(&self) {
        match self.api.list().await {
            Ok(list) => {
                let count = list.len();
                self.session.lock().await.hydrate(list);
                self.emit(FeedUpdate::Hydrated { count });
            }
            Err(e) => warn!("failed to fetch notifications: {:#}", e),
        }
    }

    async fn poll_presence(&self) {
        match self.api.online_users().await {
            Ok(users) => {
                let snapshot: BTreeSet<String> = users.into_iter().collect();
                *self.online.write().await = snapshot.clone();
                self.emit(FeedUpdate::Online(snapshot.into_iter().collect()));
            }
            Err(e) => debug!("presence poll failed: {:#}", e),
        }
    }

    async fn handle_frame(&self, text: &str) {
        let event = match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                debug!("ignoring unrecognised server frame: {}", e);
                return;
            }
        };

        match event {
            ServerEvent::NotificationNew(payload) => {
                let notification: Notification = payload.into();
                let arrival = self
                    .session
                    .lock()
                    .await
                    .on_broadcast(notification.clone(), Instant::now());
                self.emit(FeedUpdate::Notification {
                    notification,
                    arrival,
                });
            }
            ServerEvent::NotificationRead(payload) => {
                self.session.lock().await.on_read(&payload.ids);
                self.emit(FeedUpdate::Read { ids: payload.ids });
            }
            ServerEvent::UserOnline(payload) => {
                let mut online = self.online.write().await;
                online.insert(payload.user_id);
                self.emit(FeedUpdate::Online(online.iter().cloned().collect()));
            }
            ServerEvent::UserOffline(payload) => {
                let mut online = self.online.write().await;
                online.remove(&payload.user_id);
                self.emit(FeedUpdate::Online(online.iter().cloned().collect()));
            }
        }
    }

    fn emit(&self, update: FeedUpdate) {
        if let Some(tx) = &self.updates {
            let _ = tx.send(update);
        }
    }
}

async fn deliver_reminders(
    mut rx: mpsc::UnboundedReceiver<Reminder>,
    session: Arc<Mutex<NotificationSession>>,
    updates: Option<mpsc::UnboundedSender<FeedUpdate>>,
) {
    while let Some(reminder) = rx.recv().await {
        let notification = reminder.to_notification();
        let arrival = session
            .lock()
            .await
            .on_local(notification.clone(), Instant::now());
        debug!(activity_id = %reminder.activity_id, title = %reminder.title, ?arrival, "reminder raised");
        if arrival == Arrival::Irrelevant {
            continue;
        }
        if let Some(tx) = &updates {
            let _ = tx.send(FeedUpdate::Notification {
                notification,
                arrival,
            });
        }
    }
}
