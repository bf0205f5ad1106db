//! Who is online.
//!
//! Tracks live connections per user. A user is online while they hold at
//! least one identified connection; the `user:online` / `user:offline`
//! broadcasts fire only on the 0→1 and 1→0 edges. Each counter change and
//! its broadcast happen while the user's map entry is locked, so edges are
//! emitted once and in order even when sockets of the same user come and go
//! concurrently.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use super::broadcast::Broadcaster;
use crate::models::event::{PresencePayload, ServerEvent};

pub type SocketId = Uuid;

pub struct PresenceRegistry {
    /// socket → user it identified as
    sockets: DashMap<SocketId, String>,
    /// user → live identified sockets (entries removed at zero)
    counts: DashMap<String, usize>,
    broadcaster: Broadcaster,
}

impl PresenceRegistry {
    pub fn new(broadcaster: Broadcaster) -> Self {
        Self {
            sockets: DashMap::new(),
            counts: DashMap::new(),
            broadcaster,
        }
    }

    /// Bind a connection to a user. Returns true if the user just came online.
    ///
    /// Identifying twice as the same user is a no-op; identifying as a
    /// different user moves the connection over.
    pub fn identify(&self, socket_id: SocketId, user_id: &str) -> bool {
        let previous = match self.sockets.entry(socket_id) {
            Entry::Occupied(e) if e.get() == user_id => {
                debug!(%socket_id, user_id, "duplicate identify ignored");
                return false;
            }
            Entry::Occupied(mut e) => Some(e.insert(user_id.to_string())),
            Entry::Vacant(e) => {
                e.insert(user_id.to_string());
                None
            }
        };

        if let Some(previous) = previous {
            debug!(%socket_id, from = %previous, to = user_id, "connection re-identified");
            self.release(&previous);
        }
        self.acquire(user_id)
    }

    /// Forget a connection. Returns true if its user just went offline.
    /// Connections that never identified are ignored.
    pub fn disconnect(&self, socket_id: SocketId) -> bool {
        match self.sockets.remove(&socket_id) {
            Some((_, user_id)) => self.release(&user_id),
            None => {
                debug!(%socket_id, "disconnect for unidentified connection");
                false
            }
        }
    }

    /// Sorted ids of users with at least one live connection.
    pub fn list_online(&self) -> Vec<String> {
        let mut users: Vec<String> = self.counts.iter().map(|e| e.key().clone()).collect();
        users.sort();
        users
    }

    pub fn connection_count(&self, user_id: &str) -> usize {
        self.counts.get(user_id).map(|c| *c).unwrap_or(0)
    }

    fn acquire(&self, user_id: &str) -> bool {
        let mut count = self.counts.entry(user_id.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            info!(user_id, "user online");
            self.broadcaster.publish(ServerEvent::UserOnline(PresencePayload {
                user_id: user_id.to_string(),
            }));
            true
        } else {
            false
        }
    }

    fn release(&self, user_id: &str) -> bool {
        match self.counts.entry(user_id.to_string()) {
            Entry::Occupied(mut e) => {
                let count = e.get_mut();
                *count = count.saturating_sub(1);
                if *count == 0 {
                    e.remove();
                    info!(user_id, "user offline");
                    self.broadcaster.publish(ServerEvent::UserOffline(PresencePayload {
                        user_id: user_id.to_string(),
                    }));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => {
                debug!(user_id, "release for user with no live connections");
                false
            }
        }
    }
}
