//! Messages exchanged over the real-time channel.
//!
//! Every frame is a JSON object of the form `{"event": "<name>", "data": {...}}`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::notification::NotificationPayload;

/// Server → client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "notification:new")]
    NotificationNew(NotificationPayload),
    #[serde(rename = "notification:read")]
    NotificationRead(ReadPayload),
    #[serde(rename = "user:online")]
    UserOnline(PresencePayload),
    #[serde(rename = "user:offline")]
    UserOffline(PresencePayload),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::NotificationNew(_) => "notification:new",
            ServerEvent::NotificationRead(_) => "notification:read",
            ServerEvent::UserOnline(_) => "user:online",
            ServerEvent::UserOffline(_) => "user:offline",
        }
    }
}

/// Client → server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "identify")]
    Identify(IdentifyPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyPayload {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadPayload {
    pub ids: Vec<Uuid>,
}
