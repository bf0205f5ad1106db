//! Client side of the notification system: REST client, per-user session
//! state, the live socket feed and local activity reminders.

pub mod live;
pub mod reminders;
pub mod session;

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;
use uuid::Uuid;

use crate::models::notification::Notification;
use crate::notification::service::{Audience, CreateNotification};

/// Pushes locally applied read state to the server.
#[async_trait]
pub trait ReadSync: Send + Sync {
    async fn mark_read(&self, id: Uuid) -> anyhow::Result<()>;
    async fn mark_all_read(&self) -> anyhow::Result<()>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OnlineUsers {
    user_ids: Vec<String>,
}

#[derive(Deserialize)]
struct UnreadCount {
    count: usize,
}

/// REST client for one viewer. `audience` is attached to every feed-scoped
/// call (list, mark-all-read, unread count).
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    audience: Audience,
}

impl ApiClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("invalid server URL: {}", base_url))?;
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base,
            audience: Audience::default(),
        })
    }

    pub fn with_audience(mut self, audience: Audience) -> Self {
        self.audience = audience;
        self
    }

    pub fn audience(&self) -> &Audience {
        &self.audience
    }

    /// `ws://` / `wss://` URL of the real-time endpoint.
    pub fn socket_url(&self) -> anyhow::Result<Url> {
        let mut url = self.endpoint("ws")?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow::anyhow!("cannot derive socket URL from {}", self.base))?;
        Ok(url)
    }

    pub async fn list(&self) -> anyhow::Result<Vec<Notification>> {
        let req = self.request(Method::GET, "notifications")?.query(&self.audience);
        send_json(req).await
    }

    pub async fn create(&self, new: &CreateNotification) -> anyhow::Result<Notification> {
        send_json(self.request(Method::POST, "notifications")?.json(new)).await
    }

    pub async fn mark_read(&self, id: Uuid) -> anyhow::Result<Notification> {
        let path = format!("notifications/{}/read", id);
        send_json(self.request(Method::PATCH, &path)?).await
    }

    pub async fn mark_all_read(&self) -> anyhow::Result<()> {
        let req = self
            .request(Method::POST, "notifications/mark-read-all")?
            .query(&self.audience);
        send(req).await?;
        Ok(())
    }

    pub async fn unread_count(&self) -> anyhow::Result<usize> {
        let req = self.request(Method::GET, "notifications/unread")?.query(&self.audience);
        let body: UnreadCount = send_json(req).await?;
        Ok(body.count)
    }

    pub async fn online_users(&self) -> anyhow::Result<Vec<String>> {
        let body: OnlineUsers = send_json(self.request(Method::GET, "auth/online-users")?).await?;
        Ok(body.user_ids)
    }

    fn endpoint(&self, path: &str) -> anyhow::Result<Url> {
        let mut base = self.base.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path).with_context(|| format!("invalid endpoint path: {}", path))
    }

    fn request(&self, method: Method, path: &str) -> anyhow::Result<RequestBuilder> {
        Ok(self.http.request(method, self.endpoint(path)?))
    }
}

#[async_trait]
impl ReadSync for ApiClient {
    async fn mark_read(&self, id: Uuid) -> anyhow::Result<()> {
        ApiClient::mark_read(self, id).await.map(|_| ())
    }

    async fn mark_all_read(&self) -> anyhow::Result<()> {
        ApiClient::mark_all_read(self).await
    }
}

async fn send(req: RequestBuilder) -> anyhow::Result<Response> {
    let resp = req.send().await.context("request failed")?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = match resp.json::<ErrorBody>().await {
        Ok(body) => body.error.message,
        Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
    };
    anyhow::bail!("server returned {}: {}", status.as_u16(), message)
}

async fn send_json<T: DeserializeOwned>(req: RequestBuilder) -> anyhow::Result<T> {
    send(req)
        .await?
        .json::<T>()
        .await
        .context("invalid response body")
}
