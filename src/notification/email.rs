use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{SmtpConfig, SmtpTls};

/// Upper bound on a single send, connection included.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("failed to build message: {0}")]
    Message(String),

    #[error("smtp error: {0}")]
    Transport(String),

    #[error("send timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Abstraction over mail delivery backends.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError>;
}

/// SMTP delivery through lettre.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn from_config(cfg: &SmtpConfig) -> Result<Self, MailError> {
        let from: Mailbox = cfg.from.parse().map_err(|e: lettre::address::AddressError| {
            MailError::InvalidAddress {
                address: cfg.from.clone(),
                reason: e.to_string(),
            }
        })?;

        let mut builder = match cfg.tls {
            SmtpTls::Implicit => AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host)
                .map_err(|e| MailError::Transport(e.to_string()))?,
            SmtpTls::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
                .map_err(|e| MailError::Transport(e.to_string()))?,
            SmtpTls::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.host),
        };
        builder = builder.port(cfg.port).timeout(Some(DEFAULT_SEND_TIMEOUT));
        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let to: Mailbox = mail.to.parse().map_err(|e: lettre::address::AddressError| {
            MailError::InvalidAddress {
                address: mail.to.clone(),
                reason: e.to_string(),
            }
        })?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(mail.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body.clone())
            .map_err(|e| MailError::Message(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;
        Ok(())
    }
}

/// Best-effort email delivery next to the real-time broadcast.
///
/// One attempt per call, no retry queue, and no error ever reaches the
/// caller. Without a transport every call is a silent no-op.
#[derive(Clone)]
pub struct EmailChannel {
    transport: Option<Arc<dyn MailTransport>>,
    timeout: Duration,
}

impl EmailChannel {
    pub fn new(transport: Arc<dyn MailTransport>) -> Self {
        Self {
            transport: Some(transport),
            timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn disabled() -> Self {
        Self {
            transport: None,
            timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build from configuration. Missing or broken SMTP settings disable the
    /// channel; this is the only place that gets logged.
    pub fn from_config(cfg: Option<&SmtpConfig>) -> Self {
        match cfg {
            None => {
                info!("SMTP not configured, email notifications disabled");
                Self::disabled()
            }
            Some(cfg) => match SmtpMailer::from_config(cfg) {
                Ok(mailer) => {
                    info!(host = %cfg.host, port = cfg.port, "SMTP email notifications enabled");
                    Self::new(Arc::new(mailer))
                }
                Err(e) => {
                    warn!(error = %e, "SMTP config error, email notifications disabled");
                    Self::disabled()
                }
            },
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    /// Attempt delivery once. Never fails.
    pub async fn send_best_effort(&self, to: &str, subject: &str, body: &str) {
        let Some(transport) = &self.transport else {
            return;
        };

        let mail = OutgoingMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        };

        match tokio::time::timeout(self.timeout, transport.send(&mail)).await {
            Ok(Ok(())) => info!(to, subject, "email sent"),
            Ok(Err(e)) => warn!(to, subject, error = %e, "email delivery failed"),
            Err(_) => warn!(
                to,
                subject,
                error = %MailError::Timeout(self.timeout),
                "email delivery failed"
            ),
        }
    }

    /// Fire-and-forget variant of [`EmailChannel::send_best_effort`].
    pub fn dispatch(&self, to: String, subject: String, body: String) -> Option<JoinHandle<()>> {
        if !self.is_enabled() {
            debug!(to = %to, "email channel disabled, skipping");
            return None;
        }
        let channel = self.clone();
        Some(tokio::spawn(async move {
            channel.send_best_effort(&to, &subject, &body).await;
        }))
    }
}
