use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    /// Postgres connection string. Unset = in-memory store.
    pub database_url: Option<String>,
    /// Email is disabled unless both SMTP_HOST and SMTP_FROM are set.
    pub smtp: Option<SmtpConfig>,
    /// Root of the portal UI, used for links inside emails.
    pub base_url: String,
    /// Browser origin allowed to call the REST API and open the socket.
    pub allowed_origin: String,
    /// Per-subscriber buffer of the broadcast channel.
    pub broadcast_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub tls: SmtpTls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpTls {
    /// TLS from the first byte (usually port 465).
    Implicit,
    /// Plain connection upgraded with STARTTLS (usually port 587).
    StartTls,
    /// No encryption. Local relays and test servers only.
    None,
}

impl SmtpTls {
    fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "implicit" | "tls" | "ssl" => SmtpTls::Implicit,
            "none" | "off" | "plain" => SmtpTls::None,
            _ => SmtpTls::StartTls,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: None,
            smtp: None,
            base_url: "http://localhost:3000".into(),
            allowed_origin: "http://localhost:3000".into(),
            broadcast_capacity: crate::realtime::broadcast::DEFAULT_CAPACITY,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

/// Build a config from any key lookup (the process env in production).
pub fn from_lookup<F>(get: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let defaults = Config::default();

    let smtp = match (non_empty("SMTP_HOST"), non_empty("SMTP_FROM")) {
        (Some(host), Some(from)) => {
            let tls = non_empty("SMTP_TLS")
                .map(|v| SmtpTls::parse(&v))
                .unwrap_or(SmtpTls::StartTls);
            let default_port = match tls {
                SmtpTls::Implicit => 465,
                SmtpTls::StartTls => 587,
                SmtpTls::None => 25,
            };
            Some(SmtpConfig {
                host,
                port: non_empty("SMTP_PORT")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default_port),
                username: non_empty("SMTP_USERNAME"),
                password: non_empty("SMTP_PASSWORD"),
                from,
                tls,
            })
        }
        (Some(_), None) => {
            tracing::warn!("SMTP_HOST is set but SMTP_FROM is not; email stays disabled");
            None
        }
        _ => None,
    };

    let base_url = non_empty("PORTAL_BASE_URL").unwrap_or(defaults.base_url);
    if url::Url::parse(&base_url).is_err() {
        anyhow::bail!("PORTAL_BASE_URL is not a valid URL: {}", base_url);
    }

    Ok(Config {
        port: non_empty("NOTIFIER_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port),
        database_url: non_empty("DATABASE_URL"),
        smtp,
        base_url,
        allowed_origin: non_empty("ALLOWED_ORIGIN").unwrap_or(defaults.allowed_origin),
        broadcast_capacity: non_empty("NOTIFIER_BROADCAST_CAPACITY")
            .and_then(|v| v.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(defaults.broadcast_capacity),
    })
}
