use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use notifier::client::live::{FeedUpdate, LiveFeed, LiveFeedConfig};
use notifier::client::reminders::{ReminderScheduler, ScheduledActivity};
use notifier::client::session::{Arrival, NotificationSession};
use notifier::client::ApiClient;
use notifier::config::{self, Config};
use notifier::models::notification::Notification;
use notifier::notification::classifier::Viewer;
use notifier::notification::email::EmailChannel;
use notifier::notification::service::{Audience, CreateNotification};
use notifier::store::memory::{MemoryStore, StaticDirectory};
use notifier::store::postgres::PgStore;
use notifier::store::{NotificationStore, ProjectDirectory};
use notifier::AppState;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "notifier"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "notifier=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Notify { server, command }) => {
            handle_notify_command(&server.server, command).await
        }
        Some(cli::Commands::Online { server }) => {
            let api = ApiClient::new(&server.server)?;
            let users = api.online_users().await?;
            if users.is_empty() {
                println!("Nobody is online.");
            } else {
                for user in users {
                    println!("{}", user);
                }
            }
            Ok(())
        }
        Some(cli::Commands::Watch {
            server,
            user_id,
            audience,
            projects,
            activities,
        }) => watch(&server.server, user_id, audience, projects, activities).await,
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    let (store, directory): (Arc<dyn NotificationStore>, Arc<dyn ProjectDirectory>) =
        match &cfg.database_url {
            Some(url) => {
                tracing::info!("Connecting to database...");
                let db = Arc::new(PgStore::connect(url).await?);
                tracing::info!("Running migrations...");
                db.migrate().await?;
                let store: Arc<dyn NotificationStore> = db.clone();
                let directory: Arc<dyn ProjectDirectory> = db;
                (store, directory)
            }
            None => {
                tracing::warn!("DATABASE_URL not set, notifications are kept in memory only");
                let store: Arc<dyn NotificationStore> = Arc::new(MemoryStore::new());
                let directory: Arc<dyn ProjectDirectory> =
                    Arc::new(StaticDirectory::new(HashMap::new()));
                (store, directory)
            }
        };

    let email = EmailChannel::from_config(cfg.smtp.as_ref());
    let state = Arc::new(AppState::new(cfg, store, directory, email));
    let app = notifier::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("notifier listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

fn audience(args: cli::AudienceArgs) -> Audience {
    Audience {
        leader_id: args.leader_id,
        leader_email: args.leader_email,
        participant_email: args.participant_email,
    }
}

fn print_notifications(list: &[Notification]) {
    if list.is_empty() {
        println!("No notifications.");
        return;
    }
    println!("{:<38} {:<6} {:<20} {:<24} MESSAGE", "ID", "READ", "CREATED", "TITLE");
    for n in list {
        println!(
            "{:<38} {:<6} {:<20} {:<24} {}",
            n.id,
            n.is_read,
            n.created_at.format("%Y-%m-%d %H:%M:%S"),
            n.title,
            n.message
        );
    }
}

async fn handle_notify_command(server: &str, cmd: cli::NotifyCommands) -> anyhow::Result<()> {
    let api = ApiClient::new(server)?;
    match cmd {
        cli::NotifyCommands::Send {
            title,
            message,
            project,
            recipient,
            actor,
            activity,
        } => {
            let created = api
                .create(&CreateNotification {
                    title,
                    message,
                    project,
                    recipient_email: recipient,
                    actor_email: actor,
                    activity_title: activity,
                })
                .await?;
            println!("Notification created:\n  ID:    {}\n  Title: {}", created.id, created.title);
        }
        cli::NotifyCommands::List { audience: args } => {
            let list = api.with_audience(audience(args)).list().await?;
            print_notifications(&list);
        }
        cli::NotifyCommands::Read { id } => {
            let id = uuid::Uuid::parse_str(&id).context("Invalid notification ID")?;
            let n = api.mark_read(id).await?;
            println!("Notification {} marked read.", n.id);
        }
        cli::NotifyCommands::ReadAll { audience: args } => {
            api.with_audience(audience(args)).mark_all_read().await?;
            println!("All notifications marked read.");
        }
    }
    Ok(())
}

async fn watch(
    server: &str,
    user_id: String,
    args: cli::AudienceArgs,
    projects: Vec<String>,
    activities: Option<PathBuf>,
) -> anyhow::Result<()> {
    let viewer = match (&args.participant_email, args.leader_id.is_some() || args.leader_email.is_some()) {
        (_, true) => Viewer::leader(args.leader_email.clone(), projects),
        (Some(email), false) => Viewer::participant(email.clone()),
        (None, false) => Viewer::Admin,
    };
    let api = ApiClient::new(server)?.with_audience(audience(args));
    let session = NotificationSession::new(viewer).with_sync(Arc::new(api.clone()));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let (reminder_tx, reminder_rx) = mpsc::unbounded_channel();
    let mut scheduler = ReminderScheduler::new(reminder_tx);
    let handle = LiveFeed::new(api, session, LiveFeedConfig::new(user_id))
        .with_updates(tx)
        .with_reminders(reminder_rx)
        .spawn();

    let mut scheduled: Option<Vec<ScheduledActivity>> = None;
    let mut reload = tokio::time::interval(Duration::from_secs(60));

    loop {
        tokio::select! {
            update = rx.recv() => match update {
                Some(update) => print_update(&update),
                None => break,
            },
            _ = reload.tick(), if activities.is_some() => {
                let Some(path) = &activities else { continue };
                match load_activities(path).await {
                    Ok(list) if scheduled.as_ref() != Some(&list) => {
                        let timers = scheduler.schedule(&list, chrono::Utc::now());
                        println!("* {} reminders scheduled for {} activities", timers, list.len());
                        scheduled = Some(list);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("failed to load activities: {:#}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    handle.stop();
    Ok(())
}

async fn load_activities(path: &Path) -> anyhow::Result<Vec<ScheduledActivity>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn print_update(update: &FeedUpdate) {
    match update {
        FeedUpdate::Connected => println!("* connected"),
        FeedUpdate::Disconnected => println!("* disconnected, reconnecting"),
        FeedUpdate::Hydrated { count } => println!("* {} notifications in feed", count),
        FeedUpdate::Notification {
            notification,
            arrival,
        } => match arrival {
            Arrival::Toasted => println!("[toast] {}: {}", notification.title, notification.message),
            Arrival::Added => println!("[feed]  {}: {}", notification.title, notification.message),
            Arrival::Duplicate | Arrival::Irrelevant => {}
        },
        FeedUpdate::Read { ids } => println!("* {} marked read", ids.len()),
        FeedUpdate::Online(users) => println!("* online: {}", users.join(", ")),
    }
}
