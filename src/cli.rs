use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// notifier: notification fan-out and presence for the extension portal
#[derive(Parser)]
#[command(name = "notifier", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP + WebSocket server
    Serve {
        /// Port to bind (overrides NOTIFIER_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Work with notifications on a running server
    Notify {
        #[command(flatten)]
        server: ServerArgs,
        #[command(subcommand)]
        command: NotifyCommands,
    },

    /// List users with a live connection
    Online {
        #[command(flatten)]
        server: ServerArgs,
    },

    /// Connect to the live feed and print events as they arrive
    Watch {
        #[command(flatten)]
        server: ServerArgs,
        /// User id announced with `identify`
        #[arg(long)]
        user_id: String,
        #[command(flatten)]
        audience: AudienceArgs,
        /// Projects led by the watching leader (repeatable)
        #[arg(long = "project")]
        projects: Vec<String>,
        /// JSON file of `{id, title, startsAt, endsAt}` activities to raise
        /// reminders for; re-read every minute
        #[arg(long)]
        activities: Option<PathBuf>,
    },
}

#[derive(Args)]
pub struct ServerArgs {
    /// Base URL of the notifier server
    #[arg(long, env = "NOTIFIER_URL", default_value = "http://localhost:8080")]
    pub server: String,
}

/// Whose feed to look at. No flags means the administrator view.
#[derive(Args, Clone, Default)]
pub struct AudienceArgs {
    #[arg(long)]
    pub leader_id: Option<String>,
    #[arg(long)]
    pub leader_email: Option<String>,
    #[arg(long)]
    pub participant_email: Option<String>,
}

#[derive(Subcommand)]
pub enum NotifyCommands {
    /// Create a notification
    Send {
        #[arg(long)]
        title: String,
        #[arg(long)]
        message: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        recipient: Option<String>,
        #[arg(long)]
        actor: Option<String>,
        #[arg(long)]
        activity: Option<String>,
    },
    /// List a feed, newest first
    List {
        #[command(flatten)]
        audience: AudienceArgs,
    },
    /// Mark one notification read
    Read { id: String },
    /// Mark a whole feed read
    ReadAll {
        #[command(flatten)]
        audience: AudienceArgs,
    },
}
