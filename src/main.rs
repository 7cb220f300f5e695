//! # parley
//!
//! Messaging hub binary: loads settings, opens the database, starts the hub
//! and the HTTP/WebSocket server, and drains both on ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use parley_core::ids::UserId;
use parley_server::auth::{AuthChain, JwtAuthenticator, SessionAuthenticator};
use parley_server::hub::{Hub, HubConfig};
use parley_server::server::ParleyServer;
use parley_server::settings::{load_settings, ParleySettings};
use parley_server::shutdown::ShutdownCoordinator;
use parley_store::{Database, SessionRepo, SqliteMessageStore};
use parley_telemetry::{init_telemetry, TelemetryConfig};

/// Real-time messaging hub.
#[derive(Parser, Debug)]
#[command(name = "parley", about = "Real-time messaging hub")]
struct Cli {
    /// Path to a JSON settings file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` database (overrides settings).
    #[arg(long)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a session token for a user and print it.
    IssueSession {
        user_id: i64,

        /// Lifetime in seconds. Omit for a token that never expires.
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
}

impl Cli {
    fn apply(&self, settings: &mut ParleySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(path) = &self.db_path {
            settings.storage.db_path.clone_from(path);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = load_settings(cli.config.as_deref()).context("failed to load settings")?;
    cli.apply(&mut settings);

    let telemetry = TelemetryConfig::from_level_str(&settings.logging.level, settings.logging.json)
        .context("invalid log level")?;
    init_telemetry(&telemetry).context("failed to initialize logging")?;

    let db = Database::open(&settings.storage.db_path).with_context(|| {
        format!(
            "failed to open database at {}",
            settings.storage.db_path.display()
        )
    })?;
    let sessions = SessionRepo::new(db.clone());

    if let Some(Command::IssueSession { user_id, ttl_secs }) = cli.command {
        let token = sessions
            .create(UserId::new(user_id), ttl_secs.map(Duration::from_secs))
            .context("failed to create session")?;
        println!("{token}");
        return Ok(());
    }

    serve(settings, db, sessions).await
}

async fn serve(settings: ParleySettings, db: Database, sessions: SessionRepo) -> Result<()> {
    let shutdown = ShutdownCoordinator::new();

    let store = Arc::new(SqliteMessageStore::new(db));
    let (hub, hub_handle) = Hub::new(store, HubConfig::from_settings(&settings), shutdown.token());
    let hub_task = hub.spawn();

    let mut auth = AuthChain::new().with(SessionAuthenticator::new(sessions));
    if let Some(secret) = settings.auth.jwt_secret.as_deref() {
        auth = auth.with(JwtAuthenticator::new(secret));
        info!("jwt authentication enabled");
    }

    let mut server = ParleyServer::new(
        settings.server.clone(),
        hub_handle,
        Arc::new(auth),
        shutdown.clone(),
    );
    match parley_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => warn!(error = %e, "metrics recorder unavailable, /metrics disabled"),
    }

    let (addr, server_task) = server.listen().await.context("failed to start server")?;
    info!(%addr, "parley ready");

    shutdown.wait_for_signal().await;
    info!("shutting down");
    shutdown.drain(vec![server_task, hub_task], None).await;
    info!("shutdown complete");
    Ok(())
}
