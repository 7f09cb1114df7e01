//! Clinic Sync CLI
//!
//! Command-line front end for the realtime client:
//! - Watch a clinic's live event stream
//! - Generate a default config file

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use clinic_sync::config::{generate_default_config, Config};
use clinic_sync::events::{
    refresh_fn, CurrentAppointmentHint, EventName, FlushBatch, RefreshAction, RefreshBatcher,
    Subscription,
};
use clinic_sync::realtime::{
    ConnectionIndicator, ConnectionManager, ConnectionState, ConnectionStatus, Room,
    RoomMembership,
};
use clinic_sync::session::Session;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "clinic-sync")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Realtime sync client for the clinic reception dashboard")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect and follow live events until Ctrl-C (Enter retries a failed connection)
    Watch {
        /// Bearer token
        #[arg(long, env = "CLINIC_SYNC_TOKEN", hide_env_values = true)]
        token: String,
        /// Realtime server URL (overrides config)
        #[arg(long)]
        url: Option<String>,
        /// Clinic queue rooms to join
        #[arg(long = "clinic")]
        clinics: Vec<u64>,
        /// Doctor queue rooms to join
        #[arg(long = "doctor")]
        doctors: Vec<u64>,
        /// Dashboard endpoint to re-fetch after each event burst (overrides config)
        #[arg(long)]
        refresh_url: Option<String>,
        /// Report navigation hints addressed to this user
        #[arg(long)]
        user_id: Option<u64>,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            token,
            url,
            clinics,
            doctors,
            refresh_url,
            user_id,
        } => {
            let mut config = match &cli.config {
                Some(path) => Config::load_with_env(path)?,
                None => Config::load_default(),
            };
            if let Some(url) = url {
                config.realtime.url = url;
            }
            if refresh_url.is_some() {
                config.refresh.dashboard_url = refresh_url;
            }
            clinic_sync::logging::init(&config.logging).context("failed to initialize logging")?;

            let rooms: RoomMembership = clinics
                .into_iter()
                .map(Room::clinic_queue)
                .chain(doctors.into_iter().map(Room::doctor_queue))
                .collect();

            watch(config, token, rooms, user_id).await?;
        }

        Commands::Config { output } => {
            let config = generate_default_config();

            match output {
                Some(path) => {
                    // Create parent directory if needed
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &config)
                        .with_context(|| format!("failed to write {:?}", path))?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", config);
                }
            }
        }
    }

    Ok(())
}

async fn watch(
    config: Config,
    token: String,
    rooms: RoomMembership,
    user_id: Option<u64>,
) -> anyhow::Result<()> {
    tracing::info!(
        "Clinic Sync v{} connecting to {}",
        env!("CARGO_PKG_VERSION"),
        config.realtime.url
    );

    let session = Session::new();
    let manager = ConnectionManager::websocket(&config.realtime, session.clone());

    let _event_log: Vec<Subscription> = EventName::ALL
        .iter()
        .map(|&event| {
            manager.on(event, move |payload| {
                tracing::info!(event = %event, payload = %payload, "Event received");
            })
        })
        .collect();

    let _hints = manager.on(EventName::CurrentAppointmentAvailable, move |payload| {
        match (CurrentAppointmentHint::from_payload(payload), user_id) {
            (Some(hint), Some(user_id)) if hint.is_for(user_id) => {
                tracing::info!(navigate = hint.navigate, "Current appointment available for this user");
            }
            (Some(_), _) => {}
            (None, _) => tracing::debug!(payload = %payload, "Navigation hint without target user"),
        }
    });

    let action: Arc<dyn RefreshAction> = match &config.refresh.dashboard_url {
        Some(url) => Arc::new(DashboardRefresh {
            client: reqwest::Client::new(),
            url: url.clone(),
            session: session.clone(),
        }),
        None => Arc::new(refresh_fn(|batch: FlushBatch| {
            tracing::info!(labels = ?batch.labels, "Dashboard data changed");
        })),
    };
    let batcher = Arc::new(RefreshBatcher::with_action(
        config.refresh.debounce_window(),
        action,
    ));
    let _refresh = batcher.watch(&manager, &EventName::DASHBOARD);

    let binding = manager.bind_session();
    session.login(token);

    let mut status = manager.watch_status();
    let mut last_state = status.borrow().state;
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = status.borrow_and_update().clone();
                report(&snapshot);
                if entered_connected(last_state, snapshot.state) {
                    let joined = rooms.rejoin(&manager);
                    tracing::info!(rooms = joined, "Rooms joined");
                }
                last_state = snapshot.state;
            }
            line = input.next_line(), if stdin_open => match line {
                Ok(Some(_)) => {
                    if retry_requested(&manager.status()) {
                        tracing::info!("Retrying connection");
                        manager.reconnect();
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::debug!(error = %e, "Stdin closed");
                    stdin_open = false;
                }
            },
            result = &mut shutdown => {
                result.context("failed to listen for Ctrl-C")?;
                tracing::info!("Shutting down...");
                break;
            }
        }
    }

    session.logout();
    manager.disconnect();
    batcher.cancel();
    binding.abort();

    tracing::info!("Clinic Sync shutdown complete");
    Ok(())
}

/// Rooms are joined once per transition into Connected
fn entered_connected(previous: ConnectionState, current: ConnectionState) -> bool {
    current == ConnectionState::Connected && previous != ConnectionState::Connected
}

/// Enter only restarts the connection when the badge offers a retry
fn retry_requested(status: &ConnectionStatus) -> bool {
    status.indicator() == ConnectionIndicator::RetryAvailable
}

fn report(status: &ConnectionStatus) {
    match status.state {
        ConnectionState::Reconnecting => tracing::warn!(
            attempt = status.attempts,
            delay_ms = status.next_delay.map(|d| d.as_millis() as u64),
            error = status.last_error.as_deref().unwrap_or(""),
            "Reconnecting"
        ),
        ConnectionState::Failed => tracing::error!(
            "{}; press Enter to retry",
            status.last_error.as_deref().unwrap_or("Connection failed")
        ),
        state => tracing::info!(state = %state, indicator = ?status.indicator(), "Connection status"),
    }
}

/// Re-fetches the dashboard aggregates after each flushed burst
struct DashboardRefresh {
    client: reqwest::Client,
    url: String,
    session: Session,
}

#[async_trait]
impl RefreshAction for DashboardRefresh {
    async fn refresh(&self, batch: FlushBatch) {
        let mut request = self.client.get(&self.url);
        if let Some(token) = self.session.credential().usable_token() {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<serde_json::Value>().await {
                Ok(stats) => tracing::info!(
                    labels = ?batch.labels,
                    flushed_at = %batch.flushed_at,
                    stats = %stats,
                    "Dashboard refreshed"
                ),
                Err(e) => tracing::warn!(error = %e, "Dashboard response was not JSON"),
            },
            Ok(resp) => tracing::warn!(status = %resp.status(), "Dashboard refresh rejected"),
            Err(e) => tracing::warn!(error = %e, "Dashboard refresh failed"),
        }
    }
}
