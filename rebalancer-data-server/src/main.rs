use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use rebalancer_data::{
    AccountState, DashboardConfig, DashboardSnapshot, DatasetKind, ReconciliationSession,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::broadcast,
    time::interval,
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Messages pushed to WebSocket clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Welcome {
        message: &'static str,
        timestamp: DateTime<Utc>,
        snapshot: DashboardSnapshot,
    },
    Refreshed {
        dataset: DatasetKind,
        timestamp: DateTime<Utc>,
        snapshot: DashboardSnapshot,
    },
}

/// Commands accepted from WebSocket clients.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientCommand {
    /// Show the sentiment history of another asset.
    SelectAsset { asset: String },
    /// Wallet/session state changed.
    Account(AccountState),
    /// Re-resolve every dataset now.
    Refresh,
}

/// Server-only settings.
#[derive(Debug, Clone, PartialEq)]
struct ServerConfig {
    addr: SocketAddr,
    buffer_size: usize,
    refresh_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 9002)),
            buffer_size: 256,
            refresh_interval: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Self {
            addr: lookup("WS_ADDR")
                .and_then(|addr| addr.trim().parse().ok())
                .unwrap_or(defaults.addr),
            buffer_size: lookup("WS_BUFFER_SIZE")
                .and_then(|size| size.trim().parse().ok())
                .filter(|size| *size > 0)
                .unwrap_or(defaults.buffer_size),
            refresh_interval: lookup("REFRESH_INTERVAL_SECS")
                .and_then(|secs| secs.trim().parse().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.refresh_interval),
        }
    }
}

/// Initial account state, standing in for the wallet collaborator until a client sends one.
fn account_from_lookup<F>(lookup: F) -> AccountState
where
    F: Fn(&str) -> Option<String>,
{
    let flag = |key: &str| {
        lookup(key)
            .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
    };

    if flag("DASHBOARD_DEMO").unwrap_or(false) {
        return AccountState::demo();
    }

    let account_id = lookup("DASHBOARD_ACCOUNT_ID")
        .map(|account| account.trim().to_string())
        .filter(|account| !account.is_empty());

    match (account_id, flag("DASHBOARD_SIGNED_IN").unwrap_or(true)) {
        (Some(account_id), true) => AccountState::signed_in(account_id),
        _ => AccountState::anonymous(),
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging
    init_logging();

    info!("Starting rebalancer-data WebSocket server");

    let lookup = |key: &str| std::env::var(key).ok();
    let config = DashboardConfig::from_env();
    let server = ServerConfig::from_lookup(lookup);
    let account = account_from_lookup(lookup);

    info!(?config, ?server, ?account, "configuration loaded");

    let session = Arc::new(ReconciliationSession::from_config(&config, account));

    let (tx, _rx) = broadcast::channel::<ServerMessage>(server.buffer_size);
    let tx = Arc::new(tx);

    // Forward session notifications to every client
    tokio::spawn(forward_refreshed(session.clone(), tx.clone()));

    tokio::spawn(start_websocket_server(server.addr, session.clone(), tx.clone()));

    info!("WebSocket server listening on ws://{}", server.addr);

    let mut ticker = interval(server.refresh_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                session.refresh().await;
                let snapshot = session.snapshot();
                info!(
                    mode = %snapshot.mode,
                    simulated = snapshot.is_simulated(),
                    clients = tx.receiver_count(),
                    "dashboard refreshed"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }
}

/// Relay every "refreshed" notification, with the latest snapshot, to the client broadcast.
async fn forward_refreshed(
    session: Arc<ReconciliationSession>,
    tx: Arc<broadcast::Sender<ServerMessage>>,
) {
    let mut refreshed = session.subscribe();

    loop {
        match refreshed.recv().await {
            Ok(dataset) => {
                let message = ServerMessage::Refreshed {
                    dataset,
                    timestamp: Utc::now(),
                    snapshot: session.snapshot(),
                };

                // No connected clients is not an error
                if let Ok(count) = tx.send(message) {
                    debug!(%dataset, receivers = count, "refreshed sent");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Refresh forwarder lagged, skipped {} notifications", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                info!("Session notification channel closed");
                break;
            }
        }
    }
}

/// Start WebSocket server that publishes dashboard snapshots to connected clients
async fn start_websocket_server(
    addr: SocketAddr,
    session: Arc<ReconciliationSession>,
    tx: Arc<broadcast::Sender<ServerMessage>>,
) {
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind WebSocket server to {}: {}", addr, e);
            return;
        }
    };

    info!("WebSocket server bound to {}", addr);

    while let Ok((stream, peer_addr)) = listener.accept().await {
        info!("New WebSocket connection from {}", peer_addr);
        tokio::spawn(handle_client(stream, peer_addr, session.clone(), tx.clone()));
    }
}

async fn handle_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    session: Arc<ReconciliationSession>,
    tx: Arc<broadcast::Sender<ServerMessage>>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", peer_addr, e);
            return;
        }
    };

    info!("WebSocket handshake completed for {}", peer_addr);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut rx = tx.subscribe();

    // Send welcome message with whatever is cached right now
    let welcome = ServerMessage::Welcome {
        message: "Connected to rebalancer dashboard feed",
        timestamp: Utc::now(),
        snapshot: session.snapshot(),
    };
    if let Ok(msg) = serde_json::to_string(&welcome) {
        let _ = ws_sender.send(Message::Text(msg.into())).await;
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    if let Ok(json) = serde_json::to_string(&message) {
                        if ws_sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Each message carries a full snapshot, so skipping is lossless
                    warn!("Client {} lagged, skipped {} messages", peer_addr, skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Broadcast channel closed for {}", peer_addr);
                    break;
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) => {
                    debug!("Received ping from {}", peer_addr);
                }
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(command) => {
                        info!(?command, "Command from {}", peer_addr);
                        tokio::spawn(apply_command(session.clone(), command));
                    }
                    Err(e) => {
                        warn!("Ignoring unrecognised message from {}: {}", peer_addr, e);
                    }
                },
                Err(e) => {
                    error!("WebSocket error for {}: {}", peer_addr, e);
                    break;
                }
                _ => {}
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => {
            info!("Send task completed for {}", peer_addr);
        }
        _ = &mut recv_task => {
            info!("Receive task completed for {}", peer_addr);
        }
    }

    info!("WebSocket connection closed for {}", peer_addr);
}

/// Apply a client command. Results arrive at every client through the refreshed broadcast.
async fn apply_command(session: Arc<ReconciliationSession>, command: ClientCommand) {
    match command {
        ClientCommand::SelectAsset { asset } => session.select_asset(&asset).await,
        ClientCommand::Account(account) => {
            session.set_account(account).await;
        }
        ClientCommand::Refresh => session.refresh().await,
    }
}

/// Initialize logging
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
