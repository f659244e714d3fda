//! Reconnecting realtime transport
//!
//! Maintains a long-lived WebSocket connection to the realtime endpoint.
//! Handles reconnection automatically with exponential backoff.
//!
//! The transport knows nothing about topics or resources: it moves text
//! frames in both directions and reports `Opened` after every successful
//! (re)connect. Frames sent with [`TransportHandle::send`] while
//! disconnected are queued and flushed in order once the connection is
//! back. Frames sent with [`TransportHandle::send_on_session`] are bound to
//! one connection and dropped if that connection is gone.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

/// Floor for the reconnect delay, so a zero setting cannot spin
const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(100);

/// Commands sent to the transport task
#[derive(Debug, Clone)]
pub enum TransportCommand {
    /// Send a text frame, queueing it if disconnected
    Send(String),
    /// Send a text frame on one connection only; dropped on any other
    SendOnSession { text: String, session: u64 },
    /// Close the connection and stop reconnecting
    Shutdown,
}

/// Events emitted by the transport task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection established; any server-side subscriptions are gone
    ///
    /// `session` counts successful connects, starting at 1.
    Opened { session: u64 },
    /// Text frame received
    Message(String),
    /// An open connection was lost
    Closed,
}

/// Connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected, waiting to retry or stopped
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Connected
    Connected,
}

/// Configuration for the realtime transport
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket URL
    pub url: String,
    /// Initial reconnect delay
    pub initial_reconnect_delay: Duration,
    /// Maximum reconnect delay
    pub max_reconnect_delay: Duration,
    /// Limit for a single connection attempt
    pub connect_timeout: Duration,
    /// Frames held while disconnected; the oldest are dropped beyond this
    pub max_pending: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_pending: 1024,
        }
    }
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Handle to control the transport task
pub struct TransportHandle {
    /// Send commands to the transport task
    pub command_tx: mpsc::Sender<TransportCommand>,
    /// Receive events from the transport task
    pub event_rx: mpsc::Receiver<TransportEvent>,
    /// Watch connection status
    pub status_rx: watch::Receiver<ConnectionStatus>,
}

impl TransportHandle {
    /// Queue a text frame for sending
    pub async fn send(&self, text: String) -> SyncResult<()> {
        self.command_tx
            .send(TransportCommand::Send(text))
            .await
            .map_err(|_| SyncError::TransportStopped)
    }

    /// Send a text frame only if connection `session` is still open
    pub async fn send_on_session(&self, text: String, session: u64) -> SyncResult<()> {
        self.command_tx
            .send(TransportCommand::SendOnSession { text, session })
            .await
            .map_err(|_| SyncError::TransportStopped)
    }

    /// Stop the transport task
    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(TransportCommand::Shutdown).await;
    }

    /// Get the current status
    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }
}

/// Spawn the transport task
///
/// The task connects immediately and keeps reconnecting until it receives
/// `Shutdown`, or until its command sender or event receiver is dropped.
pub fn spawn_transport(config: TransportConfig) -> TransportHandle {
    let (command_tx, command_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(256);
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);

    tokio::spawn(transport_loop(config, command_rx, event_tx, status_tx));

    TransportHandle {
        command_tx,
        event_rx,
        status_rx,
    }
}

/// How a single connection ended
enum SessionEnd {
    /// Shutdown requested or the owner went away
    Shutdown,
    /// Connection failed or dropped
    Lost {
        was_open: bool,
        error: Option<SyncError>,
    },
}

/// Main transport loop with reconnection
async fn transport_loop(
    config: TransportConfig,
    mut command_rx: mpsc::Receiver<TransportCommand>,
    event_tx: mpsc::Sender<TransportEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
) {
    let session_id = format!("resmirror-{}", &uuid::Uuid::new_v4().to_string()[..8]);
    let mut pending = VecDeque::new();
    let mut session = 0;
    let initial_delay = config.initial_reconnect_delay.max(MIN_RECONNECT_DELAY);
    let mut reconnect_delay = initial_delay;

    loop {
        let _ = status_tx.send(ConnectionStatus::Connecting);

        let end = run_session(
            &config,
            &session_id,
            &mut session,
            &mut pending,
            &mut command_rx,
            &event_tx,
            &status_tx,
        )
        .await;

        let _ = status_tx.send(ConnectionStatus::Disconnected);

        match end {
            SessionEnd::Shutdown => {
                info!("[{}] Transport stopped", session_id);
                break;
            }
            SessionEnd::Lost { was_open, error } => {
                if let Some(e) = error {
                    warn!("[{}] Realtime connection error: {}", session_id, e);
                }
                if was_open {
                    // Connection had been established, reset backoff
                    reconnect_delay = initial_delay;
                    if event_tx.send(TransportEvent::Closed).await.is_err() {
                        break;
                    }
                }
            }
        }

        debug!(
            "[{}] Reconnecting in {:?} ({} frames pending)",
            session_id,
            reconnect_delay,
            pending.len()
        );

        // Wait before reconnecting, but keep accepting commands
        let sleep = tokio::time::sleep(reconnect_delay);
        tokio::pin!(sleep);
        let stop = loop {
            tokio::select! {
                _ = &mut sleep => break false,
                cmd = command_rx.recv() => match cmd {
                    Some(TransportCommand::Send(text)) => {
                        enqueue(&mut pending, text, config.max_pending);
                    }
                    Some(TransportCommand::SendOnSession { session: stale, .. }) => {
                        debug!("[{}] Dropping frame for closed session {}", session_id, stale);
                    }
                    Some(TransportCommand::Shutdown) | None => break true,
                }
            }
        };
        if stop {
            info!("[{}] Transport stopped", session_id);
            break;
        }

        reconnect_delay = next_delay(reconnect_delay, config.max_reconnect_delay);
    }
}

/// Connect and pump frames until disconnection or shutdown
async fn run_session(
    config: &TransportConfig,
    session_id: &str,
    session: &mut u64,
    pending: &mut VecDeque<String>,
    command_rx: &mut mpsc::Receiver<TransportCommand>,
    event_tx: &mpsc::Sender<TransportEvent>,
    status_tx: &watch::Sender<ConnectionStatus>,
) -> SessionEnd {
    debug!("[{}] Connecting to {}", session_id, config.url);

    let ws_stream = match tokio::time::timeout(config.connect_timeout, connect_async(&config.url)).await
    {
        Ok(Ok((ws_stream, _response))) => ws_stream,
        Ok(Err(e)) => {
            return SessionEnd::Lost {
                was_open: false,
                error: Some(e.into()),
            }
        }
        Err(_) => {
            return SessionEnd::Lost {
                was_open: false,
                error: Some(SyncError::Timeout),
            }
        }
    };
    let (mut write, mut read) = ws_stream.split();

    *session += 1;
    info!("[{}] Connected to {} (session {})", session_id, config.url, session);
    let _ = status_tx.send(ConnectionStatus::Connected);
    if event_tx
        .send(TransportEvent::Opened { session: *session })
        .await
        .is_err()
    {
        write.close().await.ok();
        return SessionEnd::Shutdown;
    }

    // Flush frames queued while disconnected
    while let Some(text) = pending.pop_front() {
        if let Err(e) = write.send(Message::Text(text.clone())).await {
            pending.push_front(text);
            return SessionEnd::Lost {
                was_open: true,
                error: Some(e.into()),
            };
        }
    }

    loop {
        tokio::select! {
            cmd = command_rx.recv() => {
                match cmd {
                    Some(TransportCommand::Send(text)) => {
                        if let Err(e) = write.send(Message::Text(text.clone())).await {
                            pending.push_front(text);
                            return SessionEnd::Lost { was_open: true, error: Some(e.into()) };
                        }
                    }
                    Some(TransportCommand::SendOnSession { text, session: target }) => {
                        if target != *session {
                            debug!("[{}] Dropping frame for closed session {}", session_id, target);
                            continue;
                        }
                        if let Err(e) = write.send(Message::Text(text)).await {
                            return SessionEnd::Lost { was_open: true, error: Some(e.into()) };
                        }
                    }
                    Some(TransportCommand::Shutdown) | None => {
                        write.close().await.ok();
                        return SessionEnd::Shutdown;
                    }
                }
            }

            msg = read.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            debug!("[{}] Ignoring non-UTF-8 binary frame", session_id);
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        info!("[{}] Server closed the connection", session_id);
                        return SessionEnd::Lost { was_open: true, error: None };
                    }
                    Some(Err(e)) => {
                        return SessionEnd::Lost { was_open: true, error: Some(e.into()) };
                    }
                    // Ping/pong handled by tungstenite
                    Some(Ok(_)) => continue,
                };

                if event_tx.send(TransportEvent::Message(text)).await.is_err() {
                    write.close().await.ok();
                    return SessionEnd::Shutdown;
                }
            }
        }
    }
}

/// Queue a frame, dropping the oldest one when full
fn enqueue(pending: &mut VecDeque<String>, text: String, max_pending: usize) {
    if max_pending == 0 {
        return;
    }
    if pending.len() >= max_pending {
        pending.pop_front();
        warn!("Pending frame queue full, dropped oldest frame");
    }
    pending.push_back(text);
}

/// Exponential backoff step, never below the floor
fn next_delay(current: Duration, max: Duration) -> Duration {
    (current * 2)
        .max(MIN_RECONNECT_DELAY)
        .min(max.max(MIN_RECONNECT_DELAY))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TransportConfig::default();
        assert_eq!(config.initial_reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(30));
        assert_eq!(config.max_pending, 1024);
    }

    #[test]
    fn test_backoff_is_capped() {
        let max = Duration::from_secs(30);
        let mut delay = Duration::from_secs(1);
        let mut seen = Vec::new();
        for _ in 0..7 {
            delay = next_delay(delay, max);
            seen.push(delay.as_secs());
        }
        assert_eq!(seen, vec![2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn test_zero_delay_still_backs_off() {
        let delay = next_delay(Duration::ZERO, Duration::from_secs(30));
        assert_eq!(delay, MIN_RECONNECT_DELAY);
        assert_eq!(next_delay(delay, Duration::from_secs(30)), Duration::from_millis(200));
        assert_eq!(next_delay(Duration::ZERO, Duration::ZERO), MIN_RECONNECT_DELAY);
    }

    #[test]
    fn test_pending_queue_drops_oldest() {
        let mut pending = VecDeque::new();
        for i in 0..4 {
            enqueue(&mut pending, format!("frame-{}", i), 3);
        }
        assert_eq!(
            pending.into_iter().collect::<Vec<_>>(),
            vec!["frame-1", "frame-2", "frame-3"]
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_reports_disconnected() {
        let config = TransportConfig {
            url: "ws://127.0.0.1:1/realtime".to_string(),
            initial_reconnect_delay: Duration::from_millis(50),
            max_reconnect_delay: Duration::from_millis(100),
            connect_timeout: Duration::from_millis(500),
            max_pending: 8,
        };
        let handle = spawn_transport(config);

        handle.send("queued".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_ne!(handle.status(), ConnectionStatus::Connected);

        handle.shutdown().await;
    }
}
