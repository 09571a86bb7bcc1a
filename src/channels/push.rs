use std::iter::Take;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::constants::{
    DEFAULT_BASE_RECONNECT_DELAY_MS, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_MAX_RECONNECT_ATTEMPTS,
    DEFAULT_MAX_RECONNECT_DELAY_MS, EVENT_ERROR, EVENT_JOIN, EVENT_NOTIFICATION,
};
use crate::errors::Error;
use crate::models::notification::Notification;

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub socket_url: String,
    pub token: String,
    pub user_id: String,
    pub auto_reconnect: bool,
    pub max_reconnect_attempts: usize,
    pub base_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub connect_timeout: Duration,
}

impl PushConfig {
    pub fn new(socket_url: &str, token: &str, user_id: &str) -> Self {
        Self {
            socket_url: socket_url.to_string(),
            token: token.to_string(),
            user_id: user_id.to_string(),
            auto_reconnect: true,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            base_reconnect_delay: Duration::from_millis(DEFAULT_BASE_RECONNECT_DELAY_MS),
            max_reconnect_delay: Duration::from_millis(DEFAULT_MAX_RECONNECT_DELAY_MS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Lifecycle and payload events surfaced to the reconciliation engine.
#[derive(Debug, Clone)]
pub enum PushEvent {
    Connected,
    Disconnected { reason: String },
    Notification(Notification),
    ChannelError(String),
}

/// JSON text frame shared by both directions: `{"event": "...", "data": ...}`.
#[derive(Debug, Serialize, Deserialize)]
struct WireFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

enum SessionEnd {
    Shutdown,
    Dropped(String),
}

/// Long-lived websocket connection with bounded reconnect. Constructed by and
/// owned by the engine; there is no ambient global handle.
pub struct PushChannel {
    config: PushConfig,
}

pub struct PushHandle {
    shutdown_tx: watch::Sender<bool>,
    status_rx: watch::Receiver<ConnectionStatus>,
    task: tokio::task::JoinHandle<()>,
}

impl PushHandle {
    /// Deterministic teardown: stops the reconnect loop and closes the socket.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Backstop for teardown paths that must not wait on the socket.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    pub fn status_receiver(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }
}

impl PushChannel {
    pub fn new(config: PushConfig) -> Self {
        Self { config }
    }

    /// Spawn the connection task; events arrive on the returned receiver in
    /// receipt order.
    pub fn spawn(self) -> (PushHandle, mpsc::UnboundedReceiver<PushEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let task = tokio::spawn(self.run(event_tx, shutdown_rx, status_tx));
        (
            PushHandle {
                shutdown_tx,
                status_rx,
                task,
            },
            event_rx,
        )
    }

    async fn run(
        self,
        events: mpsc::UnboundedSender<PushEvent>,
        mut shutdown: watch::Receiver<bool>,
        status: watch::Sender<ConnectionStatus>,
    ) {
        let mut delays = Self::reconnect_delays(&self.config);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_session(&events, &mut shutdown, &status).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Dropped(reason)) => {
                    let _ = status.send(ConnectionStatus::Disconnected);
                    let _ = events.send(PushEvent::Disconnected { reason });
                    // A session that made it to connected restores the budget.
                    delays = Self::reconnect_delays(&self.config);
                }
                Err(err) => {
                    let _ = status.send(ConnectionStatus::Disconnected);
                    let _ = events.send(PushEvent::Disconnected {
                        reason: err.to_string(),
                    });
                }
            }

            if !self.config.auto_reconnect {
                break;
            }
            let Some(delay) = delays.next() else {
                tracing::warn!("push channel reconnect budget exhausted, staying disconnected");
                break;
            };

            tracing::info!("push channel reconnecting in {delay:?}");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        let _ = status.send(ConnectionStatus::Disconnected);
    }

    async fn run_session(
        &self,
        events: &mpsc::UnboundedSender<PushEvent>,
        shutdown: &mut watch::Receiver<bool>,
        status: &watch::Sender<ConnectionStatus>,
    ) -> Result<SessionEnd, Error> {
        let url = self.connect_url()?;

        let _ = status.send(ConnectionStatus::Connecting);
        tracing::debug!("push channel connecting to {}", self.config.socket_url);

        let ws_stream = tokio::select! {
            result = timeout(self.config.connect_timeout, tokio_tungstenite::connect_async(url.as_str())) => {
                match result {
                    Ok(Ok((stream, _response))) => stream,
                    Ok(Err(err)) => return Err(err.into()),
                    Err(_) => return Err(Error::ConnectTimeout(self.config.connect_timeout)),
                }
            }
            _ = shutdown.changed() => return Ok(SessionEnd::Shutdown),
        };

        let (mut write, mut read) = ws_stream.split();

        // Scope server-side delivery to this user before anything else.
        let join = WireFrame {
            event: EVENT_JOIN.to_string(),
            data: serde_json::Value::String(self.config.user_id.clone()),
        };
        write.send(WsMessage::Text(serde_json::to_string(&join)?)).await?;

        let _ = status.send(ConnectionStatus::Connected);
        let _ = events.send(PushEvent::Connected);
        tracing::info!("push channel connected for user {}", self.config.user_id);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => self.handle_frame(&text, events),
                        Some(Ok(WsMessage::Close(frame))) => {
                            let reason = frame
                                .map(|f| f.reason.to_string())
                                .unwrap_or_else(|| "closed by server".to_string());
                            return Ok(SessionEnd::Dropped(reason));
                        }
                        // Ping/pong are answered by the protocol layer; binary
                        // frames are not part of the wire contract.
                        Some(Ok(_)) => {}
                        Some(Err(err)) => return Ok(SessionEnd::Dropped(err.to_string())),
                        None => return Ok(SessionEnd::Dropped("stream ended".to_string())),
                    }
                }
            }
        }
    }

    fn handle_frame(&self, text: &str, events: &mpsc::UnboundedSender<PushEvent>) {
        let frame: WireFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!("discarding unparseable push frame: {err}");
                return;
            }
        };

        match frame.event.as_str() {
            EVENT_NOTIFICATION => match serde_json::from_value::<Notification>(frame.data) {
                Ok(notification) => {
                    let _ = events.send(PushEvent::Notification(notification));
                }
                Err(err) => tracing::warn!("malformed notification payload: {err}"),
            },
            EVENT_ERROR => {
                let _ = events.send(PushEvent::ChannelError(frame.data.to_string()));
            }
            other => tracing::debug!("ignoring push event {other:?}"),
        }
    }

    /// Token travels at connect time, same as the REST bearer. Parsing the
    /// endpoint normalizes a path-less URL to "/"; the handshake request
    /// target needs the leading slash.
    fn connect_url(&self) -> Result<reqwest::Url, Error> {
        let mut url = reqwest::Url::parse(&self.config.socket_url)
            .map_err(|err| Error::invalid_url(&self.config.socket_url, &err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("token", &self.config.token);
        Ok(url)
    }

    fn reconnect_delays(config: &PushConfig) -> Take<ExponentialBackoff> {
        let base_ms = config.base_reconnect_delay.as_millis() as u64;
        ExponentialBackoff::from_millis(2)
            .factor((base_ms / 2).max(1))
            .max_delay(config.max_reconnect_delay)
            .take(config.max_reconnect_attempts)
    }
}
