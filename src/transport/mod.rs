//! Push channel to the decision/trust feeds.
//!
//! One `TransportChannel` owns one persistent connection and its reconnect
//! lifecycle: capped exponential backoff with jitter and a hard retry budget.
//! After the budget is spent, or after an explicit `ERROR` frame from the
//! remote side, the channel stays offline until the caller opens a new one
//! (normally after re-authentication). Malformed frames are logged and
//! dropped; they never tear the connection down.

pub mod frame;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ReconnectPolicy;
use crate::error::{Result, ZtError};
use crate::transport::frame::{parse_frame, Frame};
use crate::types::{DecisionEvent, TrustSnapshot};

/// Connection status, as displayed by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Connecting,
    Live,
    Offline,
}

/// Event emitted by a channel for the session loop to route.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Trust(TrustSnapshot),
    Decision(DecisionEvent),
    /// The remote side rejected the session; the channel has stopped.
    Unauthorized,
}

/// Which feed this channel consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    /// Session-scoped trust feed; requests a snapshot on open.
    Trust,
    /// Broadcast decision feed.
    Decisions,
}

/// One live connection: a text sink and an ordered text source.
#[async_trait]
pub trait PushConnection: Send {
    async fn send_text(&mut self, text: &str) -> Result<()>;

    /// Next inbound text frame. `None` means the peer closed; `Some(Err)` is
    /// a transport fault. Both trigger a reconnect.
    async fn next_text(&mut self) -> Option<Result<String>>;
}

/// Connection factory. The production implementation is [`WsSocket`]; tests
/// script their own.
#[async_trait]
pub trait PushSocket: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn PushConnection>>;
}

/// WebSocket implementation over tokio-tungstenite.
pub struct WsSocket;

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushSocket for WsSocket {
    async fn connect(&self, url: &Url) -> Result<Box<dyn PushConnection>> {
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ZtError::Transport(format!("connect {url}: {e}")))?;
        Ok(Box::new(WsConnection { stream }))
    }
}

#[async_trait]
impl PushConnection for WsConnection {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.stream
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|e| ZtError::Transport(format!("send: {e}")))
    }

    async fn next_text(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                // Control and binary frames carry no feed state.
                Ok(_) => continue,
                Err(e) => return Some(Err(ZtError::Transport(format!("read: {e}")))),
            }
        }
    }
}

/// Handle to a running channel task.
pub struct TransportChannel {
    status_rx: watch::Receiver<ChannelStatus>,
    shutdown_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl TransportChannel {
    /// Spawn the channel task. Events arrive on the returned receiver in
    /// feed order.
    pub fn spawn(
        socket: std::sync::Arc<dyn PushSocket>,
        url: Url,
        feed: FeedKind,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (status_tx, status_rx) = watch::channel(ChannelStatus::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_channel(
            socket,
            url,
            feed,
            policy,
            event_tx,
            status_tx,
            shutdown_rx,
        ));

        (
            Self {
                status_rx,
                shutdown_tx,
                task,
            },
            event_rx,
        )
    }

    pub fn status(&self) -> ChannelStatus {
        *self.status_rx.borrow()
    }

    /// Watch handle for status transitions.
    pub fn status_watch(&self) -> watch::Receiver<ChannelStatus> {
        self.status_rx.clone()
    }

    /// Stop the channel, cancelling any in-flight reconnect timer.
    pub async fn close(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

async fn run_channel(
    socket: std::sync::Arc<dyn PushSocket>,
    url: Url,
    feed: FeedKind,
    policy: ReconnectPolicy,
    events: mpsc::Sender<TransportEvent>,
    status: watch::Sender<ChannelStatus>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }
        let _ = status.send(ChannelStatus::Connecting);

        let connected = tokio::select! {
            conn = socket.connect(&url) => conn,
            _ = shutdown.changed() => break,
        };

        match connected {
            Ok(mut conn) => {
                attempt = 0;
                let _ = status.send(ChannelStatus::Live);
                info!(?feed, "push channel live");

                if feed == FeedKind::Trust {
                    // Ask for an immediate trust push rather than waiting for
                    // the next server-side change.
                    if let Err(e) = conn.send_text("SNAPSHOT").await {
                        warn!(error = %e, "snapshot request failed");
                    }
                }

                match read_loop(&mut *conn, &events, &mut shutdown).await {
                    ReadExit::Unauthorized => {
                        let _ = status.send(ChannelStatus::Offline);
                        let _ = events.send(TransportEvent::Unauthorized).await;
                        warn!(?feed, "push channel unauthorized, not retrying");
                        return;
                    }
                    ReadExit::Shutdown | ReadExit::ReceiverGone => break,
                    ReadExit::Disconnected => {}
                }
            }
            Err(e) => {
                debug!(?feed, error = %e, "connect failed");
            }
        }

        let _ = status.send(ChannelStatus::Offline);
        if attempt >= policy.max_retries {
            warn!(?feed, retries = attempt, "reconnect budget exhausted, staying offline");
            return;
        }
        let delay = policy.delay_for(attempt);
        attempt += 1;
        info!(?feed, attempt, ?delay, "reconnecting after backoff");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    let _ = status.send(ChannelStatus::Offline);
}

enum ReadExit {
    Disconnected,
    Unauthorized,
    Shutdown,
    ReceiverGone,
}

async fn read_loop(
    conn: &mut dyn PushConnection,
    events: &mpsc::Sender<TransportEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> ReadExit {
    loop {
        let message = tokio::select! {
            message = conn.next_text() => message,
            _ = shutdown.changed() => return ReadExit::Shutdown,
        };

        let text = match message {
            Some(Ok(text)) => text,
            Some(Err(e)) => {
                warn!(error = %e, "transport fault, reconnecting");
                return ReadExit::Disconnected;
            }
            None => {
                info!("peer closed push channel");
                return ReadExit::Disconnected;
            }
        };

        let event = match parse_frame(&text) {
            Ok(Frame::Trust(snapshot)) => TransportEvent::Trust(snapshot),
            Ok(Frame::Decision(decision)) => TransportEvent::Decision(decision),
            Ok(Frame::Unauthorized) => return ReadExit::Unauthorized,
            Ok(Frame::Ignored) => continue,
            Err(e) => {
                // Deliberate policy: a bad frame is dropped, the stream lives on.
                debug!(error = %e, "dropping malformed frame");
                continue;
            }
        };

        if events.send(event).await.is_err() {
            return ReadExit::ReceiverGone;
        }
    }
}
