//! Session lifecycle: one `AgentSession` per authenticated client instance.
//!
//! The session owns both push channels, the event bus, the trust aggregator
//! and the access gateway, and runs a single event-loop task through which
//! all mutation flows — message arrival, timer tick, expiry sweep — so
//! ordering is preserved without locking across components. `close()` tears
//! everything down, cancelling reconnect and polling timers.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::aggregator::TrustAggregator;
use crate::api::{HttpPolicyApi, PolicyApi};
use crate::bus::{DecisionEventBus, SubscriptionId};
use crate::config::ClientConfig;
use crate::error::{Result, ZtError};
use crate::gateway::AccessRequestGateway;
use crate::transport::{
    ChannelStatus, FeedKind, PushSocket, TransportChannel, TransportEvent, WsSocket,
};
use crate::types::{
    AccessOutcome, DecisionEvent, StepUpChallenge, TrustSnapshot, VerificationInput,
    VerificationOutcome,
};

/// Cadence of the challenge-expiry sweep.
const EXPIRY_SWEEP_MS: u64 = 1000;

pub struct AgentSession {
    subject_id: String,
    bus: Arc<DecisionEventBus>,
    aggregator: Arc<Mutex<TrustAggregator>>,
    gateway: Arc<AccessRequestGateway>,
    trust_channel: TransportChannel,
    decision_channel: TransportChannel,
    unauthorized_rx: watch::Receiver<bool>,
    loop_task: tokio::task::JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("subject_id", &self.subject_id)
            .finish_non_exhaustive()
    }
}

impl AgentSession {
    /// Open a session against the live service: HTTP policy API plus
    /// WebSocket push feeds.
    pub async fn open(config: ClientConfig) -> Result<Self> {
        let api = Arc::new(HttpPolicyApi::new(&config)?);
        Self::open_with(config, api, Arc::new(WsSocket)).await
    }

    /// Open with injected API and socket implementations. This is the seam
    /// integration tests use; `open()` delegates here.
    pub async fn open_with(
        config: ClientConfig,
        api: Arc<dyn PolicyApi>,
        socket: Arc<dyn PushSocket>,
    ) -> Result<Self> {
        // An unauthorized snapshot here means the token is already dead;
        // refuse to open rather than spin up channels that will only fail.
        let initial = match api.session_snapshot().await {
            Ok(snapshot) => Some(snapshot),
            Err(ZtError::Unauthorized) => return Err(ZtError::Unauthorized),
            Err(e) => {
                warn!(error = %e, "initial trust snapshot unavailable");
                None
            }
        };
        let subject_id = initial
            .as_ref()
            .map(|s| s.subject_id.clone())
            .unwrap_or_default();

        let bus = Arc::new(DecisionEventBus::new(config.event_capacity));
        let aggregator = Arc::new(Mutex::new(TrustAggregator::new(
            config.history_capacity,
            config.freshness_threshold,
        )));
        let gateway = Arc::new(AccessRequestGateway::new(
            Arc::clone(&api),
            config.challenge_ttl,
        ));

        if let Some(snapshot) = initial {
            aggregator.lock().expect("aggregator lock").ingest_live(snapshot);
        }

        // Seed the chart backbone. Best-effort: a session without history is
        // still a working session.
        if !subject_id.is_empty() {
            match api.trust_history(&subject_id, config.history_fetch_limit).await {
                Ok(series) => aggregator
                    .lock()
                    .expect("aggregator lock")
                    .ingest_history(series),
                Err(e) => debug!(error = %e, "trust history fetch failed"),
            }
        }

        let (trust_channel, trust_rx) = TransportChannel::spawn(
            Arc::clone(&socket),
            config.trust_feed_url()?,
            FeedKind::Trust,
            config.reconnect.clone(),
        );
        let (decision_channel, decision_rx) = TransportChannel::spawn(
            socket,
            config.decision_feed_url()?,
            FeedKind::Decisions,
            config.reconnect.clone(),
        );

        let (unauthorized_tx, unauthorized_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let loop_task = tokio::spawn(session_loop(SessionLoop {
            api,
            bus: Arc::clone(&bus),
            aggregator: Arc::clone(&aggregator),
            gateway: Arc::clone(&gateway),
            trust_rx,
            decision_rx,
            trust_status: trust_channel.status_watch(),
            poll_interval: config.poll_interval,
            unauthorized_tx,
            shutdown_rx,
        }));

        info!(subject = %subject_id, "agent session open");
        Ok(Self {
            subject_id,
            bus,
            aggregator,
            gateway,
            trust_channel,
            decision_channel,
            unauthorized_rx,
            loop_task,
            shutdown_tx,
        })
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Request permission for an action; see [`AccessRequestGateway`].
    pub async fn request_access(
        &self,
        resource: &str,
        action: &str,
        metadata: Value,
    ) -> Result<AccessOutcome> {
        self.gateway.request_access(resource, action, metadata).await
    }

    /// Forward verification input for the active step-up challenge.
    pub async fn submit_verification(
        &self,
        input: VerificationInput,
    ) -> Result<VerificationOutcome> {
        self.gateway.submit_verification(input).await
    }

    pub fn cancel_step_up(&self) -> Result<()> {
        self.gateway.cancel_step_up()
    }

    pub fn active_challenge(&self) -> Option<StepUpChallenge> {
        self.gateway.active_challenge()
    }

    /// Current trust view (live point while fresh, else last history point).
    pub fn current_trust(&self) -> Option<TrustSnapshot> {
        self.aggregator.lock().expect("aggregator lock").current()
    }

    /// Time-ordered trust series for charting.
    pub fn trust_series(&self, limit: usize) -> Vec<TrustSnapshot> {
        self.aggregator.lock().expect("aggregator lock").series(limit)
    }

    /// Recent decision events, newest first.
    pub fn recent_events(&self, limit: usize) -> Vec<DecisionEvent> {
        self.bus.recent(limit)
    }

    pub fn subscribe_events<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&DecisionEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(callback)
    }

    pub fn unsubscribe_events(&self, id: SubscriptionId) {
        self.bus.unsubscribe(id)
    }

    pub fn trust_channel_status(&self) -> ChannelStatus {
        self.trust_channel.status()
    }

    /// True once the remote side has rejected the session token. The caller
    /// must re-authenticate and open a fresh session; nothing resumes.
    pub fn is_unauthorized(&self) -> bool {
        *self.unauthorized_rx.borrow()
    }

    /// Watch handle that flips to true on session expiry.
    pub fn unauthorized_watch(&self) -> watch::Receiver<bool> {
        self.unauthorized_rx.clone()
    }

    /// Tear the session down: stop both channels, the event loop and the
    /// polling timer.
    pub async fn close(self) {
        let _ = self.shutdown_tx.send(true);
        self.trust_channel.close().await;
        self.decision_channel.close().await;
        let _ = self.loop_task.await;
        info!(subject = %self.subject_id, "agent session closed");
    }
}

struct SessionLoop {
    api: Arc<dyn PolicyApi>,
    bus: Arc<DecisionEventBus>,
    aggregator: Arc<Mutex<TrustAggregator>>,
    gateway: Arc<AccessRequestGateway>,
    trust_rx: mpsc::Receiver<TransportEvent>,
    decision_rx: mpsc::Receiver<TransportEvent>,
    trust_status: watch::Receiver<ChannelStatus>,
    poll_interval: std::time::Duration,
    unauthorized_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

async fn session_loop(ctx: SessionLoop) {
    let SessionLoop {
        api,
        bus,
        aggregator,
        gateway,
        mut trust_rx,
        mut decision_rx,
        trust_status,
        poll_interval,
        unauthorized_tx,
        mut shutdown_rx,
    } = ctx;

    let mut poll = tokio::time::interval(poll_interval);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut sweep = tokio::time::interval(std::time::Duration::from_millis(EXPIRY_SWEEP_MS));
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // A channel whose reconnect budget is spent drops its sender; the loop
    // keeps running on the polling fallback.
    let mut trust_open = true;
    let mut decisions_open = true;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            event = trust_rx.recv(), if trust_open => match event {
                Some(event) => handle_event(&bus, &aggregator, &gateway, &unauthorized_tx, event),
                None => trust_open = false,
            },
            event = decision_rx.recv(), if decisions_open => match event {
                Some(event) => handle_event(&bus, &aggregator, &gateway, &unauthorized_tx, event),
                None => decisions_open = false,
            },
            _ = sweep.tick() => {
                gateway.coordinator().check_expiry(Utc::now());
            }
            _ = poll.tick() => {
                // Fallback mode only: the push channel is authoritative
                // while live.
                if *trust_status.borrow() == ChannelStatus::Live {
                    continue;
                }
                if *unauthorized_tx.borrow() {
                    continue;
                }
                match api.session_snapshot().await {
                    Ok(snapshot) => {
                        aggregator.lock().expect("aggregator lock").ingest_live(snapshot);
                    }
                    Err(ZtError::Unauthorized) => {
                        mark_unauthorized(&aggregator, &gateway, &unauthorized_tx);
                    }
                    Err(e) => debug!(error = %e, "trust poll failed"),
                }
            }
        }
    }
}

fn handle_event(
    bus: &DecisionEventBus,
    aggregator: &Mutex<TrustAggregator>,
    gateway: &AccessRequestGateway,
    unauthorized_tx: &watch::Sender<bool>,
    event: TransportEvent,
) {
    match event {
        TransportEvent::Trust(snapshot) => {
            aggregator.lock().expect("aggregator lock").ingest_live(snapshot);
        }
        TransportEvent::Decision(decision) => {
            bus.push(decision);
        }
        TransportEvent::Unauthorized => mark_unauthorized(aggregator, gateway, unauthorized_tx),
    }
}

/// Session expiry: drop any in-flight challenge and pending action, stop
/// treating the live source as valid, and signal the caller.
fn mark_unauthorized(
    aggregator: &Mutex<TrustAggregator>,
    gateway: &AccessRequestGateway,
    unauthorized_tx: &watch::Sender<bool>,
) {
    warn!("session unauthorized; dropping in-flight step-up state");
    gateway.coordinator().invalidate();
    aggregator.lock().expect("aggregator lock").clear_live();
    let _ = unauthorized_tx.send(true);
}
