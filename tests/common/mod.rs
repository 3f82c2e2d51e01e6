//! Shared in-memory fakes for integration tests: a scriptable policy API and
//! a test-driven push socket.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use url::Url;

use zt_agent_client::{
    AccessMode, ChallengeStatus, ClientConfig, Decision, DecisionResponse, PolicyApi,
    PushConnection, PushSocket, ReconnectPolicy, Result, TrustSnapshot, ZtError,
};

/// Opt-in log output for debugging test runs: `RUST_LOG=zt_agent_client=debug`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Session config pointed at nothing real, with timers tightened so tests
/// observe reconnects and polling without waiting out production delays.
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::new(
        Url::parse("http://policy.test").unwrap(),
        Url::parse("ws://policy.test").unwrap(),
        "tok-test",
    );
    config.poll_interval = Duration::from_millis(20);
    config.reconnect = fast_policy(2);
    config
}

pub fn fast_policy(max_retries: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        max_retries,
    }
}

pub fn snapshot(subject: &str, trust: f64, secs: i64) -> TrustSnapshot {
    TrustSnapshot {
        subject_id: subject.to_string(),
        effective_trust: trust,
        max_access: AccessMode::Transfer,
        step_up_required: false,
        observed_at: Utc.timestamp_opt(secs, 0).unwrap(),
    }
}

pub fn snapshot_now(subject: &str, trust: f64) -> TrustSnapshot {
    TrustSnapshot {
        observed_at: Utc::now(),
        ..snapshot(subject, trust, 0)
    }
}

pub fn decision(decision: Decision, decision_id: Option<&str>) -> DecisionResponse {
    DecisionResponse {
        decision,
        decision_id: decision_id.map(String::from),
        risk_score: Some(0.5),
        risk_level: Some("MEDIUM".into()),
        trust: Some(0.5),
        reason: Some("policy_reasoner".into()),
    }
}

/// Scriptable policy API. Decision responses and verification verdicts are
/// consumed front-to-back; calls are recorded for assertions.
#[derive(Default)]
pub struct FakeApi {
    pub decisions: Mutex<VecDeque<DecisionResponse>>,
    pub verify_results: Mutex<VecDeque<ChallengeStatus>>,
    pub history: Mutex<Vec<TrustSnapshot>>,
    pub session: Mutex<Option<TrustSnapshot>>,
    pub decision_calls: Mutex<Vec<(String, String, Value)>>,
    pub otp_requests: Mutex<Vec<String>>,
    pub snapshot_calls: AtomicUsize,
    /// When set, `session_snapshot` fails with Unauthorized.
    pub revoked: Mutex<bool>,
}

impl FakeApi {
    pub fn with_session(subject: &str, trust: f64) -> Arc<Self> {
        let api = Self::default();
        *api.session.lock().unwrap() = Some(snapshot_now(subject, trust));
        Arc::new(api)
    }

    pub fn script_decision(&self, response: DecisionResponse) {
        self.decisions.lock().unwrap().push_back(response);
    }

    pub fn script_verify(&self, status: ChallengeStatus) {
        self.verify_results.lock().unwrap().push_back(status);
    }
}

#[async_trait]
impl PolicyApi for FakeApi {
    async fn request_decision(
        &self,
        resource: &str,
        action: &str,
        metadata: &Value,
    ) -> Result<DecisionResponse> {
        self.decision_calls.lock().unwrap().push((
            resource.to_string(),
            action.to_string(),
            metadata.clone(),
        ));
        self.decisions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ZtError::Transport("no scripted decision".into()))
    }

    async fn request_otp(&self, decision_id: &str) -> Result<()> {
        self.otp_requests.lock().unwrap().push(decision_id.to_string());
        Ok(())
    }

    async fn verify_otp(&self, _decision_id: &str, _otp: &str) -> Result<ChallengeStatus> {
        Ok(self
            .verify_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ChallengeStatus::Verified))
    }

    async fn webauthn_options(&self) -> Result<Value> {
        Ok(json!({"challenge": "material"}))
    }

    async fn webauthn_verify(&self, _assertion: &Value) -> Result<ChallengeStatus> {
        Ok(self
            .verify_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ChallengeStatus::Verified))
    }

    async fn session_snapshot(&self) -> Result<TrustSnapshot> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        if *self.revoked.lock().unwrap() {
            return Err(ZtError::Unauthorized);
        }
        self.session
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ZtError::Transport("no session snapshot".into()))
    }

    async fn trust_history(&self, _subject_id: &str, limit: usize) -> Result<Vec<TrustSnapshot>> {
        let history = self.history.lock().unwrap();
        Ok(history.iter().rev().take(limit).rev().cloned().collect())
    }
}

/// One scripted inbound item on a fake connection.
pub enum FeedItem {
    Text(String),
    Fault,
}

/// Push socket driven from the test: each feed path has a queue of
/// connections, each connection an unbounded channel of [`FeedItem`]s.
/// Dropping a connection's sender closes it, triggering a reconnect.
#[derive(Default)]
pub struct DrivenSocket {
    feeds: Mutex<HashMap<String, VecDeque<mpsc::UnboundedReceiver<FeedItem>>>>,
    sent: Arc<Mutex<Vec<(String, String)>>>,
    pub connects: AtomicUsize,
}

impl DrivenSocket {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue one connection for `path`, returning the driver side.
    pub fn add_connection(&self, path: &str) -> mpsc::UnboundedSender<FeedItem> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(rx);
        tx
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn sent_texts(&self, path: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

struct DrivenConnection {
    path: String,
    rx: mpsc::UnboundedReceiver<FeedItem>,
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl PushSocket for DrivenSocket {
    async fn connect(&self, url: &Url) -> Result<Box<dyn PushConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let path = url.path().to_string();
        let rx = self
            .feeds
            .lock()
            .unwrap()
            .get_mut(&path)
            .and_then(VecDeque::pop_front);
        match rx {
            Some(rx) => Ok(Box::new(DrivenConnection {
                path,
                rx,
                sent: Arc::clone(&self.sent),
            })),
            None => Err(ZtError::Transport(format!("no scripted connection for {path}"))),
        }
    }
}

#[async_trait]
impl PushConnection for DrivenConnection {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((self.path.clone(), text.to_string()));
        Ok(())
    }

    async fn next_text(&mut self) -> Option<Result<String>> {
        match self.rx.recv().await {
            Some(FeedItem::Text(text)) => Some(Ok(text)),
            Some(FeedItem::Fault) => Some(Err(ZtError::Transport("scripted fault".into()))),
            None => None,
        }
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_for<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
