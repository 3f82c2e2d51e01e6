//! Wire frame schemas for the push feeds.
//!
//! Payloads are closed tagged shapes: the trust feed discriminates on `type`,
//! the decision broadcast feed on `event`. Frames that fail validation or
//! carry an unknown discriminator are dropped by the channel, never surfaced
//! to subscribers.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, ZtError};
use crate::types::{AccessMode, Decision, DecisionEvent, DecisionEventKind, TrustSnapshot};

/// A successfully validated inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Trust push for this session.
    Trust(TrustSnapshot),
    /// Decision broadcast event.
    Decision(DecisionEvent),
    /// Explicit error frame from the remote side: the session token was
    /// rejected. Terminal.
    Unauthorized,
    /// Known but stateless frame (connection hello, bank-feed chatter).
    Ignored,
}

/// Body of a `TRUST` / `TRUST_UPDATE` push.
#[derive(Debug, Deserialize)]
struct TrustBody {
    #[serde(default)]
    agent_id: Option<String>,
    effective_trust: f64,
    #[serde(default = "default_access")]
    max_access: AccessMode,
    #[serde(default)]
    step_up: bool,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
}

fn default_access() -> AccessMode {
    AccessMode::Read
}

/// Body of an `ACCESS_DECISION` broadcast.
#[derive(Debug, Deserialize)]
struct AccessDecisionBody {
    agent_id: String,
    #[serde(default)]
    resource: Option<String>,
    #[serde(default)]
    action: Option<String>,
    decision: Decision,
    #[serde(default)]
    risk_score: Option<f64>,
    #[serde(default)]
    trust: Option<f64>,
}

/// Body of a `TRUST_UPDATE` broadcast.
#[derive(Debug, Deserialize)]
struct TrustUpdateBody {
    agent_id: String,
    trust: f64,
}

/// Parse one text frame from either feed.
///
/// `Err(MalformedMessage)` means the frame did not match any known schema;
/// the caller logs and drops it without tearing down the connection.
pub fn parse_frame(text: &str) -> Result<Frame> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ZtError::MalformedMessage(format!("not json: {e}")))?;

    if let Some(kind) = value.get("type").and_then(Value::as_str) {
        return parse_trust_frame(kind, &value);
    }
    if let Some(event) = value.get("event").and_then(Value::as_str) {
        return parse_decision_frame(event, &value);
    }
    Err(ZtError::MalformedMessage("missing type/event discriminator".into()))
}

fn parse_trust_frame(kind: &str, value: &Value) -> Result<Frame> {
    match kind {
        "TRUST" | "TRUST_UPDATE" => {
            let body: TrustBody = serde_json::from_value(value.clone())
                .map_err(|e| ZtError::MalformedMessage(format!("bad trust frame: {e}")))?;
            Ok(Frame::Trust(
                TrustSnapshot {
                    subject_id: body.agent_id.unwrap_or_default(),
                    effective_trust: body.effective_trust,
                    max_access: body.max_access,
                    step_up_required: body.step_up,
                    observed_at: body.time.unwrap_or_else(Utc::now),
                }
                .clamped(),
            ))
        }
        "ERROR" => Ok(Frame::Unauthorized),
        "TRUST_WS_CONNECTED" => Ok(Frame::Ignored),
        other => Err(ZtError::MalformedMessage(format!("unknown frame type {other}"))),
    }
}

fn parse_decision_frame(event: &str, value: &Value) -> Result<Frame> {
    match event {
        "ACCESS_DECISION" => {
            let body: AccessDecisionBody = serde_json::from_value(value.clone())
                .map_err(|e| ZtError::MalformedMessage(format!("bad access decision: {e}")))?;
            Ok(Frame::Decision(DecisionEvent {
                kind: DecisionEventKind::AccessDecision,
                subject_id: body.agent_id,
                resource: body.resource,
                action: body.action,
                decision: Some(body.decision),
                risk_score: body.risk_score,
                trust: body.trust,
                occurred_at: Utc::now(),
            }))
        }
        "TRUST_UPDATE" => {
            let body: TrustUpdateBody = serde_json::from_value(value.clone())
                .map_err(|e| ZtError::MalformedMessage(format!("bad trust update: {e}")))?;
            Ok(Frame::Decision(DecisionEvent {
                kind: DecisionEventKind::TrustUpdate,
                subject_id: body.agent_id,
                resource: None,
                action: None,
                decision: None,
                risk_score: None,
                trust: Some(body.trust),
                occurred_at: Utc::now(),
            }))
        }
        // Bank transaction chatter rides the same feed; not decision state.
        "BANK_TXN" | "MFA_REQUESTED" | "MFA_VERIFIED" => Ok(Frame::Ignored),
        other => Err(ZtError::MalformedMessage(format!("unknown event {other}"))),
    }
}
