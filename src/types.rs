//! Core data model: decisions, trust snapshots, decision events, challenges.
//!
//! The decision vocabulary (`ALLOW`/`DENY`/`STEP_UP`) and challenge status
//! vocabulary (`PENDING`/`VERIFIED`/`FAILED`/`EXPIRED`) are wire contracts
//! with the policy service and serialize bit-exactly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Verdict returned by the policy service for a requested action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    Deny,
    StepUp,
}

/// Ceiling on what the agent may do in the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Read,
    Write,
    Transfer,
}

/// Lifecycle of a single step-up verification attempt. Transitions are
/// strictly forward; no status is ever revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeStatus {
    Pending,
    Verified,
    Failed,
    Expired,
}

/// How a step-up challenge is verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerifyMethod {
    Otp,
    #[serde(rename = "WEBAUTHN")]
    WebAuthn,
}

/// One observation of the session's trust state, from either the push channel
/// or a historical fetch. `effective_trust` is clamped to [0,1] at the point
/// of ingestion, before any caller sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustSnapshot {
    pub subject_id: String,
    pub effective_trust: f64,
    pub max_access: AccessMode,
    pub step_up_required: bool,
    pub observed_at: DateTime<Utc>,
}

impl TrustSnapshot {
    pub fn clamped(mut self) -> Self {
        self.effective_trust = self.effective_trust.clamp(0.0, 1.0);
        self
    }
}

/// Kind discriminator for [`DecisionEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionEventKind {
    AccessDecision,
    TrustUpdate,
}

/// An event from the decision broadcast feed. Immutable once ingested; the
/// event bus owns the stored copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub kind: DecisionEventKind,
    pub subject_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust: Option<f64>,
    pub occurred_at: DateTime<Utc>,
}

/// A single step-up verification attempt instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepUpChallenge {
    pub decision_id: String,
    pub method: VerifyMethod,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ChallengeStatus,
}

impl StepUpChallenge {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// The original action held while its challenge is pending. Replayed exactly
/// once on VERIFIED, discarded on FAILED/EXPIRED/cancel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub resource: String,
    pub action: String,
    pub metadata: serde_json::Value,
    pub request_id: Uuid,
}

impl PendingAction {
    pub fn new(resource: impl Into<String>, action: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            metadata,
            request_id: Uuid::new_v4(),
        }
    }
}

/// Verification input supplied by the caller out-of-band.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationInput {
    /// OTP code as entered by the user.
    Otp(String),
    /// WebAuthn assertion, passed through opaquely to the verifier.
    WebAuthn(serde_json::Value),
}

/// Result of an access request, surfaced to the caller. DENY is a normal
/// outcome, never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessOutcome {
    Allowed {
        risk_score: Option<f64>,
        risk_level: Option<String>,
        trust: Option<f64>,
        reason: Option<String>,
    },
    Denied {
        risk_score: Option<f64>,
        risk_level: Option<String>,
        reason: Option<String>,
    },
    StepUpRequired {
        decision_id: String,
        method: VerifyMethod,
    },
}

impl AccessOutcome {
    pub fn decision(&self) -> Decision {
        match self {
            Self::Allowed { .. } => Decision::Allow,
            Self::Denied { .. } => Decision::Deny,
            Self::StepUpRequired { .. } => Decision::StepUp,
        }
    }
}

/// Result of a verification round trip. On `Verified`, `replay` carries the
/// outcome of the single replayed access request.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationOutcome {
    pub status: ChallengeStatus,
    pub replay: Option<AccessOutcome>,
}
