//! Step-up coordinator: turns a STEP_UP decision into a verification
//! challenge and authorizes exactly one replay of the original action.
//!
//! States: `NONE -> CHALLENGE_ISSUED -> {VERIFIED | FAILED | EXPIRED}`,
//! terminal after leaving `CHALLENGE_ISSUED`; consuming a terminal outcome
//! returns the machine to `NONE`. At most one challenge may be issued per
//! session, and at most one verification round trip may be outstanding.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use crate::api::PolicyApi;
use crate::error::{Result, ZtError};
use crate::gateway::outcome_from;
use crate::types::{
    ChallengeStatus, PendingAction, StepUpChallenge, VerificationInput, VerificationOutcome,
    VerifyMethod,
};

enum ChallengeState {
    Idle,
    Issued {
        challenge: StepUpChallenge,
        pending: PendingAction,
    },
}

pub struct StepUpCoordinator {
    api: Arc<dyn PolicyApi>,
    ttl: ChronoDuration,
    state: Mutex<ChallengeState>,
    /// Guards the single-shot verification round trip. Concurrent submits
    /// are rejected, not queued.
    verifying: AtomicBool,
}

impl StepUpCoordinator {
    pub fn new(api: Arc<dyn PolicyApi>, ttl: std::time::Duration) -> Self {
        Self {
            api,
            ttl: ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(60)),
            state: Mutex::new(ChallengeState::Idle),
            verifying: AtomicBool::new(false),
        }
    }

    /// Open a challenge for a STEP_UP decision and request issuance from the
    /// remote side (OTP delivery or WebAuthn options). Fails with `Conflict`
    /// if a challenge is already issued; the existing challenge is untouched.
    pub async fn begin(
        &self,
        decision_id: &str,
        method: VerifyMethod,
        pending: PendingAction,
    ) -> Result<StepUpChallenge> {
        let challenge = {
            let mut state = self.state.lock().expect("stepup lock poisoned");
            if let ChallengeState::Issued { challenge, .. } = &*state {
                return Err(ZtError::Conflict(format!(
                    "challenge {} already issued",
                    challenge.decision_id
                )));
            }
            let now = Utc::now();
            let challenge = StepUpChallenge {
                decision_id: decision_id.to_string(),
                method,
                issued_at: now,
                expires_at: now + self.ttl,
                status: ChallengeStatus::Pending,
            };
            *state = ChallengeState::Issued {
                challenge: challenge.clone(),
                pending,
            };
            challenge
        };

        let issued = match method {
            VerifyMethod::Otp => self.api.request_otp(decision_id).await,
            // The options payload is challenge material for the caller's
            // authenticator; issuance succeeds once it is fetched.
            VerifyMethod::WebAuthn => self.api.webauthn_options().await.map(|_| ()),
        };
        if let Err(e) = issued {
            warn!(decision_id, error = %e, "challenge issuance failed, rolling back");
            self.clear_if_matches(decision_id);
            return Err(e);
        }

        info!(decision_id, ?method, "step-up challenge issued");
        Ok(challenge)
    }

    /// Forward verification input to the remote endpoint. Valid only while a
    /// challenge is issued and unexpired. On VERIFIED the stored action is
    /// replayed exactly once and the machine returns to `NONE`; on FAILED the
    /// action is discarded and the caller must restart from a fresh access
    /// request.
    pub async fn submit_verification(
        &self,
        input: VerificationInput,
    ) -> Result<VerificationOutcome> {
        if self
            .verifying
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ZtError::Conflict("a verification is already outstanding".into()));
        }
        let result = self.submit_inner(input).await;
        self.verifying.store(false, Ordering::Release);
        result
    }

    async fn submit_inner(&self, input: VerificationInput) -> Result<VerificationOutcome> {
        let decision_id = {
            let mut state = self.state.lock().expect("stepup lock poisoned");
            let ChallengeState::Issued { challenge, .. } = &*state else {
                return Err(ZtError::NoActiveChallenge);
            };
            if challenge.is_expired(Utc::now()) {
                info!(decision_id = %challenge.decision_id, "challenge expired on submit");
                *state = ChallengeState::Idle;
                return Err(ZtError::ChallengeExpired);
            }
            challenge.decision_id.clone()
        };

        // Single-shot network round trip; state stays ISSUED on a transport
        // fault so the caller may submit again.
        let status = match input {
            VerificationInput::Otp(code) => self.api.verify_otp(&decision_id, &code).await?,
            VerificationInput::WebAuthn(assertion) => {
                self.api.webauthn_verify(&assertion).await?
            }
        };

        let (pending, method) = {
            let mut state = self.state.lock().expect("stepup lock poisoned");
            match std::mem::replace(&mut *state, ChallengeState::Idle) {
                ChallengeState::Issued { challenge, pending }
                    if challenge.decision_id == decision_id =>
                {
                    (pending, challenge.method)
                }
                // Invalidated (session expiry) or replaced while the round
                // trip was in flight; nothing may be replayed.
                other => {
                    *state = other;
                    return Err(ZtError::NoActiveChallenge);
                }
            }
        };

        match status {
            ChallengeStatus::Verified => {
                info!(decision_id, "verification succeeded, replaying original action");
                let response = self
                    .api
                    .request_decision(&pending.resource, &pending.action, &pending.metadata)
                    .await?;
                let replay = outcome_from(response, method)?;
                Ok(VerificationOutcome {
                    status: ChallengeStatus::Verified,
                    replay: Some(replay),
                })
            }
            _ => {
                info!(decision_id, "verification rejected, pending action discarded");
                Ok(VerificationOutcome {
                    status: ChallengeStatus::Failed,
                    replay: None,
                })
            }
        }
    }

    /// Periodic sweep: expire an overdue challenge and discard its action.
    /// Returns the expired challenge when one was swept.
    pub fn check_expiry(&self, now: DateTime<Utc>) -> Option<StepUpChallenge> {
        let mut state = self.state.lock().expect("stepup lock poisoned");
        if let ChallengeState::Issued { challenge, .. } = &*state {
            if challenge.is_expired(now) {
                let mut expired = challenge.clone();
                expired.status = ChallengeStatus::Expired;
                info!(decision_id = %expired.decision_id, "step-up challenge expired");
                *state = ChallengeState::Idle;
                return Some(expired);
            }
        }
        None
    }

    /// Abandon an issued challenge without contacting the remote side.
    pub fn cancel(&self) -> Result<()> {
        let mut state = self.state.lock().expect("stepup lock poisoned");
        match &*state {
            ChallengeState::Issued { challenge, .. } => {
                info!(decision_id = %challenge.decision_id, "step-up challenge cancelled");
                *state = ChallengeState::Idle;
                Ok(())
            }
            ChallengeState::Idle => Err(ZtError::NoActiveChallenge),
        }
    }

    /// Session expiry: drop any in-flight challenge and pending action. They
    /// are never resumed after re-authentication.
    pub fn invalidate(&self) {
        let mut state = self.state.lock().expect("stepup lock poisoned");
        if let ChallengeState::Issued { challenge, .. } = &*state {
            warn!(decision_id = %challenge.decision_id, "invalidating challenge on session expiry");
        }
        *state = ChallengeState::Idle;
    }

    /// The currently issued challenge, if any.
    pub fn active_challenge(&self) -> Option<StepUpChallenge> {
        let state = self.state.lock().expect("stepup lock poisoned");
        match &*state {
            ChallengeState::Issued { challenge, .. } => Some(challenge.clone()),
            ChallengeState::Idle => None,
        }
    }

    fn clear_if_matches(&self, decision_id: &str) {
        let mut state = self.state.lock().expect("stepup lock poisoned");
        if let ChallengeState::Issued { challenge, .. } = &*state {
            if challenge.decision_id == decision_id {
                *state = ChallengeState::Idle;
            }
        }
    }
}
