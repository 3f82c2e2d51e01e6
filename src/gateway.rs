//! Access request gateway — the single entry point callers use to ask
//! permission for an action. On STEP_UP it opens a challenge with the
//! original `{resource, action, metadata}` held aside, so the eventual replay
//! cannot race with the caller changing the action under a pending challenge.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::api::{DecisionResponse, PolicyApi};
use crate::error::{Result, ZtError};
use crate::stepup::StepUpCoordinator;
use crate::types::{
    AccessOutcome, Decision, PendingAction, StepUpChallenge, VerificationInput,
    VerificationOutcome, VerifyMethod,
};

/// Map a decision response to a caller-facing outcome. `method` is the
/// verification method this client will use if the verdict is STEP_UP.
pub(crate) fn outcome_from(response: DecisionResponse, method: VerifyMethod) -> Result<AccessOutcome> {
    Ok(match response.decision {
        Decision::Allow => AccessOutcome::Allowed {
            risk_score: response.risk_score,
            risk_level: response.risk_level,
            trust: response.trust,
            reason: response.reason,
        },
        Decision::Deny => AccessOutcome::Denied {
            risk_score: response.risk_score,
            risk_level: response.risk_level,
            reason: response.reason,
        },
        Decision::StepUp => {
            let decision_id = response.decision_id.ok_or_else(|| {
                ZtError::MalformedMessage("STEP_UP verdict without decision_id".into())
            })?;
            AccessOutcome::StepUpRequired { decision_id, method }
        }
    })
}

pub struct AccessRequestGateway {
    api: Arc<dyn PolicyApi>,
    coordinator: StepUpCoordinator,
    method: VerifyMethod,
}

impl AccessRequestGateway {
    pub fn new(api: Arc<dyn PolicyApi>, challenge_ttl: std::time::Duration) -> Self {
        Self {
            coordinator: StepUpCoordinator::new(Arc::clone(&api), challenge_ttl),
            api,
            method: VerifyMethod::Otp,
        }
    }

    /// Verify step-up challenges with WebAuthn instead of OTP.
    pub fn with_method(mut self, method: VerifyMethod) -> Self {
        self.method = method;
        self
    }

    /// Request permission for `{resource, action, metadata}`.
    ///
    /// ALLOW and DENY come back as plain outcomes. On STEP_UP a challenge is
    /// opened automatically and the caller must supply verification input via
    /// [`submit_verification`](Self::submit_verification); the original
    /// action is replayed once verification succeeds.
    pub async fn request_access(
        &self,
        resource: &str,
        action: &str,
        metadata: Value,
    ) -> Result<AccessOutcome> {
        let response = self.api.request_decision(resource, action, &metadata).await?;
        let outcome = outcome_from(response, self.method)?;

        if let AccessOutcome::StepUpRequired { decision_id, method } = &outcome {
            info!(resource, action, decision_id, "step-up required, opening challenge");
            let pending = PendingAction::new(resource, action, metadata);
            self.coordinator.begin(decision_id, *method, pending).await?;
        }

        Ok(outcome)
    }

    /// Forward caller-supplied verification input to the active challenge.
    pub async fn submit_verification(
        &self,
        input: VerificationInput,
    ) -> Result<VerificationOutcome> {
        self.coordinator.submit_verification(input).await
    }

    /// Abandon the active challenge and its pending action.
    pub fn cancel_step_up(&self) -> Result<()> {
        self.coordinator.cancel()
    }

    /// The challenge currently awaiting verification, if any.
    pub fn active_challenge(&self) -> Option<StepUpChallenge> {
        self.coordinator.active_challenge()
    }

    pub(crate) fn coordinator(&self) -> &StepUpCoordinator {
        &self.coordinator
    }
}
