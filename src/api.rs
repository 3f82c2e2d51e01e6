//! `PolicyApi` — the sole REST boundary between this client and the
//! zero-trust policy service. The gateway and coordinator depend on this
//! trait, never on reqwest directly, so tests run against an in-memory fake.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{Result, ZtError};
use crate::types::{AccessMode, ChallengeStatus, Decision, TrustSnapshot};

/// Response of the access-decision endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DecisionResponse {
    pub decision: Decision,
    #[serde(default)]
    pub decision_id: Option<String>,
    #[serde(default)]
    pub risk_score: Option<f64>,
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub trust: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[async_trait]
pub trait PolicyApi: Send + Sync {
    /// Ask the policy service for a verdict on `{resource, action, metadata}`.
    async fn request_decision(
        &self,
        resource: &str,
        action: &str,
        metadata: &Value,
    ) -> Result<DecisionResponse>;

    /// Ask the remote side to generate and deliver an OTP for a decision.
    async fn request_otp(&self, decision_id: &str) -> Result<()>;

    /// Submit an OTP code. A business-level rejection (wrong or expired code)
    /// comes back as `ChallengeStatus::Failed`, not as an error.
    async fn verify_otp(&self, decision_id: &str, otp: &str) -> Result<ChallengeStatus>;

    /// Fetch WebAuthn assertion options (opaque challenge material).
    async fn webauthn_options(&self) -> Result<Value>;

    /// Submit a WebAuthn assertion for verification.
    async fn webauthn_verify(&self, assertion: &Value) -> Result<ChallengeStatus>;

    /// Current trust snapshot for this session (REST fallback path).
    async fn session_snapshot(&self) -> Result<TrustSnapshot>;

    /// Historical trust series for a subject, oldest-first.
    async fn trust_history(&self, subject_id: &str, limit: usize) -> Result<Vec<TrustSnapshot>>;
}

/// HTTP implementation backed by reqwest.
#[derive(Clone)]
pub struct HttpPolicyApi {
    client: reqwest::Client,
    api_base: Url,
    token: String,
}

impl HttpPolicyApi {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base.clone(),
            token: config.session_token.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        crate::config::join_url(&self.api_base, path)
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.endpoint(path)?)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ZtError::Unauthorized);
        }
        Ok(response)
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(self.endpoint(path)?)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ZtError::Unauthorized);
        }
        Ok(response)
    }
}

/// `{status: "VERIFIED" | "REJECTED"}` from the verification endpoints.
#[derive(Debug, Deserialize)]
struct VerifyResponse {
    status: String,
}

impl VerifyResponse {
    fn into_status(self) -> ChallengeStatus {
        if self.status.eq_ignore_ascii_case("verified") {
            ChallengeStatus::Verified
        } else {
            ChallengeStatus::Failed
        }
    }
}

/// `GET /session/me` payload.
#[derive(Debug, Deserialize)]
struct SessionMe {
    agent_id: String,
    effective_trust: f64,
    max_access: AccessMode,
    #[serde(default)]
    step_up: bool,
}

/// One row of the trust-history endpoint.
#[derive(Debug, Deserialize)]
struct TrustHistoryRow {
    t: Option<chrono::DateTime<chrono::Utc>>,
    trust: f64,
}

#[async_trait]
impl PolicyApi for HttpPolicyApi {
    async fn request_decision(
        &self,
        resource: &str,
        action: &str,
        metadata: &Value,
    ) -> Result<DecisionResponse> {
        let body = serde_json::json!({
            "resource": resource,
            "action": action,
            "metadata": metadata,
        });
        let response = self.post("/agentic-decision", &body).await?;
        let decision: DecisionResponse = response.error_for_status()?.json().await?;
        debug!(resource, action, decision = ?decision.decision, "access decision received");
        Ok(decision)
    }

    async fn request_otp(&self, decision_id: &str) -> Result<()> {
        let body = serde_json::json!({ "decision_id": decision_id });
        self.post("/mfa/request", &body).await?.error_for_status()?;
        Ok(())
    }

    async fn verify_otp(&self, decision_id: &str, otp: &str) -> Result<ChallengeStatus> {
        let body = serde_json::json!({ "decision_id": decision_id, "otp": otp });
        let response = match self.post("/mfa/verify", &body).await {
            // The backend answers a wrong or expired code with 401; that is a
            // rejection of the code, not of the session token.
            Err(ZtError::Unauthorized) => return Ok(ChallengeStatus::Failed),
            other => other?,
        };
        if !response.status().is_success() {
            return Ok(ChallengeStatus::Failed);
        }
        let verdict: VerifyResponse = response.json().await?;
        Ok(verdict.into_status())
    }

    async fn webauthn_options(&self) -> Result<Value> {
        let response = self
            .post("/agent/auth/webauthn/auth/options", &serde_json::json!({}))
            .await?;
        Ok(response.error_for_status()?.json().await?)
    }

    async fn webauthn_verify(&self, assertion: &Value) -> Result<ChallengeStatus> {
        let response = match self.post("/agent/auth/webauthn/auth/verify", assertion).await {
            Err(ZtError::Unauthorized) => return Ok(ChallengeStatus::Failed),
            other => other?,
        };
        if !response.status().is_success() {
            return Ok(ChallengeStatus::Failed);
        }
        let verdict: VerifyResponse = response.json().await?;
        Ok(verdict.into_status())
    }

    async fn session_snapshot(&self) -> Result<TrustSnapshot> {
        let response = self.get("/session/me", &[]).await?;
        let me: SessionMe = response.error_for_status()?.json().await?;
        Ok(TrustSnapshot {
            subject_id: me.agent_id,
            effective_trust: me.effective_trust,
            max_access: me.max_access,
            step_up_required: me.step_up,
            observed_at: chrono::Utc::now(),
        }
        .clamped())
    }

    async fn trust_history(&self, subject_id: &str, limit: usize) -> Result<Vec<TrustSnapshot>> {
        let path = format!("/admin/trust-history/{subject_id}");
        let response = self.get(&path, &[("limit", limit.to_string())]).await?;
        let rows: Vec<TrustHistoryRow> = response.error_for_status()?.json().await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                TrustSnapshot {
                    subject_id: subject_id.to_string(),
                    effective_trust: row.trust,
                    max_access: AccessMode::Read,
                    step_up_required: false,
                    observed_at: row.t.unwrap_or_else(chrono::Utc::now),
                }
                .clamped()
            })
            .collect())
    }
}
