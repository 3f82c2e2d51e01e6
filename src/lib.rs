//! Zero-trust agent client.
//!
//! Tracks a session's live trust level and the decision stream derived from
//! it, and enforces a step-up (multi-factor) verification protocol before a
//! sensitive action may proceed. The policy service computes trust and
//! verdicts; this crate maintains the live view and drives the challenge
//! state machine.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use zt_agent_client::{AgentSession, ClientConfig, VerificationInput};
//!
//! # async fn run() -> zt_agent_client::Result<()> {
//! let config = ClientConfig::from_env()?;
//! let session = AgentSession::open(config).await?;
//!
//! let outcome = session
//!     .request_access("banking", "transfer", serde_json::json!({"amount": 250}))
//!     .await?;
//!
//! if matches!(outcome, zt_agent_client::AccessOutcome::StepUpRequired { .. }) {
//!     // Caller obtains the OTP out-of-band, then:
//!     let verdict = session
//!         .submit_verification(VerificationInput::Otp("123456".into()))
//!         .await?;
//!     // On VERIFIED the original transfer was replayed exactly once.
//!     let _ = verdict.replay;
//! }
//!
//! session.close().await;
//! # Ok(())
//! # }
//! ```

// Core error handling
pub mod error;

// Data model shared across components
pub mod types;

// Session configuration
pub mod config;

// REST boundary to the policy service
pub mod api;

// Push channel (trust / decision feeds)
pub mod transport;

// Bounded ordered decision event window with fan-out
pub mod bus;

// Live + historical trust reconciliation
pub mod aggregator;

// Step-up (MFA) state machine
pub mod stepup;

// Access request entry point
pub mod gateway;

// Session lifecycle tying the components together
pub mod session;

pub use aggregator::TrustAggregator;
pub use api::{DecisionResponse, HttpPolicyApi, PolicyApi};
pub use bus::{DecisionEventBus, SubscriptionId};
pub use config::{ClientConfig, ReconnectPolicy};
pub use error::{Result, ZtError};
pub use gateway::AccessRequestGateway;
pub use session::AgentSession;
pub use stepup::StepUpCoordinator;
pub use transport::{ChannelStatus, FeedKind, PushConnection, PushSocket, TransportChannel, TransportEvent, WsSocket};
pub use types::{
    AccessMode, AccessOutcome, ChallengeStatus, Decision, DecisionEvent, DecisionEventKind,
    PendingAction, StepUpChallenge, TrustSnapshot, VerificationInput, VerificationOutcome,
    VerifyMethod,
};
