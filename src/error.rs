//! Error taxonomy for the zero-trust client.
//!
//! Transport faults are recoverable (the channel reconnects); authorization
//! faults are terminal for the session; step-up lifecycle faults are returned
//! as typed values so callers can show precise guidance. A DENY decision is
//! not an error — it is a normal [`AccessOutcome`](crate::types::AccessOutcome).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ZtError>;

#[derive(Error, Debug)]
pub enum ZtError {
    /// Recoverable transport fault; the channel retries with backoff.
    #[error("transport: {0}")]
    Transport(String),

    /// The remote side rejected the session token. Terminal until the caller
    /// re-authenticates and opens a fresh session.
    #[error("unauthorized: session token rejected")]
    Unauthorized,

    /// An inbound frame failed schema validation. Dropped, never surfaced to
    /// subscribers; carried here only for logging at the parse site.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A second challenge was attempted while one is active, or a second
    /// verification was submitted while one round trip is outstanding.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Verification was submitted after the challenge expiry.
    #[error("challenge expired")]
    ChallengeExpired,

    /// Verification was submitted with no challenge pending.
    #[error("no active challenge")]
    NoActiveChallenge,

    #[error("api request failed: {0}")]
    Api(#[from] reqwest::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Config(String),
}

impl ZtError {
    /// Whether the channel may retry after this fault.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Api(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_is_recoverable_unauthorized_is_not() {
        assert!(ZtError::Transport("reset".into()).is_recoverable());
        assert!(!ZtError::Unauthorized.is_recoverable());
        assert!(!ZtError::Conflict("busy".into()).is_recoverable());
    }
}
