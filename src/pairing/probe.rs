//! Best-effort "who am I" lookup for a bot token.
//!
//! The probe result is only used to label operator-facing output (the deep
//! link path, the bot handle). A failed probe is not fatal: a token that
//! completes the handshake has proven it can receive and send anyway.

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::PairingError;

/// Username shown when the probe fails.
pub const PLACEHOLDER_BOT_USERNAME: &str = "UnknownBot";

/// The bot account behind a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    /// Bot handle without the leading `@`.
    pub username: String,
    /// `false` when `username` is the placeholder.
    pub verified: bool,
}

impl BotIdentity {
    pub fn verified(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            verified: true,
        }
    }

    pub fn placeholder() -> Self {
        Self {
            username: PLACEHOLDER_BOT_USERNAME.to_string(),
            verified: false,
        }
    }
}

/// Looks up the identity behind a token.
#[async_trait]
pub trait IdentityProbe: Send + Sync {
    /// Fails with [`PairingError::ProbeFailed`].
    async fn probe(&self, token: &SecretString) -> Result<BotIdentity, PairingError>;
}

/// Run `probe`, substituting the placeholder identity on failure.
pub async fn probe_or_placeholder(probe: &dyn IdentityProbe, token: &SecretString) -> BotIdentity {
    match probe.probe(token).await {
        Ok(identity) => {
            tracing::info!(bot = %identity.username, "Token verified");
            identity
        }
        Err(e) => {
            tracing::warn!(
                "Could not verify token ({}), continuing with pairing anyway",
                e
            );
            BotIdentity::placeholder()
        }
    }
}
