//! Turns a terminal session into the caller-facing result.
//!
//! Owns the only shared resource release point: the channel is shut down on
//! both the success and the timeout path. Nothing is persisted here.

use std::time::Duration;

use secrecy::SecretString;
use tokio::task::JoinHandle;

use crate::channels::MessagingChannel;
use crate::error::PairingError;
use crate::pairing::latch::Resolution;
use crate::pairing::probe::BotIdentity;

/// Sent to the owner's chat once the code is accepted.
pub const CONFIRMATION_MESSAGE: &str = "✅ Pairing complete! I am now your personal assistant.";

/// The platform account that proved control of the chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerIdentity {
    pub owner_id: i64,
    pub username: Option<String>,
}

/// Successful handshake.
#[derive(Debug, Clone)]
pub struct PairingOutcome {
    pub token: SecretString,
    pub owner: OwnerIdentity,
    pub bot: BotIdentity,
}

impl PairingOutcome {
    /// `true` when the identity probe failed and `bot` is a placeholder.
    pub fn is_degraded(&self) -> bool {
        !self.bot.verified
    }

    /// Username or the empty string.
    pub fn username(&self) -> &str {
        self.owner.username.as_deref().unwrap_or("")
    }
}

/// Everything the resolver needs besides the terminal value.
pub(crate) struct ResolveContext<'a> {
    pub channel: &'a dyn MessagingChannel,
    pub token: SecretString,
    pub bot: BotIdentity,
    pub timeout: Duration,
}

pub(crate) async fn resolve(
    resolution: &Resolution,
    timer: JoinHandle<()>,
    ctx: ResolveContext<'_>,
) -> Result<PairingOutcome, PairingError> {
    match resolution {
        Resolution::Completed(completion) => {
            timer.abort();

            if let Err(e) = ctx
                .channel
                .send_message(completion.chat_id, CONFIRMATION_MESSAGE)
                .await
            {
                tracing::warn!(
                    chat_id = completion.chat_id,
                    "Could not send pairing confirmation: {}",
                    e
                );
            }
            shutdown_channel(ctx.channel).await;

            tracing::info!(
                owner_id = completion.owner.owner_id,
                degraded = !ctx.bot.verified,
                "Pairing completed"
            );
            Ok(PairingOutcome {
                token: ctx.token,
                owner: completion.owner.clone(),
                bot: ctx.bot,
            })
        }
        Resolution::TimedOut => {
            shutdown_channel(ctx.channel).await;
            tracing::warn!(timeout_ms = ctx.timeout.as_millis() as u64, "Pairing timed out");
            Err(PairingError::Timeout {
                timeout: ctx.timeout,
            })
        }
    }
}

/// Shut the channel down; a failure is logged and otherwise ignored.
pub(crate) async fn shutdown_channel(channel: &dyn MessagingChannel) {
    if let Err(e) = channel.shutdown().await {
        tracing::warn!(
            channel = channel.name(),
            "Channel did not shut down cleanly: {}",
            e
        );
    }
}
