//! End-to-end pairing: token acquisition, identity probe, session.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::channels::ChannelConnector;
use crate::config::PairingConfig;
use crate::error::PairingError;
use crate::pairing::otp::{OtpGenerator, RandomOtp};
use crate::pairing::probe::{IdentityProbe, probe_or_placeholder};
use crate::pairing::resolver::PairingOutcome;
use crate::pairing::session::{PairingInvite, PairingSession};

/// Asks the operator for a bot token when none was supplied.
#[async_trait]
pub trait TokenPrompt: Send + Sync {
    async fn prompt_token(&self) -> Result<SecretString, PairingError>;
}

pub struct PairingFlow {
    prompt: Arc<dyn TokenPrompt>,
    probe: Arc<dyn IdentityProbe>,
    connector: Arc<dyn ChannelConnector>,
    otp: Arc<dyn OtpGenerator>,
    config: PairingConfig,
}

impl PairingFlow {
    pub fn new(
        prompt: Arc<dyn TokenPrompt>,
        probe: Arc<dyn IdentityProbe>,
        connector: Arc<dyn ChannelConnector>,
        config: PairingConfig,
    ) -> Self {
        Self {
            prompt,
            probe,
            connector,
            otp: Arc::new(RandomOtp),
            config,
        }
    }

    /// Replace the random code source.
    pub fn with_otp_generator(mut self, otp: Arc<dyn OtpGenerator>) -> Self {
        self.otp = otp;
        self
    }

    /// Run one pairing attempt.
    ///
    /// `existing_token` skips the prompt. `on_invite` is called once the
    /// channel is ready to be shown the code, before listening starts.
    pub async fn run<F>(
        &self,
        existing_token: Option<SecretString>,
        on_invite: F,
    ) -> Result<PairingOutcome, PairingError>
    where
        F: FnOnce(&PairingInvite),
    {
        let token = match existing_token {
            Some(token) => {
                tracing::debug!("Using previously stored bot token");
                token
            }
            None => self.prompt.prompt_token().await?,
        };

        let bot = probe_or_placeholder(self.probe.as_ref(), &token).await;
        let channel = self.connector.open(&token)?;

        let session = PairingSession::new(token, bot, channel, &self.config, self.otp.as_ref());
        on_invite(&session.invite());
        session.run().await
    }
}
