//! Pairing session: one code, one listening window, one result.
//!
//! A session races two independent triggers against a shared
//! [`CompletionLatch`]:
//!
//! - the channel's event stream, read sequentially by [`PairingSession::run`];
//!   a start command carrying the code (deep link) or a text message equal to
//!   the code resolves the session as completed;
//! - a deadline timer on its own task, which resolves it as timed out.
//!
//! Whichever reaches the latch first decides the outcome. Everything after
//! that is discarded.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use secrecy::SecretString;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::channels::{InboundEvent, MessagingChannel, SenderInfo};
use crate::config::PairingConfig;
use crate::error::{MalformedCode, PairingError};
use crate::pairing::latch::{Completion, CompletionLatch, Resolution, SessionStatus};
use crate::pairing::otp::{Otp, OtpGenerator};
use crate::pairing::probe::BotIdentity;
use crate::pairing::resolver::{self, OwnerIdentity, PairingOutcome, ResolveContext};

/// Reply to a bare `/start` (or a start link carrying a stale code).
pub const GREETING_MESSAGE: &str =
    "👋 Pairing mode is active. Please send the 4-digit code shown in the terminal.";

/// Reply to a four-digit message that is not the code.
pub const WRONG_CODE_MESSAGE: &str =
    "❌ Wrong code. Please send the code shown in the terminal.";

/// What the operator needs to finish pairing from their phone.
#[derive(Debug, Clone)]
pub struct PairingInvite {
    pub otp: Otp,
    pub bot: BotIdentity,
    pub deep_link: String,
    pub expires_in: Duration,
}

/// Build `https://<host>/<bot>?start=<otp>`.
pub fn build_deep_link(host: &str, bot_username: &str, otp: &Otp) -> String {
    let bot_username = bot_username.trim_start_matches('@');
    match url::Url::parse(&format!("https://{}/{}", host, bot_username)) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("start", otp.as_str());
            url.to_string()
        }
        Err(_) => format!("https://{}/{}?start={}", host, bot_username, otp),
    }
}

/// Read-only view of a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    latch: Arc<CompletionLatch>,
}

impl SessionHandle {
    pub fn status(&self) -> SessionStatus {
        self.latch.status()
    }

    /// The accepted owner, once completed.
    pub fn owner(&self) -> Option<OwnerIdentity> {
        match self.latch.resolution() {
            Some(Resolution::Completed(completion)) => Some(completion.owner.clone()),
            _ => None,
        }
    }

    /// Wait for the terminal status.
    pub async fn wait(&self) -> SessionStatus {
        self.latch.wait().await.status()
    }
}

pub struct PairingSession {
    token: SecretString,
    otp: Otp,
    bot: BotIdentity,
    channel: Arc<dyn MessagingChannel>,
    timeout: Duration,
    deep_link_host: String,
    latch: Arc<CompletionLatch>,
}

impl PairingSession {
    /// Create a session with a fresh code from `otp`.
    pub fn new(
        token: SecretString,
        bot: BotIdentity,
        channel: Arc<dyn MessagingChannel>,
        config: &PairingConfig,
        otp: &dyn OtpGenerator,
    ) -> Self {
        Self {
            token,
            otp: otp.generate(),
            bot,
            channel,
            timeout: config.timeout,
            deep_link_host: config.deep_link_host.clone(),
            latch: Arc::new(CompletionLatch::new()),
        }
    }

    pub fn otp(&self) -> &Otp {
        &self.otp
    }

    pub fn deep_link(&self) -> String {
        build_deep_link(&self.deep_link_host, &self.bot.username, &self.otp)
    }

    pub fn invite(&self) -> PairingInvite {
        PairingInvite {
            otp: self.otp.clone(),
            bot: self.bot.clone(),
            deep_link: self.deep_link(),
            expires_in: self.timeout,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.latch.status()
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            latch: Arc::clone(&self.latch),
        }
    }

    /// Listen until the code arrives or the deadline passes.
    pub async fn run(self) -> Result<PairingOutcome, PairingError> {
        let mut events = match self.channel.connect().await {
            Ok(events) => events,
            Err(e) => {
                tracing::error!(channel = self.channel.name(), "Could not start listening: {}", e);
                resolver::shutdown_channel(self.channel.as_ref()).await;
                return Err(e.into());
            }
        };

        let deadline = Instant::now() + self.timeout;
        let timer = spawn_deadline_timer(Arc::clone(&self.latch), deadline);
        tracing::info!(
            channel = self.channel.name(),
            timeout_ms = self.timeout.as_millis() as u64,
            "Waiting for pairing code"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.latch.wait() => break,
                next = events.next() => match next {
                    // A reply in flight must not hold the session past its deadline.
                    Some(event) => tokio::select! {
                        biased;
                        _ = self.latch.wait() => break,
                        _ = self.dispatch(event) => {}
                    },
                    None => {
                        tracing::warn!("Event stream ended before pairing resolved");
                        self.latch.wait().await;
                        break;
                    }
                },
            }
        }
        drop(events);

        let resolution = self.latch.wait().await;
        resolver::resolve(
            resolution,
            timer,
            ResolveContext {
                channel: self.channel.as_ref(),
                token: self.token.clone(),
                bot: self.bot.clone(),
                timeout: self.timeout,
            },
        )
        .await
    }

    async fn dispatch(&self, event: InboundEvent) {
        if self.latch.is_resolved() {
            tracing::debug!("Discarding event for an already resolved session");
            return;
        }
        match event {
            InboundEvent::Start {
                chat_id,
                sender,
                payload,
            } => self.on_start(chat_id, sender, payload.as_deref()).await,
            InboundEvent::Text {
                chat_id,
                sender,
                text,
            } => self.on_text(chat_id, sender, &text).await,
        }
    }

    async fn on_start(&self, chat_id: i64, sender: SenderInfo, payload: Option<&str>) {
        if let Some(payload) = payload
            && self.otp.check(payload).is_ok()
        {
            tracing::debug!(sender = sender.id, "Code received via start link");
            self.accept(chat_id, sender);
            return;
        }
        self.reply(chat_id, GREETING_MESSAGE).await;
    }

    async fn on_text(&self, chat_id: i64, sender: SenderInfo, text: &str) {
        match self.otp.check(text) {
            Ok(()) => {
                tracing::debug!(sender = sender.id, "Code received as text");
                self.accept(chat_id, sender);
            }
            Err(MalformedCode::Mismatch) => {
                tracing::debug!(sender = sender.id, "Wrong code");
                self.reply(chat_id, WRONG_CODE_MESSAGE).await;
            }
            Err(MalformedCode::NotACode) => {}
        }
    }

    fn accept(&self, chat_id: i64, sender: SenderInfo) {
        let owner = OwnerIdentity {
            owner_id: sender.id,
            username: sender.username,
        };
        let owner_id = owner.owner_id;
        if self
            .latch
            .try_resolve(Resolution::Completed(Completion { chat_id, owner }))
        {
            tracing::info!(owner_id, "Pairing code accepted");
        } else {
            tracing::debug!(owner_id, "Late match ignored, session already resolved");
        }
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.channel.send_message(chat_id, text).await {
            tracing::warn!(chat_id, "Failed to reply: {}", e);
        }
    }
}

fn spawn_deadline_timer(latch: Arc<CompletionLatch>, deadline: Instant) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        if latch.try_resolve(Resolution::TimedOut) {
            tracing::debug!("Pairing deadline reached");
        } else {
            tracing::debug!("Deadline fired after session resolved");
        }
    })
}
