//! Telegram Bot API channel.
//!
//! Receives updates by long-polling `getUpdates` on a background task and
//! forwards them, one at a time and in arrival order, over an mpsc queue.
//! Outbound messages go through `sendMessage`.
//!
//! Pending updates are dropped on connect (`deleteWebhook` with
//! `drop_pending_updates`), so anything sent to the bot while the CLI was not
//! listening cannot complete a pairing.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::channels::channel::{
    ChannelConnector, EventStream, InboundEvent, MessagingChannel, SenderInfo,
};
use crate::config::PairingConfig;
use crate::error::{ChannelError, PairingError};
use crate::pairing::{BotIdentity, IdentityProbe};

const NAME: &str = "telegram";

/// Timeout for short Bot API calls (everything except `getUpdates`).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a failed poll before trying again.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// How long `shutdown` waits for the poller before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Capacity of the queue between the poller and the event stream.
const EVENT_BUFFER: usize = 64;

// ── Bot API wire types ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

impl Update {
    /// Classify the update. Non-message updates, messages without text, and
    /// messages from bots yield `None`.
    pub fn into_event(self) -> Option<InboundEvent> {
        let message = self.message?;
        let from = message.from?;
        if from.is_bot {
            return None;
        }
        let text = message.text?;
        let chat_id = message.chat.id;
        let sender = SenderInfo {
            id: from.id,
            username: from.username,
        };

        Some(match parse_start_command(&text) {
            Some(payload) => InboundEvent::Start {
                chat_id,
                sender,
                payload,
            },
            None => InboundEvent::Text {
                chat_id,
                sender,
                text,
            },
        })
    }
}

/// Parse `/start`, `/start <payload>` and `/start@bot <payload>`.
///
/// Returns `None` if `text` is not a start command, `Some(None)` for a bare
/// start, `Some(Some(payload))` otherwise.
pub fn parse_start_command(text: &str) -> Option<Option<String>> {
    let rest = text.trim_start().strip_prefix("/start")?;
    let rest = match rest.chars().next() {
        None => "",
        Some('@') => match rest.find(char::is_whitespace) {
            Some(idx) => &rest[idx..],
            None => "",
        },
        Some(c) if c.is_whitespace() => rest,
        Some(_) => return None,
    };
    let payload = rest.trim();
    Some((!payload.is_empty()).then(|| payload.to_string()))
}

// ── API client ──────────────────────────────────────────────────────────

/// Thin client for the Bot API methods the handshake needs.
pub struct TelegramApi {
    client: Client,
    base_url: String,
    token: SecretString,
}

impl TelegramApi {
    pub fn new(client: Client, base_url: impl Into<String>, token: SecretString) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            token,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.base_url.trim_end_matches('/'),
            self.token.expose_secret(),
            method
        )
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Result<T, ChannelError> {
        tracing::debug!(method, "Calling Telegram Bot API");

        // The URL embeds the token, so strip it from transport errors.
        let response = self
            .client
            .post(self.method_url(method))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.without_url()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ChannelError::Http(e.without_url()))?;

        let parsed: ApiResponse<T> =
            serde_json::from_str(&text).map_err(|e| ChannelError::InvalidResponse {
                name: NAME.to_string(),
                reason: format!("{} returned HTTP {} with unparseable body: {}", method, status, e),
            })?;

        if !parsed.ok {
            let description = parsed
                .description
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(match parsed.error_code.unwrap_or(status.as_u16()) {
                401 | 404 => ChannelError::AuthFailed {
                    name: NAME.to_string(),
                    reason: description,
                },
                code => ChannelError::InvalidResponse {
                    name: NAME.to_string(),
                    reason: format!("{} failed ({}): {}", method, code, description),
                },
            });
        }

        parsed.result.ok_or_else(|| ChannelError::InvalidResponse {
            name: NAME.to_string(),
            reason: format!("{} returned ok without a result", method),
        })
    }

    /// `getMe`: the bot account behind the token.
    pub async fn get_me(&self) -> Result<User, ChannelError> {
        self.call("getMe", serde_json::json!({}), REQUEST_TIMEOUT)
            .await
    }

    /// `getUpdates` long poll.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u32,
    ) -> Result<Vec<Update>, ChannelError> {
        let mut body = serde_json::json!({
            "timeout": timeout_secs,
            "allowed_updates": ["message"],
        });
        if let Some(offset) = offset {
            body["offset"] = serde_json::Value::from(offset);
        }
        let wait = Duration::from_secs(u64::from(timeout_secs)) + REQUEST_TIMEOUT;
        self.call("getUpdates", body, wait).await
    }

    /// `sendMessage` to a chat.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ChannelError> {
        let _: serde_json::Value = self
            .call(
                "sendMessage",
                serde_json::json!({ "chat_id": chat_id, "text": text }),
                REQUEST_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    /// `deleteWebhook`, which also switches the bot to `getUpdates` mode.
    pub async fn delete_webhook(&self, drop_pending_updates: bool) -> Result<(), ChannelError> {
        let _: bool = self
            .call(
                "deleteWebhook",
                serde_json::json!({ "drop_pending_updates": drop_pending_updates }),
                REQUEST_TIMEOUT,
            )
            .await?;
        Ok(())
    }
}

// ── Channel ─────────────────────────────────────────────────────────────

struct Poller {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Live channel backed by `getUpdates` long polling.
pub struct TelegramChannel {
    api: Arc<TelegramApi>,
    poll_timeout_secs: u32,
    poller: Mutex<Option<Poller>>,
    connected: AtomicBool,
    shut_down: Arc<AtomicBool>,
}

impl TelegramChannel {
    pub fn new(api: Arc<TelegramApi>, poll_timeout_secs: u32) -> Self {
        Self {
            api,
            poll_timeout_secs,
            poller: Mutex::new(None),
            connected: AtomicBool::new(false),
            shut_down: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl MessagingChannel for TelegramChannel {
    fn name(&self) -> &str {
        NAME
    }

    async fn connect(&self) -> Result<EventStream, ChannelError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(ChannelError::StartupFailed {
                name: NAME.to_string(),
                reason: "channel already shut down".to_string(),
            });
        }
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(ChannelError::AlreadyConnected {
                name: NAME.to_string(),
            });
        }

        self.api.delete_webhook(true).await.map_err(|e| match e {
            ChannelError::AuthFailed { .. } => e,
            other => ChannelError::StartupFailed {
                name: NAME.to_string(),
                reason: format!("could not switch to polling: {}", other),
            },
        })?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.api),
            self.poll_timeout_secs,
            tx,
            shutdown_rx,
        ));

        {
            let mut poller = lock(&self.poller);
            *poller = Some(Poller {
                shutdown_tx,
                handle,
            });
            // A shutdown that raced with this connect found no poller to stop.
            if self.shut_down.load(Ordering::SeqCst)
                && let Some(p) = poller.take()
            {
                let _ = p.shutdown_tx.send(());
            }
        }

        tracing::info!("Telegram channel listening for updates");

        let shut_down = Arc::clone(&self.shut_down);
        let stream = ReceiverStream::new(rx)
            .take_while(move |_| futures::future::ready(!shut_down.load(Ordering::SeqCst)));
        Ok(Box::pin(stream))
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ChannelError> {
        self.api
            .send_message(chat_id, text)
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: NAME.to_string(),
                reason: e.to_string(),
            })
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let poller = lock(&self.poller).take();
        let Some(Poller {
            shutdown_tx,
            mut handle,
        }) = poller
        else {
            return Ok(());
        };

        let _ = shutdown_tx.send(());
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
            Ok(Ok(())) => {
                tracing::info!("Telegram channel stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(ChannelError::ShutdownFailed {
                name: NAME.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => {
                handle.abort();
                Err(ChannelError::ShutdownFailed {
                    name: NAME.to_string(),
                    reason: format!("poller did not stop within {:?}", SHUTDOWN_GRACE),
                })
            }
        }
    }
}

async fn poll_loop(
    api: Arc<TelegramApi>,
    poll_timeout_secs: u32,
    tx: mpsc::Sender<InboundEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut offset: Option<i64> = None;

    loop {
        let result = tokio::select! {
            _ = &mut shutdown_rx => break,
            result = api.get_updates(offset, poll_timeout_secs) => result,
        };

        let updates = match result {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!("Telegram poll failed: {}", e);
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => continue,
                }
            }
        };

        for update in updates {
            offset = Some(update.update_id + 1);
            let Some(event) = update.into_event() else {
                continue;
            };
            tokio::select! {
                _ = &mut shutdown_rx => return,
                sent = tx.send(event) => {
                    if sent.is_err() {
                        tracing::debug!("Event stream dropped, stopping poller");
                        return;
                    }
                }
            }
        }
    }

    tracing::debug!("Telegram poller received shutdown signal");
}

// ── Platform ────────────────────────────────────────────────────────────

/// Entry point for Telegram: probes tokens and opens channels for them.
pub struct TelegramPlatform {
    client: Client,
    base_url: String,
    poll_timeout_secs: u32,
}

impl TelegramPlatform {
    pub fn new(config: &PairingConfig) -> Result<Self, ChannelError> {
        let mut builder = Client::builder().connect_timeout(REQUEST_TIMEOUT);
        if config.force_ipv4 {
            builder = builder.local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        }
        let client = builder.build().map_err(|e| ChannelError::StartupFailed {
            name: NAME.to_string(),
            reason: format!("could not build HTTP client: {}", e.without_url()),
        })?;

        Ok(Self {
            client,
            base_url: config.api_base_url.clone(),
            poll_timeout_secs: config.poll_timeout_secs,
        })
    }

    /// API client bound to `token`.
    pub fn api(&self, token: &SecretString) -> TelegramApi {
        TelegramApi::new(self.client.clone(), self.base_url.clone(), token.clone())
    }
}

#[async_trait]
impl IdentityProbe for TelegramPlatform {
    async fn probe(&self, token: &SecretString) -> Result<BotIdentity, PairingError> {
        let me = self
            .api(token)
            .get_me()
            .await
            .map_err(|e| PairingError::ProbeFailed {
                reason: e.to_string(),
            })?;

        match me.username {
            Some(username) if me.is_bot => Ok(BotIdentity::verified(username)),
            _ => Err(PairingError::ProbeFailed {
                reason: format!("getMe returned user {} which is not a bot", me.id),
            }),
        }
    }
}

impl ChannelConnector for TelegramPlatform {
    fn open(&self, token: &SecretString) -> Result<Arc<dyn MessagingChannel>, ChannelError> {
        let channel: Arc<dyn MessagingChannel> = Arc::new(TelegramChannel::new(
            Arc::new(self.api(token)),
            self.poll_timeout_secs,
        ));
        Ok(channel)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "123:testtoken";

    fn platform(server: &mockito::Server) -> TelegramPlatform {
        let config = PairingConfig {
            api_base_url: server.url(),
            poll_timeout_secs: 0,
            ..PairingConfig::default()
        };
        TelegramPlatform::new(&config).unwrap()
    }

    fn token() -> SecretString {
        SecretString::from(TOKEN.to_string())
    }

    fn update(value: serde_json::Value) -> Update {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_start_command() {
        assert_eq!(parse_start_command("/start"), Some(None));
        assert_eq!(parse_start_command("/start 4821"), Some(Some("4821".to_string())));
        assert_eq!(parse_start_command("  /start   4821 "), Some(Some("4821".to_string())));
        assert_eq!(
            parse_start_command("/start@stocker_bot 4821"),
            Some(Some("4821".to_string()))
        );
        assert_eq!(parse_start_command("/start@stocker_bot"), Some(None));
        assert_eq!(parse_start_command("/startle"), None);
        assert_eq!(parse_start_command("4821"), None);
        assert_eq!(parse_start_command("/help"), None);
    }

    #[test]
    fn test_update_into_start_event() {
        let event = update(serde_json::json!({
            "update_id": 10,
            "message": {
                "chat": {"id": 42},
                "from": {"id": 42, "is_bot": false, "username": "bob"},
                "text": "/start 4821"
            }
        }))
        .into_event()
        .unwrap();

        assert_eq!(
            event,
            InboundEvent::Start {
                chat_id: 42,
                sender: SenderInfo::new(42, Some("bob")),
                payload: Some("4821".to_string()),
            }
        );
    }

    #[test]
    fn test_update_into_text_event_without_username() {
        let event = update(serde_json::json!({
            "update_id": 11,
            "message": {
                "chat": {"id": 7},
                "from": {"id": 555, "is_bot": false},
                "text": " 4821 "
            }
        }))
        .into_event()
        .unwrap();

        match event {
            InboundEvent::Text { chat_id, sender, text } => {
                assert_eq!(chat_id, 7);
                assert_eq!(sender.id, 555);
                assert!(sender.username.is_none());
                assert_eq!(text, " 4821 ");
            }
            other => panic!("expected text event, got {:?}", other),
        }
    }

    #[test]
    fn test_updates_without_usable_message_are_skipped() {
        let no_message = update(serde_json::json!({"update_id": 1}));
        assert!(no_message.into_event().is_none());

        let no_text = update(serde_json::json!({
            "update_id": 2,
            "message": {"chat": {"id": 1}, "from": {"id": 1, "is_bot": false}}
        }));
        assert!(no_text.into_event().is_none());

        let from_bot = update(serde_json::json!({
            "update_id": 3,
            "message": {"chat": {"id": 1}, "from": {"id": 9, "is_bot": true}, "text": "4821"}
        }));
        assert!(from_bot.into_event().is_none());
    }

    #[tokio::test]
    async fn test_probe_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/bot123:testtoken/getMe")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true,"result":{"id":99,"is_bot":true,"username":"stocker_bot"}}"#)
            .create_async()
            .await;

        let identity = platform(&server).probe(&token()).await.unwrap();
        assert_eq!(identity, BotIdentity::verified("stocker_bot"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_probe_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/bot123:testtoken/getMe")
            .with_status(401)
            .with_body(r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#)
            .create_async()
            .await;

        let err = platform(&server).probe(&token()).await.unwrap_err();
        match err {
            PairingError::ProbeFailed { reason } => assert!(reason.contains("Unauthorized")),
            other => panic!("expected ProbeFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transport_errors_do_not_leak_token() {
        let config = PairingConfig {
            api_base_url: "http://127.0.0.1:1".to_string(),
            ..PairingConfig::default()
        };
        let err = TelegramPlatform::new(&config)
            .unwrap()
            .probe(&token())
            .await
            .unwrap_err();
        assert!(!err.to_string().contains("testtoken"));
    }

    #[tokio::test]
    async fn test_send_message() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/bot123:testtoken/sendMessage")
            .match_body(mockito::Matcher::PartialJson(
                serde_json::json!({"chat_id": 42, "text": "hello"}),
            ))
            .with_status(200)
            .with_body(r#"{"ok":true,"result":{"message_id":1}}"#)
            .create_async()
            .await;

        let api = platform(&server).api(&token());
        let channel = TelegramChannel::new(Arc::new(api), 0);
        channel.send_message(42, "hello").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_message_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/bot123:testtoken/sendMessage")
            .with_status(400)
            .with_body(r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#)
            .create_async()
            .await;

        let channel = TelegramChannel::new(Arc::new(platform(&server).api(&token())), 0);
        let err = channel.send_message(1, "x").await.unwrap_err();
        match err {
            ChannelError::SendFailed { reason, .. } => assert!(reason.contains("chat not found")),
            other => panic!("expected SendFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_polls_and_shutdown_is_idempotent() {
        let mut server = mockito::Server::new_async().await;
        let webhook = server
            .mock("POST", "/bot123:testtoken/deleteWebhook")
            .match_body(mockito::Matcher::PartialJson(
                serde_json::json!({"drop_pending_updates": true}),
            ))
            .with_status(200)
            .with_body(r#"{"ok":true,"result":true}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/bot123:testtoken/getUpdates")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "ok": true,
                    "result": [
                        {"update_id": 1, "message": {
                            "chat": {"id": 42}, "from": {"id": 42, "is_bot": false},
                            "text": "/start 4821"}},
                        {"update_id": 2, "message": {
                            "chat": {"id": 555}, "from": {"id": 555, "is_bot": false, "username": "alice"},
                            "text": "hello"}}
                    ]
                })
                .to_string(),
            )
            .expect_at_least(1)
            .create_async()
            .await;

        let platform = platform(&server);
        let channel = platform.open(&token()).unwrap();
        let mut events = channel.connect().await.unwrap();

        let first = events.next().await.unwrap();
        let second = events.next().await.unwrap();
        assert!(matches!(first, InboundEvent::Start { chat_id: 42, .. }));
        assert!(matches!(second, InboundEvent::Text { chat_id: 555, .. }));
        webhook.assert_async().await;

        channel.shutdown().await.unwrap();
        channel.shutdown().await.unwrap();
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_connect_with_bad_token_fails() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/bot123:testtoken/deleteWebhook")
            .with_status(401)
            .with_body(r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#)
            .create_async()
            .await;

        let channel = platform(&server).open(&token()).unwrap();
        let err = channel.connect().await.err().unwrap();
        assert!(matches!(err, ChannelError::AuthFailed { .. }));
    }

    #[test]
    fn test_platform_builds_with_and_without_ipv4_binding() {
        for force_ipv4 in [true, false] {
            let config = PairingConfig {
                force_ipv4,
                ..PairingConfig::default()
            };
            tokio_test::assert_ok!(TelegramPlatform::new(&config));
        }
    }

    #[tokio::test]
    async fn test_shutdown_before_connect_is_noop() {
        let server = mockito::Server::new_async().await;
        let channel = platform(&server).open(&token()).unwrap();
        channel.shutdown().await.unwrap();
        assert!(channel.connect().await.is_err());
    }
}
