//! In-process channel that injects events without network I/O.
//!
//! Used by tests and dry runs. Events injected before [`connect`] are
//! buffered and delivered in order once the stream is opened.
//!
//! [`connect`]: MessagingChannel::connect

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Notify, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::channels::channel::{
    ChannelConnector, EventStream, InboundEvent, MessagingChannel, SenderInfo,
};
use crate::error::ChannelError;

const NAME: &str = "synthetic";

/// A message sent through the synthetic channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: i64,
    pub text: String,
}

/// Channel backed by an in-memory queue.
pub struct SyntheticChannel {
    tx: Mutex<Option<mpsc::UnboundedSender<InboundEvent>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<InboundEvent>>>,
    sent: Mutex<Vec<SentMessage>>,
    sent_notify: Notify,
    shut_down: Arc<AtomicBool>,
    shutdown_calls: AtomicUsize,
    fail_shutdown: bool,
    fail_sends: bool,
}

impl SyntheticChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            sent: Mutex::new(Vec::new()),
            sent_notify: Notify::new(),
            shut_down: Arc::new(AtomicBool::new(false)),
            shutdown_calls: AtomicUsize::new(0),
            fail_shutdown: false,
            fail_sends: false,
        }
    }

    /// Make [`shutdown`](MessagingChannel::shutdown) report an error (it
    /// still stops delivery).
    pub fn with_failing_shutdown(mut self) -> Self {
        self.fail_shutdown = true;
        self
    }

    /// Make every [`send_message`](MessagingChannel::send_message) fail.
    pub fn with_failing_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    /// Queue an event. Returns `false` once the channel has been shut down.
    pub fn inject(&self, event: InboundEvent) -> bool {
        if self.shut_down.load(Ordering::SeqCst) {
            tracing::debug!("Dropping injected event, channel is shut down");
            return false;
        }
        let guard = lock(&self.tx);
        match guard.as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Queue a `/start <payload>` event.
    pub fn inject_start(&self, chat_id: i64, sender: SenderInfo, payload: Option<&str>) -> bool {
        self.inject(InboundEvent::Start {
            chat_id,
            sender,
            payload: payload.map(str::to_string),
        })
    }

    /// Queue a plain text event.
    pub fn inject_text(&self, chat_id: i64, sender: SenderInfo, text: &str) -> bool {
        self.inject(InboundEvent::Text {
            chat_id,
            sender,
            text: text.to_string(),
        })
    }

    /// Everything sent so far, in order.
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        lock(&self.sent).clone()
    }

    /// Wait until at least `count` messages have been sent or `limit` passes.
    /// Returns whether the count was reached.
    pub async fn wait_for_sent(&self, count: usize, limit: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.sent_notify.notified();
                if lock(&self.sent).len() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(limit, wait).await.is_ok()
    }

    /// How many times `shutdown` has been called.
    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl Default for SyntheticChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessagingChannel for SyntheticChannel {
    fn name(&self) -> &str {
        NAME
    }

    async fn connect(&self) -> Result<EventStream, ChannelError> {
        if self.is_shut_down() {
            return Err(ChannelError::StartupFailed {
                name: NAME.to_string(),
                reason: "channel already shut down".to_string(),
            });
        }
        let rx = lock(&self.rx)
            .take()
            .ok_or_else(|| ChannelError::AlreadyConnected {
                name: NAME.to_string(),
            })?;

        let shut_down = Arc::clone(&self.shut_down);
        let stream = UnboundedReceiverStream::new(rx)
            .take_while(move |_| futures::future::ready(!shut_down.load(Ordering::SeqCst)));
        Ok(Box::pin(stream))
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ChannelError> {
        if self.fail_sends {
            return Err(ChannelError::SendFailed {
                name: NAME.to_string(),
                reason: "sends disabled for this harness".to_string(),
            });
        }
        lock(&self.sent).push(SentMessage {
            chat_id,
            text: text.to_string(),
        });
        self.sent_notify.notify_waiters();
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Dropping the sender ends the stream once buffered events drain.
        lock(&self.tx).take();

        if self.fail_shutdown {
            return Err(ChannelError::ShutdownFailed {
                name: NAME.to_string(),
                reason: "configured to fail".to_string(),
            });
        }
        Ok(())
    }
}

/// Hands out one shared [`SyntheticChannel`] and remembers which tokens asked
/// for it.
pub struct SyntheticConnector {
    channel: Arc<SyntheticChannel>,
    tokens: Mutex<Vec<String>>,
}

impl SyntheticConnector {
    pub fn new(channel: Arc<SyntheticChannel>) -> Self {
        Self {
            channel,
            tokens: Mutex::new(Vec::new()),
        }
    }

    /// Tokens passed to [`open`](ChannelConnector::open), in call order.
    pub fn opened_with(&self) -> Vec<String> {
        lock(&self.tokens).clone()
    }
}

impl ChannelConnector for SyntheticConnector {
    fn open(&self, token: &SecretString) -> Result<Arc<dyn MessagingChannel>, ChannelError> {
        lock(&self.tokens).push(token.expose_secret().to_string());
        let channel: Arc<dyn MessagingChannel> = self.channel.clone();
        Ok(channel)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
