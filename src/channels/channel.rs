//! Channel trait and inbound event types.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use secrecy::SecretString;

use crate::error::ChannelError;

/// The platform user that sent an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderInfo {
    /// Platform-assigned user id.
    pub id: i64,
    /// Public handle, if the user has one.
    pub username: Option<String>,
}

impl SenderInfo {
    pub fn new(id: i64, username: Option<impl Into<String>>) -> Self {
        Self {
            id,
            username: username.map(Into::into),
        }
    }
}

/// An inbound message, already classified by shape.
///
/// Start commands are what a deep link delivers when opened, so they are kept
/// apart from ordinary text even though both arrive as chat messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// `/start`, optionally followed by a payload.
    Start {
        chat_id: i64,
        sender: SenderInfo,
        payload: Option<String>,
    },
    /// Any other text message.
    Text {
        chat_id: i64,
        sender: SenderInfo,
        text: String,
    },
}

/// Ordered stream of inbound events from a connected channel.
pub type EventStream = Pin<Box<dyn Stream<Item = InboundEvent> + Send>>;

/// A bidirectional messaging channel used for the pairing handshake.
///
/// Implementations must deliver events one at a time, in arrival order, and
/// must make [`shutdown`](Self::shutdown) idempotent: once it has been called,
/// the stream returned by [`connect`](Self::connect) yields nothing more.
#[async_trait]
pub trait MessagingChannel: Send + Sync {
    /// Short name for logs and errors (e.g. "telegram").
    fn name(&self) -> &str;

    /// Open the live connection and start receiving events.
    async fn connect(&self) -> Result<EventStream, ChannelError>;

    /// Send a text message to a chat.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ChannelError>;

    /// Stop event delivery and release the connection.
    async fn shutdown(&self) -> Result<(), ChannelError>;
}

/// Builds a channel for a given bot token.
pub trait ChannelConnector: Send + Sync {
    fn open(&self, token: &SecretString) -> Result<Arc<dyn MessagingChannel>, ChannelError>;
}
