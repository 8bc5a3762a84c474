//! Messaging channels used by the pairing handshake.
//!
//! A channel turns a platform's inbound traffic into an ordered stream of
//! [`InboundEvent`]s and exposes a way to reply.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                    PairingSession                         │
//! │                                                           │
//! │     on_start ◄──┐                 ┌──► on_text            │
//! │                 └── EventStream ──┘                       │
//! │                          ▲                                │
//! └──────────────────────────┼────────────────────────────────┘
//!                            │
//!         ┌──────────────────┴───────────────────┐
//!         │                                      │
//!  ┌──────┴──────────┐                  ┌────────┴─────────┐
//!  │ TelegramChannel │                  │ SyntheticChannel │
//!  │ (getUpdates)    │                  │ (inject)         │
//!  └─────────────────┘                  └──────────────────┘
//! ```

mod channel;
pub mod synthetic;
pub mod telegram;

pub use channel::{ChannelConnector, EventStream, InboundEvent, MessagingChannel, SenderInfo};
pub use synthetic::{SentMessage, SyntheticChannel, SyntheticConnector};
pub use telegram::{TelegramApi, TelegramChannel, TelegramPlatform};
