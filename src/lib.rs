//! ownerlink: prove who owns a Telegram bot.
//!
//! A one-time 4-digit code is shown in the terminal and must come back through
//! the bot, either via a `/start <code>` deep link or typed as a message. The
//! sender of the first valid reply becomes the bot's owner.

pub mod channels;
pub mod cli;
pub mod config;
pub mod error;
pub mod pairing;
pub mod settings;

pub use error::{Error, Result};
