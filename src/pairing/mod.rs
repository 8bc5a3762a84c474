//! Owner pairing.
//!
//! Binds a bot token to the platform account of whoever can prove they read
//! the terminal: a 4-digit code is shown locally and must come back through
//! the bot, either by opening the deep link (`/start <code>`) or by typing the
//! code. The first valid reply wins; otherwise the session times out.
//!
//! [`PairingFlow`] runs the whole attempt. [`PairingSession`] is the listening
//! window on its own, for callers that already hold a channel.

mod flow;
mod latch;
pub mod otp;
mod probe;
mod resolver;
mod session;

pub use flow::{PairingFlow, TokenPrompt};
pub use latch::{Completion, CompletionLatch, Resolution, SessionStatus};
pub use otp::{FixedOtp, OTP_LENGTH, Otp, OtpGenerator, RandomOtp, generate_otp};
pub use probe::{BotIdentity, IdentityProbe, PLACEHOLDER_BOT_USERNAME, probe_or_placeholder};
pub use resolver::{CONFIRMATION_MESSAGE, OwnerIdentity, PairingOutcome};
pub use session::{
    GREETING_MESSAGE, PairingInvite, PairingSession, SessionHandle, WRONG_CODE_MESSAGE,
    build_deep_link,
};
