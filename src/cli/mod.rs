//! CLI command handling.
//!
//! Provides subcommands for:
//! - Pairing a bot with its owner (`pair`)
//! - Showing the stored binding (`status`)

mod pair;
mod prompt;
mod status;

pub use pair::{PairArgs, persist_outcome, run_pair_command};
pub use prompt::{MIN_TOKEN_LEN, TerminalTokenPrompt, confirm, validate_token};
pub use status::run_status_command;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "ownerlink")]
#[command(about = "Pair a Telegram bot with the account that owns it")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pair the bot with your Telegram account
    Pair(PairArgs),

    /// Show the stored owner binding
    Status,
}
