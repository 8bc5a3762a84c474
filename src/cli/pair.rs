//! `ownerlink pair`: bind a bot token to its owner.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Args;
use secrecy::SecretString;

use crate::channels::TelegramPlatform;
use crate::cli::prompt::{TerminalTokenPrompt, confirm};
use crate::config::PairingConfig;
use crate::error::SettingsError;
use crate::pairing::{PairingFlow, PairingInvite, PairingOutcome};
use crate::settings::{BOT_CONFIG_FILE, BotSettings, ENV_FILE, write_env_token};

#[derive(Args, Debug, Clone, Default)]
pub struct PairArgs {
    /// Bot token from @BotFather (prompted for when absent)
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// How long to wait for the code, in milliseconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_ms: Option<u64>,

    /// Re-pair without asking when an owner is already bound
    #[arg(long)]
    pub force: bool,
}

impl PairArgs {
    fn existing_token(&self) -> Option<SecretString> {
        self.token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| SecretString::from(t.to_string()))
    }
}

/// Run the pairing command against files in `dir`.
pub async fn run_pair_command(args: PairArgs, dir: &Path) -> anyhow::Result<()> {
    let mut config = PairingConfig::from_env()?;
    if let Some(ms) = args.timeout_ms {
        config = config.with_timeout(Duration::from_millis(ms));
    }

    let settings = BotSettings::load(&dir.join(BOT_CONFIG_FILE))?;
    if let Some(owner) = settings.owner()
        && !args.force
    {
        let question = format!(
            "Already paired with owner {}. Pair again?",
            owner.owner_id
        );
        if !confirm(&question)? {
            println!("Keeping the existing pairing.");
            return Ok(());
        }
    }

    let platform = Arc::new(TelegramPlatform::new(&config)?);
    let flow = PairingFlow::new(
        Arc::new(TerminalTokenPrompt),
        platform.clone(),
        platform,
        config,
    );

    let outcome = flow
        .run(args.existing_token(), print_invite)
        .await
        .context("Pairing failed; run `ownerlink pair` again to retry")?;

    persist_outcome(&outcome, dir)?;

    println!("\nPaired with owner {}.", outcome.owner.owner_id);
    if !outcome.username().is_empty() {
        println!("  Username: @{}", outcome.username());
    }
    if outcome.is_degraded() {
        println!("  Note: the bot identity could not be verified, but the token works.");
    }
    println!("  Token saved to {}", ENV_FILE);
    println!("  Owner saved to {}", BOT_CONFIG_FILE);
    Ok(())
}

/// Store the token in `.env` and the owner in `bot-config.json`.
pub fn persist_outcome(outcome: &PairingOutcome, dir: &Path) -> Result<(), SettingsError> {
    write_env_token(&dir.join(ENV_FILE), &outcome.token)?;

    let path = dir.join(BOT_CONFIG_FILE);
    let mut settings = BotSettings::load(&path)?;
    settings.record_owner(&outcome.owner, Utc::now());
    settings.save(&path)?;

    tracing::info!(owner_id = outcome.owner.owner_id, "Pairing saved");
    Ok(())
}

fn print_invite(invite: &PairingInvite) {
    println!();
    println!("Pair your Telegram account with @{}", invite.bot.username);
    if !invite.bot.verified {
        println!("  (bot name unverified; the link may not open)");
    }
    println!();
    println!("  Open:  {}", invite.deep_link);
    println!("  or send this code to the bot:  {}", invite.otp);
    println!();
    println!("Waiting up to {}s...", invite.expires_in.as_secs());
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::*;
    use crate::pairing::{BotIdentity, OwnerIdentity};
    use crate::settings::read_env_token;

    #[test]
    fn test_existing_token_ignores_blank() {
        let args = PairArgs {
            token: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(args.existing_token().is_none());

        let args = PairArgs {
            token: Some(" 123:abc ".to_string()),
            ..Default::default()
        };
        assert_eq!(args.existing_token().unwrap().expose_secret(), "123:abc");
    }

    #[test]
    fn test_persist_outcome_writes_both_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(ENV_FILE), "GEMINI_API_KEY=k\n").unwrap();

        let outcome = PairingOutcome {
            token: SecretString::from("123456789:ABCdefGHIjklMNOpqrSTUvwx".to_string()),
            owner: OwnerIdentity {
                owner_id: 555,
                username: Some("alice".to_string()),
            },
            bot: BotIdentity::verified("stocker_bot"),
        };
        persist_outcome(&outcome, dir.path()).unwrap();

        let token = read_env_token(&dir.path().join(ENV_FILE)).unwrap().unwrap();
        assert_eq!(token.expose_secret(), "123456789:ABCdefGHIjklMNOpqrSTUvwx");
        let env = std::fs::read_to_string(dir.path().join(ENV_FILE)).unwrap();
        assert!(env.starts_with("GEMINI_API_KEY=k\n"));

        let settings = BotSettings::load(&dir.path().join(BOT_CONFIG_FILE)).unwrap();
        assert_eq!(settings.owner(), Some(outcome.owner.clone()));
        assert!(settings.telegram.paired_at.is_some());
    }
}
