//! `ownerlink status`: show the stored owner binding.

use std::path::Path;

use crate::settings::{BOT_CONFIG_FILE, BotSettings, ENV_FILE, read_env_token};

pub fn run_status_command(dir: &Path) -> anyhow::Result<()> {
    let settings = BotSettings::load(&dir.join(BOT_CONFIG_FILE))?;
    let has_token = read_env_token(&dir.join(ENV_FILE))?.is_some();
    print!("{}", format_status(&settings, has_token));
    Ok(())
}

fn format_status(settings: &BotSettings, has_token: bool) -> String {
    let mut out = String::from("ownerlink status\n================\n\n");

    let token = if has_token {
        format!("stored in {}", ENV_FILE)
    } else {
        "not set".to_string()
    };
    out.push_str(&format!("  Bot token:  {}\n", token));

    match settings.owner() {
        Some(owner) => {
            out.push_str(&format!("  Owner ID:   {}\n", owner.owner_id));
            if let Some(username) = owner.username {
                out.push_str(&format!("  Username:   @{}\n", username));
            }
            if let Some(at) = settings.telegram.paired_at {
                out.push_str(&format!(
                    "  Paired at:  {}\n",
                    at.format("%Y-%m-%d %H:%M:%S UTC")
                ));
            }
        }
        None => out.push_str("  Owner:      not paired (run `ownerlink pair`)\n"),
    }
    out
}
