//! Where a successful pairing is stored.
//!
//! The token goes to `.env` as `BOT_TOKEN`; the owner binding goes to
//! `bot-config.json` under `telegram`. Keys this module does not know about
//! are kept as-is in both files.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::SettingsError;
use crate::pairing::OwnerIdentity;

/// Default settings document, relative to the working directory.
pub const BOT_CONFIG_FILE: &str = "bot-config.json";

/// Default env file, relative to the working directory.
pub const ENV_FILE: &str = ".env";

/// Env key holding the bot token.
pub const TOKEN_ENV_KEY: &str = "BOT_TOKEN";

/// The `bot-config.json` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotSettings {
    #[serde(default)]
    pub telegram: TelegramSettings,

    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paired_at: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

impl BotSettings {
    /// Load from `path`; a missing file yields empty settings.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(SettingsError::Read {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&content).map_err(|e| SettingsError::Parse {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Write as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| SettingsError::Serialize {
            path: path.display().to_string(),
            source: e,
        })?;
        std::fs::write(path, json + "\n").map_err(|e| SettingsError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// The paired owner, if any.
    pub fn owner(&self) -> Option<OwnerIdentity> {
        self.telegram.owner_id.map(|owner_id| OwnerIdentity {
            owner_id,
            username: self.telegram.username.clone(),
        })
    }

    /// Replace the owner binding. A missing username clears the old one.
    pub fn record_owner(&mut self, owner: &OwnerIdentity, paired_at: DateTime<Utc>) {
        self.telegram.owner_id = Some(owner.owner_id);
        self.telegram.username = owner.username.clone().filter(|u| !u.is_empty());
        self.telegram.paired_at = Some(paired_at);
    }
}

/// Read `BOT_TOKEN` from an env file without touching the process
/// environment. A missing file or key yields `None`.
pub fn read_env_token(path: &Path) -> Result<Option<SecretString>, SettingsError> {
    let iter = match dotenvy::from_path_iter(path) {
        Ok(iter) => iter,
        Err(e) if e.not_found() => return Ok(None),
        Err(e) => return Err(env_error(path, e)),
    };

    let mut token = None;
    for item in iter {
        let (key, value) = item.map_err(|e| env_error(path, e))?;
        if key == TOKEN_ENV_KEY && !value.trim().is_empty() {
            token = Some(SecretString::from(value));
        }
    }
    Ok(token)
}

/// Set `BOT_TOKEN` in an env file, creating it if needed. Other lines are
/// left untouched; an existing `BOT_TOKEN` line is replaced in place.
pub fn write_env_token(path: &Path, token: &SecretString) -> Result<(), SettingsError> {
    let existing = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(SettingsError::Read {
                path: path.display().to_string(),
                source: e,
            });
        }
    };

    let entry = format!("{}={}", TOKEN_ENV_KEY, token.expose_secret());
    let mut replaced = false;
    let mut lines: Vec<String> = existing
        .lines()
        .filter_map(|line| {
            if !is_token_line(line) {
                return Some(line.to_string());
            }
            if replaced {
                None
            } else {
                replaced = true;
                Some(entry.clone())
            }
        })
        .collect();
    if !replaced {
        lines.push(entry);
    }

    let mut content = lines.join("\n");
    content.push('\n');
    write_private(path, content.as_bytes()).map_err(|e| SettingsError::Write {
        path: path.display().to_string(),
        source: e,
    })?;
    tracing::debug!(path = %path.display(), "Stored bot token");
    Ok(())
}

/// Write `content` readable by the owner only (0600 on unix), tightening the
/// mode of a file that already exists.
fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(content)
}

fn is_token_line(line: &str) -> bool {
    let line = line.trim_start();
    let line = line.strip_prefix("export ").unwrap_or(line).trim_start();
    line.strip_prefix(TOKEN_ENV_KEY)
        .is_some_and(|rest| rest.trim_start().starts_with('='))
}

fn env_error(path: &Path, e: dotenvy::Error) -> SettingsError {
    match e {
        dotenvy::Error::Io(source) => SettingsError::Read {
            path: path.display().to_string(),
            source,
        },
        other => SettingsError::EnvFile {
            path: path.display().to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn alice() -> OwnerIdentity {
        OwnerIdentity {
            owner_id: 555,
            username: Some("alice".to_string()),
        }
    }

    #[test]
    fn test_missing_settings_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let settings = BotSettings::load(&dir.path().join(BOT_CONFIG_FILE)).unwrap();
        assert_eq!(settings, BotSettings::default());
        assert!(settings.owner().is_none());
    }

    #[test]
    fn test_owner_round_trips_with_camel_case_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(BOT_CONFIG_FILE);
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();

        let mut settings = BotSettings::default();
        settings.record_owner(&alice(), at);
        settings.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["telegram"]["ownerId"], 555);
        assert_eq!(raw["telegram"]["username"], "alice");
        assert!(raw["telegram"]["pairedAt"].is_string());

        let loaded = BotSettings::load(&path).unwrap();
        assert_eq!(loaded.owner(), Some(alice()));
        assert_eq!(loaded.telegram.paired_at, Some(at));
    }

    #[test]
    fn test_unknown_keys_survive_rewrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(BOT_CONFIG_FILE);
        std::fs::write(
            &path,
            r#"{"telegram":{"ownerId":1,"token":"legacy"},"watchlist":["2330"]}"#,
        )
        .unwrap();

        let mut settings = BotSettings::load(&path).unwrap();
        settings.record_owner(
            &OwnerIdentity {
                owner_id: 42,
                username: None,
            },
            Utc::now(),
        );
        settings.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["telegram"]["ownerId"], 42);
        assert_eq!(raw["telegram"]["token"], "legacy");
        assert!(raw["telegram"].get("username").is_none());
        assert_eq!(raw["watchlist"][0], "2330");
    }

    #[test]
    fn test_corrupt_settings_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(BOT_CONFIG_FILE);
        std::fs::write(&path, "{not json").unwrap();
        let err = BotSettings::load(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
    }

    #[test]
    fn test_write_env_token_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(ENV_FILE);
        let token = SecretString::from("123456:ABCDEFGHIJKLMNOPQRSTUV".to_string());

        write_env_token(&path, &token).unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "BOT_TOKEN=123456:ABCDEFGHIJKLMNOPQRSTUV\n"
        );
        let read = read_env_token(&path).unwrap().unwrap();
        assert_eq!(read.expose_secret(), "123456:ABCDEFGHIJKLMNOPQRSTUV");
    }

    #[test]
    fn test_write_env_token_preserves_other_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(ENV_FILE);
        std::fs::write(
            &path,
            "# secrets\nGEMINI_API_KEY=abc\nBOT_TOKEN=old\nRUST_LOG=debug\nBOT_TOKEN=older\n",
        )
        .unwrap();

        write_env_token(&path, &SecretString::from("new-token".to_string())).unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "# secrets\nGEMINI_API_KEY=abc\nBOT_TOKEN=new-token\nRUST_LOG=debug\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_env_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let created = dir.path().join(ENV_FILE);
        write_env_token(&created, &SecretString::from("new-token".to_string())).unwrap();
        let mode = std::fs::metadata(&created).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        // A pre-existing world-readable file is tightened too.
        let existing = dir.path().join("existing.env");
        std::fs::write(&existing, "OTHER=1\n").unwrap();
        std::fs::set_permissions(&existing, std::fs::Permissions::from_mode(0o644)).unwrap();
        write_env_token(&existing, &SecretString::from("new-token".to_string())).unwrap();
        let mode = std::fs::metadata(&existing).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_read_env_token_missing() {
        let dir = TempDir::new().unwrap();
        assert!(read_env_token(&dir.path().join(ENV_FILE)).unwrap().is_none());

        let path = dir.path().join(ENV_FILE);
        std::fs::write(&path, "OTHER=1\n").unwrap();
        assert!(read_env_token(&path).unwrap().is_none());
    }

    #[test]
    fn test_token_line_detection() {
        assert!(is_token_line("BOT_TOKEN=x"));
        assert!(is_token_line("  export BOT_TOKEN = x"));
        assert!(!is_token_line("BOT_TOKEN_OLD=x"));
        assert!(!is_token_line("# BOT_TOKEN=x"));
    }
}
