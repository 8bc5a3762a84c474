//! Terminal input for the pairing command.

use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use secrecy::SecretString;

use crate::error::PairingError;
use crate::pairing::TokenPrompt;

/// Tokens at or below this length are rejected before any network call.
pub const MIN_TOKEN_LEN: usize = 20;

/// Reads the bot token from the terminal, echoing `*` per character.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalTokenPrompt;

#[async_trait]
impl TokenPrompt for TerminalTokenPrompt {
    async fn prompt_token(&self) -> Result<SecretString, PairingError> {
        let input = tokio::task::spawn_blocking(|| read_masked_line("Telegram bot token: "))
            .await
            .map_err(|e| PairingError::Prompt {
                reason: e.to_string(),
            })?
            .map_err(|e| PairingError::Prompt {
                reason: e.to_string(),
            })?;

        match input {
            Some(input) => validate_token(&input),
            None => Err(PairingError::Prompt {
                reason: "cancelled".to_string(),
            }),
        }
    }
}

/// Trim and length-check a pasted token.
pub fn validate_token(input: &str) -> Result<SecretString, PairingError> {
    let token = input.trim();
    if token.len() <= MIN_TOKEN_LEN {
        return Err(PairingError::Prompt {
            reason: "that does not look like a bot token (too short)".to_string(),
        });
    }
    Ok(SecretString::from(token.to_string()))
}

/// Ask a yes/no question on stdin. Anything but `y`/`yes` is no.
pub fn confirm(question: &str) -> io::Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(parse_yes(&answer))
}

fn parse_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Restores cooked mode on every exit path.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// `Ok(None)` when the operator pressed Esc or Ctrl+C.
fn read_masked_line(label: &str) -> io::Result<Option<String>> {
    let mut stdout = io::stdout();
    write!(stdout, "{}", label)?;
    stdout.flush()?;

    let mut buffer = String::new();
    let finished = {
        let _raw = RawModeGuard::enable()?;
        loop {
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match apply_key(&mut buffer, key) {
                KeyOutcome::Continue { echo } => {
                    write!(stdout, "{}", echo)?;
                    stdout.flush()?;
                }
                KeyOutcome::Submit => break true,
                KeyOutcome::Cancel => break false,
            }
        }
    };
    writeln!(stdout)?;

    Ok(finished.then_some(buffer))
}

#[derive(Debug, PartialEq, Eq)]
enum KeyOutcome {
    Continue { echo: &'static str },
    Submit,
    Cancel,
}

fn apply_key(buffer: &mut String, key: KeyEvent) -> KeyOutcome {
    match key.code {
        KeyCode::Enter => KeyOutcome::Submit,
        KeyCode::Esc => KeyOutcome::Cancel,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => KeyOutcome::Cancel,
        KeyCode::Backspace => {
            if buffer.pop().is_some() {
                KeyOutcome::Continue { echo: "\u{8} \u{8}" }
            } else {
                KeyOutcome::Continue { echo: "" }
            }
        }
        KeyCode::Char(c) => {
            buffer.push(c);
            KeyOutcome::Continue { echo: "*" }
        }
        _ => KeyOutcome::Continue { echo: "" },
    }
}
