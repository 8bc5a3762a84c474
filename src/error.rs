//! Error types for ownerlink.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Messaging channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Channel {name} is already connected")]
    AlreadyConnected { name: String },

    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Channel {name} failed to shut down cleanly: {reason}")]
    ShutdownFailed { name: String, reason: String },

    #[error("Authentication failed for channel {name}: {reason}")]
    AuthFailed { name: String, reason: String },

    #[error("Invalid response from channel {name}: {reason}")]
    InvalidResponse { name: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Pairing handshake errors.
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    /// The identity probe could not confirm the token. Callers degrade to a
    /// placeholder identity instead of failing the session.
    #[error("Identity probe failed: {reason}")]
    ProbeFailed { reason: String },

    #[error("Pairing timed out after {timeout:?} without receiving the code")]
    Timeout { timeout: Duration },

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Token prompt failed: {reason}")]
    Prompt { reason: String },
}

/// Why an inbound message was not accepted as the pairing code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MalformedCode {
    /// Looks like a code (exactly four digits) but is the wrong one.
    #[error("code does not match the one shown in the terminal")]
    Mismatch,

    /// Anything else: ordinary chatter, commands, other lengths.
    #[error("message is not a pairing code")]
    NotACode,
}

/// Errors reading or writing the persisted owner binding.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize settings for {path}: {source}")]
    Serialize {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Malformed line in {path}: {message}")]
    EnvFile { path: String, message: String },
}

/// Result type alias for ownerlink.
pub type Result<T> = std::result::Result<T, Error>;
