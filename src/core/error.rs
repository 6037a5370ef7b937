//! Error types for the device link
//! Decode failures are diagnostic only; link failures end up as a status change.

use std::time::Duration;

use thiserror::Error;

use crate::core::protocol::SectionId;

/// Reasons a section (or part of one) was discarded while decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("section {0:?} is not of the form ID:payload")]
    MissingSeparator(String),

    #[error("unknown section id {0:?}")]
    UnknownSection(String),

    #[error("{section:?} section expects {expected} fields, found {found}")]
    FieldCount {
        section: SectionId,
        expected: usize,
        found: usize,
    },

    #[error("{section:?} section has a non-hex field {field:?}")]
    InvalidHex { section: SectionId, field: String },

    #[error("{section:?} channel {channel} has a malformed token {token:?}")]
    ChannelToken {
        section: SectionId,
        channel: usize,
        token: String,
    },
}

/// Reasons a command could not be encoded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("channel {channel} is out of range 1..={max}")]
    ChannelOutOfRange { channel: u8, max: u8 },

    #[error("brightness {0} is not a finite number")]
    InvalidBrightness(f32),

    #[error("cutoff voltage {0} must be a finite, non-negative number")]
    InvalidVoltage(f32),
}

/// Availability of the local Bluetooth adapter, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum AdapterState {
    Ready,
    PoweredOff,
    Unauthorized,
    Unsupported,
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Ready => "ready",
            Self::PoweredOff => "powered off",
            Self::Unauthorized => "unauthorized",
            Self::Unsupported => "unsupported",
        };
        f.write_str(text)
    }
}

/// Errors surfaced by the link and the command path.
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    #[error("device is not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("bluetooth adapter is {0}")]
    AdapterUnavailable(AdapterState),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    InvalidCommand(#[from] CommandError),

    #[error("link manager is no longer running")]
    ChannelClosed,
}

impl From<bluest::Error> for LinkError {
    fn from(err: bluest::Error) -> Self {
        use bluest::error::ErrorKind;

        match err.kind() {
            ErrorKind::NotConnected => LinkError::NotConnected,
            ErrorKind::AdapterUnavailable => LinkError::AdapterUnavailable(AdapterState::PoweredOff),
            ErrorKind::NotAuthorized => LinkError::AdapterUnavailable(AdapterState::Unauthorized),
            _ => LinkError::Transport(err.to_string()),
        }
    }
}
