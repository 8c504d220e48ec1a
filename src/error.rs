//! Sync layer errors.
//!
//! Every failure inside the synchronisation layer is recovered locally and leaves the
//! session in its last-known-good state. Only [`SyncError::Command`] is meant to reach
//! the user as an explicit failure notification.
//!
//! | Error | Code | Recoverable |
//! |-------|------|-------------|
//! | [`SyncError::Transport`] | `SYNC_TRANSPORT` | Yes |
//! | [`SyncError::Decode`] | `SYNC_DECODE` | Yes |
//! | [`SyncError::MappingMissing`] | `SYNC_MAPPING_MISSING` | Yes |
//! | [`SyncError::Command`] | `SYNC_COMMAND` | Yes |
//! | [`SyncError::InvalidMapping`] | `SYNC_INVALID_MAPPING` | No |
//! | [`SyncError::Closed`] | `SYNC_CLOSED` | No |

use crate::model::EmotionLabel;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// Push channel error/close or a failed pull request.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Malformed payload on either channel. The message is dropped.
    #[error("decode failure: {0}")]
    Decode(String),

    /// The label has no entry in the parameter table; no visual update happens.
    #[error("no mapping for emotion `{0}`")]
    MappingMissing(EmotionLabel),

    /// Start/stop detection request rejected or unreachable. Nothing was committed.
    #[error("{action} detection failed: {reason}")]
    Command { action: &'static str, reason: String },

    /// Mapping entry failed validation (colour, brightness or transition).
    #[error("invalid mapping: {0}")]
    InvalidMapping(String),

    /// The supervisor loop is gone.
    #[error("sync loop has shut down")]
    Closed,
}

impl SyncError {
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Transport(_) => "SYNC_TRANSPORT",
            SyncError::Decode(_) => "SYNC_DECODE",
            SyncError::MappingMissing(_) => "SYNC_MAPPING_MISSING",
            SyncError::Command { .. } => "SYNC_COMMAND",
            SyncError::InvalidMapping(_) => "SYNC_INVALID_MAPPING",
            SyncError::Closed => "SYNC_CLOSED",
        }
    }

    /// Whether retrying (or simply waiting for the next event) may succeed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SyncError::InvalidMapping(_) | SyncError::Closed)
    }

    pub(crate) fn command(action: &'static str, err: impl std::fmt::Display) -> Self {
        SyncError::Command {
            action,
            reason: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_recoverability() {
        let err = SyncError::MappingMissing(EmotionLabel::Fear);
        assert_eq!(err.code(), "SYNC_MAPPING_MISSING");
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("fear"));

        let err = SyncError::command("start", "HTTP 400");
        assert_eq!(err.code(), "SYNC_COMMAND");
        assert_eq!(err.to_string(), "start detection failed: HTTP 400");

        assert!(!SyncError::Closed.is_recoverable());
        assert!(!SyncError::InvalidMapping("x".into()).is_recoverable());
    }
}
