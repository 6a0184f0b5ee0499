//! Caller-visible error types

use ipc::{ChannelError, CommandTag};
use lifecycle::CancellationReason;
use std::path::PathBuf;
use thiserror::Error;

/// The single failure type an engine call can return.
///
/// Channel and negotiation details are folded into these variants; nothing
/// below the engine leaks through.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// A wait on a channel was cancelled
    #[error("Operation interrupted")]
    Interrupted { reason: CancellationReason },

    /// The worker reported an exception with this text
    #[error("{0}")]
    Script(String),

    /// The worker reported an exception that is not a single text value
    #[error("Exception thrown but unknown format")]
    UnknownExceptionFormat,

    /// Reading the script source failed
    #[error("Failed to read script: {0}")]
    Io(#[from] std::io::Error),

    /// The engine was closed; its channels are never used again
    #[error("Engine is closed")]
    Closed,

    /// The shared negotiation service was shut down
    #[error("Script service is closed")]
    ServiceClosed,

    /// The worker side dropped every handle on the channel
    #[error("Worker is no longer reachable")]
    WorkerGone,

    /// The worker answered with a command that is not a valid reply
    #[error("Unexpected reply from worker: {0}")]
    UnexpectedReply(CommandTag),
}

impl ScriptError {
    /// Checks if this error came from a cancelled wait
    pub fn is_interrupted(&self) -> bool {
        matches!(self, ScriptError::Interrupted { .. })
    }
}

impl From<ChannelError> for ScriptError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Cancelled { reason } => ScriptError::Interrupted { reason },
            ChannelError::Timeout => ScriptError::Interrupted {
                reason: CancellationReason::Timeout,
            },
            ChannelError::Disconnected => ScriptError::WorkerGone,
        }
    }
}

impl<T> From<ipc::SendError<T>> for ScriptError {
    fn from(err: ipc::SendError<T>) -> Self {
        ChannelError::from(err).into()
    }
}

/// Errors loading an [`EngineConfig`](crate::EngineConfig)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupted_message() {
        let err = ScriptError::from(ChannelError::Cancelled {
            reason: CancellationReason::UserCancel,
        });
        assert!(err.is_interrupted());
        assert_eq!(err.to_string(), "Operation interrupted");
    }

    #[test]
    fn test_script_message_is_worker_text() {
        let err = ScriptError::Script("NameError: x".to_string());
        assert_eq!(err.to_string(), "NameError: x");
    }

    #[test]
    fn test_unknown_format_message() {
        assert_eq!(
            ScriptError::UnknownExceptionFormat.to_string(),
            "Exception thrown but unknown format"
        );
    }

    #[test]
    fn test_disconnected_maps_to_worker_gone() {
        assert!(matches!(
            ScriptError::from(ChannelError::Disconnected),
            ScriptError::WorkerGone
        ));
    }

    #[test]
    fn test_config_read_error_names_path() {
        let err = ConfigError::Read {
            path: PathBuf::from("/etc/engine.json"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(
            err.to_string(),
            "Failed to read config /etc/engine.json: missing"
        );
    }
}
