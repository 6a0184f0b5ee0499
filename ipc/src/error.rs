//! Channel error types

use lifecycle::CancellationReason;
use std::fmt;
use thiserror::Error;

/// Errors that can occur while waiting on a rendezvous channel
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The waiting context was cancelled before the handoff happened
    #[error("Cancelled while waiting on channel: {reason}")]
    Cancelled { reason: CancellationReason },

    /// A bounded wait (teardown only) expired
    #[error("Timed out waiting on channel")]
    Timeout,

    /// Every handle on the other side is gone
    #[error("Channel disconnected")]
    Disconnected,
}

impl ChannelError {
    /// Checks if this error is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChannelError::Cancelled { .. })
    }
}

/// A send that did not complete.
///
/// The undelivered message is handed back so the caller decides its fate;
/// a failed send never loses it silently.
pub struct SendError<T> {
    message: T,
    kind: ChannelError,
}

impl<T> SendError<T> {
    pub(crate) fn new(message: T, kind: ChannelError) -> Self {
        Self { message, kind }
    }

    /// Returns why the send failed
    pub fn kind(&self) -> &ChannelError {
        &self.kind
    }

    /// Recovers the undelivered message
    pub fn into_message(self) -> T {
        self.message
    }

    /// Splits into the undelivered message and the failure
    pub fn into_parts(self) -> (T, ChannelError) {
        (self.message, self.kind)
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendError")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message not delivered: {}", self.kind)
    }
}

impl<T> std::error::Error for SendError<T> {}

impl<T> From<SendError<T>> for ChannelError {
    fn from(err: SendError<T>) -> Self {
        err.kind
    }
}
