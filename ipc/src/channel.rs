//! Rendezvous channels for message handoff
//!
//! A rendezvous channel has no buffer: `send` completes only when a
//! `receive` on the same channel takes the message, and vice versa. At most
//! one message is ever in flight per channel.
//!
//! The two ends are separate handles. A conversation hands each side only
//! the ends it uses ([`CallerEnd`] and [`WorkerEnd`]), so when one side
//! drops its handles the other side's blocked operation fails with
//! [`ChannelError::Disconnected`] instead of waiting forever.

use crate::error::{ChannelError, SendError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Select, SendTimeoutError, Sender};
use lifecycle::{CancellationReason, CancellationToken};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a communication channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(Uuid);

impl ChannelId {
    /// Creates a new random channel ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Channel({})", self.0)
    }
}

fn cancelled(token: &CancellationToken) -> ChannelError {
    ChannelError::Cancelled {
        reason: token.reason().unwrap_or(CancellationReason::UserCancel),
    }
}

/// Creates a zero-capacity channel and returns its two ends
pub fn rendezvous<T>() -> (RendezvousSender<T>, RendezvousReceiver<T>) {
    let (sender, receiver) = crossbeam_channel::bounded(0);
    let id = ChannelId::new();
    (
        RendezvousSender { id, sender },
        RendezvousReceiver { id, receiver },
    )
}

/// Sending end of a rendezvous channel.
///
/// Clones share the channel. The channel disconnects for receivers once
/// every sender clone is dropped.
pub struct RendezvousSender<T> {
    id: ChannelId,
    sender: Sender<T>,
}

impl<T> RendezvousSender<T> {
    /// Returns the channel ID
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Blocks until a receiver takes `message` or `cancel` fires.
    ///
    /// Exactly one of the two happens. On cancellation the message was not
    /// delivered and comes back inside the error. If every receiver is gone
    /// the message comes back with [`ChannelError::Disconnected`].
    pub fn send(&self, message: T, cancel: &CancellationToken) -> Result<(), SendError<T>> {
        if cancel.is_cancelled() {
            return Err(SendError::new(message, cancelled(cancel)));
        }

        let mut select = Select::new();
        let send_index = select.send(&self.sender);
        let cancel_index = select.recv(cancel.wake_receiver());
        let operation = select.select();

        if operation.index() == send_index {
            operation
                .send(&self.sender, message)
                .map_err(|e| SendError::new(e.into_inner(), ChannelError::Disconnected))?;
            tracing::trace!(channel = %self.id, "handoff sent");
            Ok(())
        } else {
            debug_assert_eq!(operation.index(), cancel_index);
            let _ = operation.recv(cancel.wake_receiver());
            Err(SendError::new(message, cancelled(cancel)))
        }
    }

    /// Bounded send for teardown notifications.
    pub fn send_timeout(&self, message: T, timeout: Duration) -> Result<(), SendError<T>> {
        self.sender
            .send_timeout(message, timeout)
            .map_err(|e| match e {
                SendTimeoutError::Timeout(m) => SendError::new(m, ChannelError::Timeout),
                SendTimeoutError::Disconnected(m) => SendError::new(m, ChannelError::Disconnected),
            })
    }
}

impl<T> Clone for RendezvousSender<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            sender: self.sender.clone(),
        }
    }
}

impl<T> fmt::Debug for RendezvousSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RendezvousSender").field(&self.id).finish()
    }
}

/// Receiving end of a rendezvous channel
pub struct RendezvousReceiver<T> {
    id: ChannelId,
    receiver: Receiver<T>,
}

impl<T> RendezvousReceiver<T> {
    /// Returns the channel ID
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Blocks until a sender hands over a message or `cancel` fires.
    pub fn receive(&self, cancel: &CancellationToken) -> Result<T, ChannelError> {
        if cancel.is_cancelled() {
            return Err(cancelled(cancel));
        }

        let mut select = Select::new();
        let recv_index = select.recv(&self.receiver);
        let cancel_index = select.recv(cancel.wake_receiver());
        let operation = select.select();

        if operation.index() == recv_index {
            let message = operation
                .recv(&self.receiver)
                .map_err(|_| ChannelError::Disconnected)?;
            tracing::trace!(channel = %self.id, "handoff received");
            Ok(message)
        } else {
            debug_assert_eq!(operation.index(), cancel_index);
            let _ = operation.recv(cancel.wake_receiver());
            Err(cancelled(cancel))
        }
    }

    /// Bounded receive for teardown draining.
    pub fn receive_timeout(&self, timeout: Duration) -> Result<T, ChannelError> {
        self.receiver.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => ChannelError::Timeout,
            RecvTimeoutError::Disconnected => ChannelError::Disconnected,
        })
    }

    /// Takes a message only if a sender is already blocked on this channel
    pub fn try_receive(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

impl<T> Clone for RendezvousReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            receiver: self.receiver.clone(),
        }
    }
}

impl<T> fmt::Debug for RendezvousReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RendezvousReceiver").field(&self.id).finish()
    }
}

/// Creates a request channel and the response channel that answers it.
///
/// The caller end sends requests and receives responses. The worker end
/// does the opposite.
pub fn channel_pair<T>() -> (CallerEnd<T>, WorkerEnd<T>) {
    let (request_tx, request_rx) = rendezvous();
    let (response_tx, response_rx) = rendezvous();
    (
        CallerEnd {
            request: request_tx,
            response: response_rx,
        },
        WorkerEnd {
            request: request_rx,
            response: response_tx,
        },
    )
}

/// Caller side of a channel pair
pub struct CallerEnd<T> {
    /// Caller to worker
    pub request: RendezvousSender<T>,
    /// Worker to caller
    pub response: RendezvousReceiver<T>,
}

impl<T> CallerEnd<T> {
    /// Identifies the pair by its request channel
    pub fn id(&self) -> ChannelId {
        self.request.id()
    }
}

impl<T> Clone for CallerEnd<T> {
    fn clone(&self) -> Self {
        Self {
            request: self.request.clone(),
            response: self.response.clone(),
        }
    }
}

impl<T> fmt::Debug for CallerEnd<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallerEnd")
            .field("request", &self.request.id())
            .field("response", &self.response.id())
            .finish()
    }
}

/// Worker side of a channel pair
pub struct WorkerEnd<T> {
    /// Caller to worker
    pub request: RendezvousReceiver<T>,
    /// Worker to caller
    pub response: RendezvousSender<T>,
}

impl<T> WorkerEnd<T> {
    /// Identifies the pair by its request channel
    pub fn id(&self) -> ChannelId {
        self.request.id()
    }
}

impl<T> Clone for WorkerEnd<T> {
    fn clone(&self) -> Self {
        Self {
            request: self.request.clone(),
            response: self.response.clone(),
        }
    }
}

impl<T> fmt::Debug for WorkerEnd<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerEnd")
            .field("request", &self.request.id())
            .field("response", &self.response.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifecycle::CancellationSource;
    use std::thread;

    #[test]
    fn test_channel_id_creation() {
        let id1 = ChannelId::new();
        let id2 = ChannelId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_channel_id_display() {
        let id = ChannelId::new();
        assert!(id.to_string().starts_with("Channel("));
    }

    #[test]
    fn test_ends_share_channel() {
        let (sender, receiver) = rendezvous::<u32>();
        assert_eq!(sender.id(), receiver.id());

        let handle = thread::spawn(move || receiver.receive(&CancellationToken::none()));
        sender.send(7, &CancellationToken::none()).unwrap();
        assert_eq!(handle.join().unwrap(), Ok(7));
    }

    #[test]
    fn test_send_does_not_buffer() {
        let (sender, receiver) = rendezvous::<u32>();
        let err = sender
            .send_timeout(1, Duration::from_millis(20))
            .unwrap_err();
        assert_eq!(err.kind(), &ChannelError::Timeout);
        assert_eq!(err.into_message(), 1);
        assert_eq!(receiver.try_receive(), None);
    }

    #[test]
    fn test_cancel_blocked_send_returns_message() {
        let (sender, receiver) = rendezvous::<String>();
        let source = CancellationSource::new();
        let token = source.token();

        let handle = thread::spawn(move || sender.send("lost?".to_string(), &token));
        thread::sleep(Duration::from_millis(20));
        source.cancel(CancellationReason::UserCancel);

        let (message, kind) = handle.join().unwrap().unwrap_err().into_parts();
        assert_eq!(message, "lost?");
        assert!(kind.is_cancelled());

        // Nothing was left behind for a later receiver.
        assert!(receiver.try_receive().is_none());
    }

    #[test]
    fn test_cancel_blocked_receive() {
        let (_sender, receiver) = rendezvous::<u32>();
        let source = CancellationSource::new();
        let token = source.token();

        let handle = thread::spawn(move || receiver.receive(&token));
        thread::sleep(Duration::from_millis(20));
        source.cancel(CancellationReason::Timeout);

        assert_eq!(
            handle.join().unwrap(),
            Err(ChannelError::Cancelled {
                reason: CancellationReason::Timeout
            })
        );
    }

    #[test]
    fn test_already_cancelled_token_never_blocks() {
        let (sender, receiver) = rendezvous::<u32>();
        let source = CancellationSource::new();
        source.cancel(CancellationReason::UserCancel);

        assert!(receiver.receive(&source.token()).unwrap_err().is_cancelled());
        assert!(sender.send(3, &source.token()).unwrap_err().kind().is_cancelled());
    }

    #[test]
    fn test_blocked_send_fails_when_receiver_dropped() {
        let (sender, receiver) = rendezvous::<u32>();

        let handle = thread::spawn(move || sender.send(9, &CancellationToken::none()));
        thread::sleep(Duration::from_millis(20));
        drop(receiver);

        let (message, kind) = handle.join().unwrap().unwrap_err().into_parts();
        assert_eq!(message, 9);
        assert_eq!(kind, ChannelError::Disconnected);
    }

    #[test]
    fn test_receive_fails_when_sender_dropped() {
        let (sender, receiver) = rendezvous::<u32>();
        drop(sender);
        assert_eq!(
            receiver.receive(&CancellationToken::none()),
            Err(ChannelError::Disconnected)
        );
        assert_eq!(
            receiver.receive_timeout(Duration::from_millis(20)),
            Err(ChannelError::Disconnected)
        );
    }

    #[test]
    fn test_pair_ends_match() {
        let (caller, worker) = channel_pair::<u8>();
        assert_ne!(caller.request.id(), caller.response.id());
        assert_eq!(caller.id(), worker.id());
        assert_eq!(caller.response.id(), worker.response.id());
        assert_eq!(worker.clone().id(), worker.id());
    }

    #[test]
    fn test_dropping_caller_end_frees_worker() {
        let (caller, worker) = channel_pair::<u8>();
        let handle = thread::spawn(move || {
            let request = worker.request.receive(&CancellationToken::none())?;
            worker
                .response
                .send(request + 1, &CancellationToken::none())
                .map_err(ChannelError::from)
        });

        caller.request.send(1, &CancellationToken::none()).unwrap();
        drop(caller);
        assert_eq!(handle.join().unwrap(), Err(ChannelError::Disconnected));
    }
}
