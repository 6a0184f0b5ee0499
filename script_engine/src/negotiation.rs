//! The shared negotiation pair
//!
//! Every engine is created through one request/response pair shared by the
//! whole process. A constructor sends `NEW_ENGINE` carrying its private
//! instance channels and waits for `NEW_ENGINE_RESULT`.
//!
//! The rendezvous channels already admit only one `NEW_ENGINE` at a time.
//! The handshake gate adds one more guarantee: when a constructor is
//! cancelled after its request was delivered, the worker still owes an
//! acknowledgement. The gate makes sure the next constructor collects that
//! orphan before sending its own request, so it is never taken as the reply
//! to a different handshake.

use crate::error::ScriptError;
use crossbeam_channel::{Receiver, Select, Sender};
use ipc::{channel_pair, CallerEnd, InstanceChannels, Message, WorkerEnd};
use lifecycle::{CancellationReason, CancellationToken};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

static SHARED: OnceLock<Arc<NegotiationService>> = OnceLock::new();

/// One-permit gate whose acquisition can be cancelled
struct HandshakeGate {
    release: Sender<()>,
    acquire: Receiver<()>,
}

/// Returns the permit on drop
struct GatePermit<'a> {
    gate: &'a HandshakeGate,
}

impl HandshakeGate {
    fn new() -> Self {
        let (release, acquire) = crossbeam_channel::bounded(1);
        let _ = release.try_send(());
        Self { release, acquire }
    }

    fn acquire(&self, cancel: &CancellationToken) -> Result<GatePermit<'_>, ScriptError> {
        if let Some(reason) = cancel.reason() {
            return Err(ScriptError::Interrupted { reason });
        }

        let mut select = Select::new();
        let permit_index = select.recv(&self.acquire);
        select.recv(cancel.wake_receiver());
        let operation = select.select();

        if operation.index() == permit_index {
            operation
                .recv(&self.acquire)
                .map_err(|_| ScriptError::ServiceClosed)?;
            Ok(GatePermit { gate: self })
        } else {
            let _ = operation.recv(cancel.wake_receiver());
            Err(ScriptError::Interrupted {
                reason: cancel.reason().unwrap_or(CancellationReason::UserCancel),
            })
        }
    }

    fn acquire_timeout(&self, timeout: Duration) -> Option<GatePermit<'_>> {
        self.acquire
            .recv_timeout(timeout)
            .ok()
            .map(|_| GatePermit { gate: self })
    }
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        let _ = self.gate.release.try_send(());
    }
}

/// A handshake that did not complete.
#[derive(Debug)]
pub(crate) struct HandshakeFailure {
    pub error: ScriptError,
    /// The worker received `NEW_ENGINE` and may have bound a loop to the
    /// instance channels
    pub delivered: bool,
}

impl HandshakeFailure {
    fn before_delivery(error: ScriptError) -> Self {
        Self {
            error,
            delivered: false,
        }
    }
}

/// Owner of the process-wide negotiation pair.
///
/// Created explicitly and passed to each engine as an `Arc` handle. The
/// pair lives until [`close_service`](Self::close_service); after that no
/// engine can be negotiated through this service.
pub struct NegotiationService {
    channels: CallerEnd<Message>,
    worker: WorkerEnd<Message>,
    gate: HandshakeGate,
    orphaned_ack: AtomicBool,
    closed: AtomicBool,
}

impl NegotiationService {
    /// Creates a service with a fresh negotiation pair
    pub fn new() -> Arc<Self> {
        let (channels, worker) = channel_pair();
        Arc::new(Self {
            channels,
            worker,
            gate: HandshakeGate::new(),
            orphaned_ack: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Process-wide instance, created on first use
    pub fn shared() -> Arc<Self> {
        Arc::clone(SHARED.get_or_init(Self::new))
    }

    /// Handles the worker side listens on
    pub fn worker_channels(&self) -> WorkerEnd<Message> {
        self.worker.clone()
    }

    /// Checks if `CLOSE_SERVICE` has been issued
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Hands `instance` to the worker and waits for the acknowledgement.
    pub(crate) fn handshake(
        &self,
        instance: InstanceChannels,
        cancel: &CancellationToken,
    ) -> Result<(), HandshakeFailure> {
        if self.is_closed() {
            return Err(HandshakeFailure::before_delivery(ScriptError::ServiceClosed));
        }
        let _permit = self
            .gate
            .acquire(cancel)
            .map_err(HandshakeFailure::before_delivery)?;
        if self.is_closed() {
            return Err(HandshakeFailure::before_delivery(ScriptError::ServiceClosed));
        }

        if self.orphaned_ack.load(Ordering::Acquire) {
            let orphan = self
                .channels
                .response
                .receive(cancel)
                .map_err(|e| HandshakeFailure::before_delivery(e.into()))?;
            self.orphaned_ack.store(false, Ordering::Release);
            tracing::debug!(command = %orphan.command(), "collected orphaned handshake reply");
        }

        let instance_id = instance.id();
        self.channels
            .request
            .send(Message::NewEngine { channels: instance }, cancel)
            .map_err(|e| HandshakeFailure::before_delivery(e.into()))?;
        tracing::debug!(instance = %instance_id, "NEW_ENGINE delivered");

        match self.channels.response.receive(cancel) {
            Ok(Message::NewEngineResult) => Ok(()),
            Ok(reply) => Err(HandshakeFailure {
                error: crate::engine::reply_error(reply),
                delivered: true,
            }),
            Err(e) => {
                if e.is_cancelled() {
                    self.orphaned_ack.store(true, Ordering::Release);
                    tracing::warn!(instance = %instance_id, "handshake abandoned after delivery");
                }
                Err(HandshakeFailure {
                    error: e.into(),
                    delivered: true,
                })
            }
        }
    }

    /// Sends `CLOSE_SERVICE` once, best-effort.
    ///
    /// Every handoff is bounded by `grace`; the worker may already be gone.
    /// Returns whether the worker took the message. Later calls do nothing.
    pub fn close_service(&self, grace: Duration) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let Some(_permit) = self.gate.acquire_timeout(grace) else {
            tracing::warn!("handshake still in progress, CLOSE_SERVICE not sent");
            return false;
        };

        if self.orphaned_ack.load(Ordering::Acquire)
            && self.channels.response.receive_timeout(grace).is_ok()
        {
            self.orphaned_ack.store(false, Ordering::Release);
        }

        match self.channels.request.send_timeout(Message::CloseService, grace) {
            Ok(()) => {
                tracing::info!("script service closed");
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, "CLOSE_SERVICE not observed");
                false
            }
        }
    }
}

impl std::fmt::Debug for NegotiationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiationService")
            .field("channels", &self.channels)
            .field("closed", &self.is_closed())
            .finish()
    }
}
