//! # Lifecycle
//!
//! Cooperative cancellation primitives for blocking handoffs.
//!
//! ## Philosophy
//!
//! - **Explicit over implicit**: Cancellation is requested through a source, never ambient
//! - **Wakes blocked waiters**: A cancelled token is observable from inside a blocking wait
//! - **Mechanism not policy**: There are no built-in timeouts; callers decide deadlines
//!
//! ## Core Concepts
//!
//! - `CancellationToken`: Cloneable handle to check (and wait on) cancellation status
//! - `CancellationSource`: Controller that can trigger cancellation
//! - `CancellationReason`: Why cancellation occurred
//!
//! A token exposes a wake-up receiver that becomes ready the moment its
//! source is cancelled. Blocking operations `select!` on it next to their
//! own channel operation, so either the operation completes or the
//! cancellation is observed.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Reason for cancellation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancellationReason {
    /// User-initiated cancellation
    UserCancel,
    /// A caller-imposed deadline expired
    Timeout,
    /// The owning host is shutting down
    Shutdown,
    /// Custom reason with description
    Custom(String),
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancellationReason::UserCancel => write!(f, "user cancelled"),
            CancellationReason::Timeout => write!(f, "timeout"),
            CancellationReason::Shutdown => write!(f, "shutdown"),
            CancellationReason::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

/// Internal state of a cancellation token
#[derive(Debug, Clone, PartialEq, Eq)]
enum CancellationState {
    Active,
    Cancelled(CancellationReason),
}

/// Mutable part of the shared state.
///
/// `trigger` is dropped on cancellation, which disconnects `wake` and makes
/// every pending `recv` on it ready at once.
#[derive(Debug)]
struct Inner {
    state: CancellationState,
    trigger: Option<Sender<()>>,
}

/// Shared state between CancellationToken and CancellationSource
#[derive(Debug)]
struct SharedCancellationState {
    inner: Mutex<Inner>,
    wake: Receiver<()>,
}

impl SharedCancellationState {
    fn new() -> Arc<Self> {
        let (trigger, wake) = crossbeam_channel::bounded(0);
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state: CancellationState::Active,
                trigger: Some(trigger),
            }),
            wake,
        })
    }

    fn is_cancelled(&self) -> bool {
        matches!(self.inner.lock().state, CancellationState::Cancelled(_))
    }

    fn reason(&self) -> Option<CancellationReason> {
        match &self.inner.lock().state {
            CancellationState::Active => None,
            CancellationState::Cancelled(reason) => Some(reason.clone()),
        }
    }

    /// First reason wins; later calls are no-ops.
    fn cancel(&self, reason: CancellationReason) {
        let trigger = {
            let mut inner = self.inner.lock();
            if inner.state != CancellationState::Active {
                return;
            }
            inner.state = CancellationState::Cancelled(reason);
            inner.trigger.take()
        };
        drop(trigger);
    }
}

/// A cloneable token that can be checked for cancellation
///
/// CancellationToken is designed to be passed to operations that should
/// be cancellable. It's cheap to clone and check, and it can be shared
/// across threads.
///
/// ## Example
///
/// ```
/// use lifecycle::{CancellationSource, CancellationReason};
///
/// let source = CancellationSource::new();
/// let token = source.token();
///
/// assert!(!token.is_cancelled());
///
/// source.cancel(CancellationReason::UserCancel);
/// assert!(token.is_cancelled());
/// assert_eq!(token.reason(), Some(CancellationReason::UserCancel));
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    shared: Arc<SharedCancellationState>,
}

impl CancellationToken {
    /// Creates a new token that is never cancelled
    ///
    /// Useful for operations that don't support cancellation.
    pub fn none() -> Self {
        Self {
            shared: SharedCancellationState::new(),
        }
    }

    /// Checks if cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Returns the reason for cancellation, if cancelled
    pub fn reason(&self) -> Option<CancellationReason> {
        self.shared.reason()
    }

    /// Receiver that becomes ready (disconnected) once the token is cancelled.
    ///
    /// Nothing is ever sent on it; use it as one arm of a `select!`.
    pub fn wake_receiver(&self) -> &Receiver<()> {
        &self.shared.wake
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::none()
    }
}

/// A controller that can trigger cancellation
///
/// CancellationSource creates tokens and can cancel them all at once.
///
/// ## Example
///
/// ```
/// use lifecycle::{CancellationSource, CancellationReason};
///
/// let source = CancellationSource::new();
/// let token1 = source.token();
/// let token2 = source.token();
///
/// // Both tokens see the same cancellation
/// source.cancel(CancellationReason::Timeout);
/// assert!(token1.is_cancelled());
/// assert!(token2.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationSource {
    shared: Arc<SharedCancellationState>,
}

impl CancellationSource {
    /// Creates a new cancellation source
    pub fn new() -> Self {
        Self {
            shared: SharedCancellationState::new(),
        }
    }

    /// Creates a token from this source
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Cancels all tokens from this source
    pub fn cancel(&self, reason: CancellationReason) {
        self.shared.cancel(reason);
    }

    /// Checks if this source has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Cancels this source after `delay` from a background timer thread.
    ///
    /// This is how a caller puts a deadline on a wait; the waits themselves
    /// never time out.
    pub fn cancel_after(
        &self,
        delay: Duration,
        reason: CancellationReason,
    ) -> Result<(), LifecycleError> {
        let source = self.clone();
        thread::Builder::new()
            .name("cancel-timer".to_string())
            .spawn(move || {
                thread::sleep(delay);
                source.cancel(reason);
            })
            .map(|_| ())
            .map_err(|e| LifecycleError::TimerSpawn(e.to_string()))
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors related to lifecycle operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Failed to start cancellation timer: {0}")]
    TimerSpawn(String),
}
