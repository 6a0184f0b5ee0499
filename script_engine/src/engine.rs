//! Caller-facing script engine
//!
//! An [`Engine`] owns one private instance channel pair. Every call sends a
//! single request on it and blocks for the single reply, so the reply that
//! arrives always belongs to the request just sent.
//!
//! The engine holds only the caller ends of its pair. Once it is dropped the
//! worker's loop sees a disconnect, even if `CLOSE_ENGINE` was never taken.

use crate::config::EngineConfig;
use crate::error::ScriptError;
use crate::negotiation::NegotiationService;
use crate::reader::read_script;
use ipc::{
    channel_pair, Bindings, ChannelId, ChannelScope, CommandTag, Direction, EngineChannels, Message,
};
use lifecycle::CancellationToken;
use serde_json::Value;
use std::fmt;
use std::io::Read;
use std::time::Duration;

/// Lifecycle state of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Instance channels created, nothing sent yet
    Uninitialized,
    /// `NEW_ENGINE` handshake in progress
    Negotiating,
    /// Idle, accepting requests
    Ready,
    /// A request is in flight
    Executing,
    /// Terminal; channels are never used again
    Closed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Uninitialized => write!(f, "uninitialized"),
            EngineState::Negotiating => write!(f, "negotiating"),
            EngineState::Ready => write!(f, "ready"),
            EngineState::Executing => write!(f, "executing"),
            EngineState::Closed => write!(f, "closed"),
        }
    }
}

/// Maps a non-success reply to the caller-visible failure
pub(crate) fn reply_error(reply: Message) -> ScriptError {
    match reply.exception_message() {
        Some(text) => ScriptError::Script(text.to_string()),
        None if reply.command() == CommandTag::Exception => ScriptError::UnknownExceptionFormat,
        None => ScriptError::UnexpectedReply(reply.command()),
    }
}

/// Turns a reply from the instance response channel into a call result
fn decode_reply(reply: Message) -> Result<Option<Value>, ScriptError> {
    match reply.command() {
        CommandTag::Exception => Err(reply_error(reply)),
        tag if tag.route() == (ChannelScope::Instance, Direction::Response) => {
            Ok(reply.into_value())
        }
        _ => Err(reply_error(reply)),
    }
}

/// A synchronous handle on one worker-side execution context.
///
/// Methods that talk to the worker take `&mut self`, so an engine can never
/// have two requests in flight. Dropping the engine closes it.
pub struct Engine {
    channels: EngineChannels,
    state: EngineState,
    /// A cancelled call left a reply the worker has yet to hand over
    reply_pending: bool,
    read_chunk_size: usize,
    close_grace: Duration,
}

impl Engine {
    /// Creates an engine by negotiating a new worker-side context.
    ///
    /// Blocks until the worker acknowledges. If `cancel` fires first the
    /// call fails with [`ScriptError::Interrupted`] and no engine exists.
    pub fn negotiate(
        service: &NegotiationService,
        config: &EngineConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, ScriptError> {
        let (channels, instance) = channel_pair();
        let mut engine = Self {
            channels,
            state: EngineState::Uninitialized,
            reply_pending: false,
            read_chunk_size: config.read_chunk_size,
            close_grace: config.close_grace(),
        };

        engine.transition(EngineState::Negotiating);
        match service.handshake(instance, cancel) {
            Ok(()) => {
                engine.transition(EngineState::Ready);
                tracing::info!(engine = %engine.id(), "engine ready");
                Ok(engine)
            }
            Err(failure) => {
                if failure.delivered {
                    // The worker may have bound a loop to our channels.
                    engine.close();
                } else {
                    engine.transition(EngineState::Closed);
                }
                Err(failure.error)
            }
        }
    }

    /// Identifies this engine's instance channels
    pub fn id(&self) -> ChannelId {
        self.channels.id()
    }

    /// Returns the current lifecycle state
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Checks if the engine has been closed
    pub fn is_closed(&self) -> bool {
        self.state == EngineState::Closed
    }

    /// Evaluates `script` and returns the value of its final expression.
    ///
    /// A worker exception fails with [`ScriptError::Script`] carrying its
    /// text. A reply whose tag does not belong on the instance response
    /// channel fails with [`ScriptError::UnexpectedReply`]. An `EXECUTION`
    /// reply carries no value and yields `null`.
    pub fn evaluate(&mut self, script: &str) -> Result<Value, ScriptError> {
        self.evaluate_cancellable(script, &CancellationToken::none())
    }

    /// Like [`evaluate`](Self::evaluate), abandoning the wait if `cancel` fires.
    ///
    /// Replies decode the same way: a misrouted tag is
    /// [`ScriptError::UnexpectedReply`] and `EXECUTION` yields `null`.
    pub fn evaluate_cancellable(
        &mut self,
        script: &str,
        cancel: &CancellationToken,
    ) -> Result<Value, ScriptError> {
        self.evaluate_with_bindings(script, Bindings::new(), cancel)
    }

    /// Evaluates `script` with `bindings` seeding its local variables.
    ///
    /// Reply decoding matches [`evaluate`](Self::evaluate).
    pub fn evaluate_with_bindings(
        &mut self,
        script: &str,
        bindings: Bindings,
        cancel: &CancellationToken,
    ) -> Result<Value, ScriptError> {
        let request = Message::Evaluate {
            script: script.to_string(),
            bindings,
        };
        Ok(self.request(request, cancel)?.unwrap_or(Value::Null))
    }

    /// Reads `reader` to the end, then evaluates the text
    pub fn evaluate_reader<R: Read>(&mut self, reader: R) -> Result<Value, ScriptError> {
        if self.is_closed() {
            return Err(ScriptError::Closed);
        }
        let script = read_script(reader, self.read_chunk_size)?;
        self.evaluate(&script)
    }

    /// Runs `script` for its side effects.
    ///
    /// Any value in the reply is discarded. A reply whose tag does not belong
    /// on the instance response channel fails with
    /// [`ScriptError::UnexpectedReply`].
    pub fn execute(&mut self, script: &str) -> Result<(), ScriptError> {
        self.execute_cancellable(script, &CancellationToken::none())
    }

    /// Like [`execute`](Self::execute), abandoning the wait if `cancel` fires
    pub fn execute_cancellable(
        &mut self,
        script: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ScriptError> {
        self.request(Message::execute(script), cancel).map(|_| ())
    }

    /// Sends `CLOSE_ENGINE`, best-effort, and enters the terminal state.
    ///
    /// No reply is expected. Each handoff is bounded by the configured grace
    /// period. Returns whether the worker took the message; calling it again
    /// does nothing.
    pub fn close(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }

        if self.reply_pending {
            match self.channels.response.receive_timeout(self.close_grace) {
                Ok(late) => {
                    tracing::debug!(engine = %self.id(), command = %late.command(), "discarded late reply");
                    self.reply_pending = false;
                }
                Err(e) => tracing::debug!(engine = %self.id(), error = %e, "late reply never arrived"),
            }
        }

        let delivered = match self
            .channels
            .request
            .send_timeout(Message::CloseEngine, self.close_grace)
        {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(engine = %self.id(), error = %e, "CLOSE_ENGINE not observed");
                false
            }
        };

        self.transition(EngineState::Closed);
        delivered
    }

    fn transition(&mut self, next: EngineState) {
        tracing::trace!(engine = %self.id(), from = %self.state, to = %next, "state change");
        self.state = next;
    }

    /// One request, one reply.
    fn request(
        &mut self,
        message: Message,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, ScriptError> {
        if self.is_closed() {
            return Err(ScriptError::Closed);
        }

        self.transition(EngineState::Executing);
        let result = self.round_trip(message, cancel);
        self.transition(EngineState::Ready);
        result
    }

    fn round_trip(
        &mut self,
        message: Message,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, ScriptError> {
        if self.reply_pending {
            let late = self.channels.response.receive(cancel)?;
            self.reply_pending = false;
            tracing::debug!(engine = %self.id(), command = %late.command(), "discarded late reply");
        }

        let command = message.command();
        self.channels.request.send(message, cancel)?;
        tracing::debug!(engine = %self.id(), command = %command, "request sent");

        let reply = match self.channels.response.receive(cancel) {
            Ok(reply) => reply,
            Err(e) => {
                if e.is_cancelled() {
                    self.reply_pending = true;
                }
                tracing::warn!(engine = %self.id(), command = %command, "call interrupted awaiting reply");
                return Err(e.into());
            }
        };
        tracing::debug!(engine = %self.id(), reply = %reply.command(), "reply received");

        decode_reply(reply)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.id())
            .field("state", &self.state)
            .field("reply_pending", &self.reply_pending)
            .finish()
    }
}
