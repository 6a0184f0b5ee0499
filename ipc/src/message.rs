//! Protocol messages exchanged between an engine and its worker

use crate::channel::{CallerEnd, WorkerEnd};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Variables used to seed a script's local scope
pub type Bindings = Map<String, Value>;

/// The worker's ends of one engine's private channel pair
pub type InstanceChannels = WorkerEnd<Message>;

/// The engine's ends of its private channel pair
pub type EngineChannels = CallerEnd<Message>;

/// Which channel pair a command travels on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelScope {
    /// The shared pair used to create new engines
    Negotiation,
    /// An engine's private pair
    Instance,
}

/// Which side of a pair a command travels on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Caller to worker
    Request,
    /// Worker to caller
    Response,
}

/// Discriminator naming a message's meaning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandTag {
    NewEngine,
    NewEngineResult,
    Execute,
    Evaluate,
    Execution,
    EvaluateResult,
    Exception,
    CloseEngine,
    CloseService,
}

impl CommandTag {
    /// Every command, in protocol order
    pub const ALL: [CommandTag; 9] = [
        CommandTag::NewEngine,
        CommandTag::NewEngineResult,
        CommandTag::Execute,
        CommandTag::Evaluate,
        CommandTag::Execution,
        CommandTag::EvaluateResult,
        CommandTag::Exception,
        CommandTag::CloseEngine,
        CommandTag::CloseService,
    ];

    /// Wire name of the command
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandTag::NewEngine => "NEW_ENGINE",
            CommandTag::NewEngineResult => "NEW_ENGINE_RESULT",
            CommandTag::Execute => "EXECUTE",
            CommandTag::Evaluate => "EVALUATE",
            CommandTag::Execution => "EXECUTION",
            CommandTag::EvaluateResult => "EVALUATE_RESULT",
            CommandTag::Exception => "EXCEPTION",
            CommandTag::CloseEngine => "CLOSE_ENGINE",
            CommandTag::CloseService => "CLOSE_SERVICE",
        }
    }

    /// The channel a well-behaved party sends this command on.
    ///
    /// `EXCEPTION` is listed on the instance response channel; a worker may
    /// also use it on the negotiation response channel to reject a command
    /// it does not understand.
    pub fn route(&self) -> (ChannelScope, Direction) {
        use ChannelScope::*;
        use Direction::*;
        match self {
            CommandTag::NewEngine | CommandTag::CloseService => (Negotiation, Request),
            CommandTag::NewEngineResult => (Negotiation, Response),
            CommandTag::Execute | CommandTag::Evaluate | CommandTag::CloseEngine => {
                (Instance, Request)
            }
            CommandTag::Execution | CommandTag::EvaluateResult | CommandTag::Exception => {
                (Instance, Response)
            }
        }
    }

    /// Checks if a reply is expected after sending this command
    pub fn expects_reply(&self) -> bool {
        matches!(
            self,
            CommandTag::NewEngine | CommandTag::Execute | CommandTag::Evaluate
        )
    }
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One protocol message.
///
/// Each variant carries exactly the fields its command needs. Messages are
/// moved through channels, never cloned, so every message is consumed by
/// exactly one receiver.
#[derive(Debug)]
pub enum Message {
    /// Ask the worker to bind a new per-instance loop to `channels`.
    ///
    /// The engine keeps the matching [`EngineChannels`].
    NewEngine { channels: InstanceChannels },
    /// The worker has bound the loop
    NewEngineResult,
    /// Run a script for its side effects
    Execute { script: String },
    /// Run a script and return the value of its final expression
    Evaluate { script: String, bindings: Bindings },
    /// `Execute` finished
    Execution,
    /// `Evaluate` finished with `value`
    EvaluateResult { value: Value },
    /// The worker failed the request.
    ///
    /// A well-formed report holds a single text element; anything else is
    /// still carried so the receiver can reject it.
    Exception { details: Vec<Value> },
    /// Release the per-instance loop (no reply)
    CloseEngine,
    /// Shut the worker side down (no reply)
    CloseService,
}

impl Message {
    /// Builds an `Evaluate` request with no bindings
    pub fn evaluate(script: impl Into<String>) -> Self {
        Message::Evaluate {
            script: script.into(),
            bindings: Bindings::new(),
        }
    }

    /// Builds an `Execute` request
    pub fn execute(script: impl Into<String>) -> Self {
        Message::Execute {
            script: script.into(),
        }
    }

    /// Builds a well-formed exception report
    pub fn exception(message: impl Into<String>) -> Self {
        Message::Exception {
            details: vec![Value::String(message.into())],
        }
    }

    /// Returns the command tag of this message
    pub fn command(&self) -> CommandTag {
        match self {
            Message::NewEngine { .. } => CommandTag::NewEngine,
            Message::NewEngineResult => CommandTag::NewEngineResult,
            Message::Execute { .. } => CommandTag::Execute,
            Message::Evaluate { .. } => CommandTag::Evaluate,
            Message::Execution => CommandTag::Execution,
            Message::EvaluateResult { .. } => CommandTag::EvaluateResult,
            Message::Exception { .. } => CommandTag::Exception,
            Message::CloseEngine => CommandTag::CloseEngine,
            Message::CloseService => CommandTag::CloseService,
        }
    }

    /// Number of payload elements this message carries on the wire
    pub fn arity(&self) -> usize {
        match self {
            Message::NewEngine { .. } | Message::Evaluate { .. } => 2,
            Message::Execute { .. } | Message::EvaluateResult { .. } => 1,
            Message::Exception { details } => details.len(),
            Message::NewEngineResult
            | Message::Execution
            | Message::CloseEngine
            | Message::CloseService => 0,
        }
    }

    /// The error text of a well-formed exception report.
    ///
    /// Returns `None` for other commands and for exception payloads that do
    /// not consist of exactly one text element.
    pub fn exception_message(&self) -> Option<&str> {
        match self {
            Message::Exception { details } => match details.as_slice() {
                [Value::String(text)] => Some(text.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Consumes a reply and returns its first payload element, if any
    pub fn into_value(self) -> Option<Value> {
        match self {
            Message::EvaluateResult { value } => Some(value),
            Message::Exception { details } => details.into_iter().next(),
            _ => None,
        }
    }
}
