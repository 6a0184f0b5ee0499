//! # Inter-Context Communication (IPC)
//!
//! This crate defines the handoff primitives used between a script engine
//! and the worker context that runs its scripts.
//!
//! ## Philosophy
//!
//! - **Rendezvous, not queues**: Every channel is unbuffered, so at most one
//!   message is in flight per channel
//! - **Typed, not positional**: Each command is an enum variant with named fields
//! - **Cancellable**: Every blocking wait can be abandoned through a
//!   `lifecycle::CancellationToken` without losing or misdelivering a message
//!
//! ## Architecture
//!
//! A [`Message`] moves over a rendezvous channel. Channels come in
//! request/response pairs made by [`channel_pair`]: one shared negotiation
//! pair creates engines, and each engine then owns a private instance pair.
//! The caller keeps a [`CallerEnd`] and the worker gets the [`WorkerEnd`].
//! Because a pair never carries more than one outstanding request, a reply
//! needs no correlation ID.

pub mod channel;
pub mod error;
pub mod message;

pub use channel::{
    channel_pair, rendezvous, CallerEnd, ChannelId, RendezvousReceiver, RendezvousSender,
    WorkerEnd,
};
pub use error::{ChannelError, SendError};
pub use message::{
    Bindings, ChannelScope, CommandTag, Direction, EngineChannels, InstanceChannels, Message,
};
