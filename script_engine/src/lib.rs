//! # Script Engine
//!
//! Synchronous script execution against a worker context that lives on the
//! other side of rendezvous channels.
//!
//! ## Philosophy
//!
//! - **One request, one reply**: An engine never has two requests in flight,
//!   so replies need no correlation
//! - **Cancellable waits**: Every call can be abandoned with a
//!   `lifecycle::CancellationToken`; nothing in the protocol times out by itself
//! - **Best-effort teardown**: Closing notifies the worker if it is still
//!   listening and never reports a failure
//!
//! ## Architecture
//!
//! - [`NegotiationService`]: the shared negotiation pair; creates engines
//! - [`Engine`]: owns one instance pair and turns calls into messages
//! - [`ScriptLanguage`]: host-facing factory that starts the worker lazily
//! - [`BootstrapLoader`] / [`WorkerLauncher`]: seams to the worker process
//!
//! ## Example
//!
//! ```no_run
//! use lifecycle::CancellationToken;
//! use script_engine::{Engine, EngineConfig, NegotiationService};
//!
//! let service = NegotiationService::shared();
//! // A worker must be serving `service.worker_channels()`.
//! let mut engine = Engine::negotiate(&service, &EngineConfig::default(), &CancellationToken::none())?;
//! let four = engine.evaluate("return 2 + 2")?;
//! # Ok::<(), script_engine::ScriptError>(())
//! ```

pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod error;
pub mod language;
pub mod negotiation;
pub mod reader;

#[cfg(test)]
mod testing;

pub use bootstrap::{BootstrapLoader, FileBootstrap, StaticBootstrap, WorkerLauncher};
pub use config::{EngineConfig, DEFAULT_READ_CHUNK_SIZE};
pub use engine::{Engine, EngineState};
pub use error::{ConfigError, ScriptError};
pub use language::ScriptLanguage;
pub use negotiation::NegotiationService;
pub use reader::read_script;
