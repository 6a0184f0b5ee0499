//! Protocol Test Utilities
//!
//! Shared helpers for the end-to-end protocol tests.
//!
//! ## Test Philosophy
//!
//! - **Real threads**: Engines and workers run concurrently, as in production
//! - **No lost or misrouted replies**: Every reply reaches the caller that sent the request
//! - **Cancellation is safe**: An abandoned call never poisons the next one
//! - **Teardown never hangs**: Closing works whether or not the worker is still there

use ipc::{CommandTag, Message, WorkerEnd};
use lifecycle::{CancellationReason, CancellationSource, CancellationToken};
use parking_lot::Mutex;
use script_engine::{Engine, EngineConfig, NegotiationService, ScriptError};
use sim_worker::{arithmetic_factory, WorkerHandle, WorkerService};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Configuration with a short teardown grace period
pub fn test_config() -> EngineConfig {
    EngineConfig::default().with_close_grace(Duration::from_millis(200))
}

/// Bootstrap helper for tests
///
/// Creates a private negotiation service served by an arithmetic worker.
pub fn test_bootstrap() -> (Arc<NegotiationService>, WorkerHandle) {
    let service = NegotiationService::new();
    let worker = WorkerService::spawn(service.worker_channels(), arithmetic_factory())
        .expect("Failed to spawn worker");
    (service, worker)
}

/// Negotiates an engine without cancellation
pub fn negotiate(service: &NegotiationService) -> Result<Engine, ScriptError> {
    Engine::negotiate(service, &test_config(), &CancellationToken::none())
}

/// A cancellation source that fires on its own after `delay`
pub fn cancel_after(delay: Duration) -> CancellationSource {
    let source = CancellationSource::new();
    source
        .cancel_after(delay, CancellationReason::Timeout)
        .expect("Failed to start cancellation timer");
    source
}

/// Worker that answers instance requests with canned replies
///
/// Handshakes are acknowledged normally. Each instance request is recorded
/// and answered with the next reply from the queue.
pub struct ScriptedWorker {
    shutdown: CancellationSource,
    requests: Arc<Mutex<Vec<CommandTag>>>,
}

impl ScriptedWorker {
    pub fn spawn(negotiation: WorkerEnd<Message>, replies: Vec<Message>) -> Self {
        let shutdown = CancellationSource::new();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let replies = Arc::new(Mutex::new(VecDeque::from(replies)));

        let token = shutdown.token();
        let seen = Arc::clone(&requests);
        thread::spawn(move || {
            while let Ok(Message::NewEngine { channels }) = negotiation.request.receive(&token) {
                let instance_token = token.clone();
                let seen = Arc::clone(&seen);
                let replies = Arc::clone(&replies);
                thread::spawn(move || {
                    while let Ok(request) = channels.request.receive(&instance_token) {
                        seen.lock().push(request.command());
                        if !request.command().expects_reply() {
                            break;
                        }
                        let Some(reply) = replies.lock().pop_front() else {
                            break;
                        };
                        if channels.response.send(reply, &instance_token).is_err() {
                            break;
                        }
                    }
                });
                if negotiation
                    .response
                    .send(Message::NewEngineResult, &token)
                    .is_err()
                {
                    break;
                }
            }
        });

        Self { shutdown, requests }
    }

    /// Commands received on instance channels so far
    pub fn requests(&self) -> Vec<CommandTag> {
        self.requests.lock().clone()
    }
}

impl Drop for ScriptedWorker {
    fn drop(&mut self) {
        self.shutdown.cancel(CancellationReason::Shutdown);
    }
}
