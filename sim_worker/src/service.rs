//! Requester and instance loops

use crate::runner::{RunnerFactory, ScriptRunner};
use ipc::{ChannelId, InstanceChannels, Message, WorkerEnd};
use lifecycle::{CancellationReason, CancellationSource, CancellationToken};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[derive(Debug, Default)]
struct WorkerState {
    live: AtomicUsize,
    bound: Mutex<Vec<ChannelId>>,
}

/// Worker side of the negotiation protocol
pub struct WorkerService;

impl WorkerService {
    /// Starts serving `negotiation` on a background thread.
    ///
    /// Every acknowledged `NEW_ENGINE` gets its own instance thread and a
    /// runner from `factory`. The requester thread exits on `CLOSE_SERVICE`.
    /// An instance thread exits on `CLOSE_ENGINE` or once its engine's
    /// channel ends are dropped.
    pub fn spawn(
        negotiation: WorkerEnd<Message>,
        factory: RunnerFactory,
    ) -> io::Result<WorkerHandle> {
        let shutdown = CancellationSource::new();
        let state = Arc::new(WorkerState::default());

        let token = shutdown.token();
        let loop_state = Arc::clone(&state);
        let thread = thread::Builder::new()
            .name("script-requester".to_string())
            .spawn(move || requester_loop(negotiation, factory, token, loop_state))?;

        Ok(WorkerHandle {
            shutdown,
            state,
            thread: Some(thread),
        })
    }
}

/// Control handle for a running worker.
///
/// Dropping the handle stops every loop of the worker.
pub struct WorkerHandle {
    shutdown: CancellationSource,
    state: Arc<WorkerState>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Number of instance loops still running
    pub fn live_instances(&self) -> usize {
        self.state.live.load(Ordering::Acquire)
    }

    /// Instance channels acknowledged so far, in order
    pub fn bound_instances(&self) -> Vec<ChannelId> {
        self.state.bound.lock().clone()
    }

    /// Stops the requester and every instance loop
    pub fn stop(&self) {
        self.shutdown.cancel(CancellationReason::Shutdown);
    }

    /// Waits for the requester thread to exit
    pub fn join(mut self) -> thread::Result<()> {
        match self.thread.take() {
            Some(thread) => thread.join(),
            None => Ok(()),
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("live_instances", &self.live_instances())
            .field("stopped", &self.shutdown.is_cancelled())
            .finish()
    }
}

fn requester_loop(
    negotiation: WorkerEnd<Message>,
    factory: RunnerFactory,
    token: CancellationToken,
    state: Arc<WorkerState>,
) {
    loop {
        let message = match negotiation.request.receive(&token) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "requester stopped");
                return;
            }
        };

        let reply = match message {
            Message::NewEngine { channels } => {
                let id = channels.id();
                match start_instance(channels, &factory, &token, &state) {
                    Ok(()) => {
                        state.bound.lock().push(id);
                        tracing::debug!(instance = %id, "instance bound");
                        Message::NewEngineResult
                    }
                    Err(e) => Message::exception(format!("Failed to start engine: {}", e)),
                }
            }
            Message::CloseService => {
                tracing::info!("CLOSE_SERVICE received");
                return;
            }
            other => {
                tracing::warn!(command = %other.command(), "unknown command on negotiation channel");
                Message::exception(format!("Unknown command: {}", other.command()))
            }
        };

        if let Err(e) = negotiation.response.send(reply, &token) {
            tracing::debug!(error = %e, "negotiation reply not delivered");
            return;
        }
    }
}

fn start_instance(
    channels: InstanceChannels,
    factory: &RunnerFactory,
    token: &CancellationToken,
    state: &Arc<WorkerState>,
) -> io::Result<()> {
    let runner = factory();
    let token = token.clone();
    let loop_state = Arc::clone(state);

    state.live.fetch_add(1, Ordering::AcqRel);
    let spawned = thread::Builder::new()
        .name(format!("script-instance-{}", channels.id()))
        .spawn(move || {
            instance_loop(channels, runner, token);
            loop_state.live.fetch_sub(1, Ordering::AcqRel);
        });

    if let Err(e) = spawned {
        state.live.fetch_sub(1, Ordering::AcqRel);
        return Err(e);
    }
    Ok(())
}

fn instance_loop(
    channels: InstanceChannels,
    mut runner: Box<dyn ScriptRunner>,
    token: CancellationToken,
) {
    let id = channels.id();
    while let Ok(message) = channels.request.receive(&token) {
        let reply = match message {
            Message::Execute { script } => match runner.execute(&script) {
                Ok(()) => Message::Execution,
                Err(text) => Message::exception(text),
            },
            Message::Evaluate { script, bindings } => match runner.evaluate(&script, &bindings) {
                Ok(value) => Message::EvaluateResult { value },
                Err(text) => Message::exception(text),
            },
            Message::CloseEngine => {
                tracing::debug!(instance = %id, "CLOSE_ENGINE received");
                return;
            }
            other => Message::exception(format!("Unknown command: {}", other.command())),
        };

        if channels.response.send(reply, &token).is_err() {
            break;
        }
    }
    tracing::debug!(instance = %id, "instance loop stopped");
}
