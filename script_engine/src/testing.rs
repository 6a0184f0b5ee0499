//! In-crate fake worker for unit tests

use crossbeam_channel::{Receiver, Sender};
use ipc::{ChannelId, InstanceChannels, Message, WorkerEnd};
use lifecycle::{CancellationReason, CancellationSource, CancellationToken};
use serde_json::{json, Value};
use std::thread;
use std::time::Duration;

/// Worker that echoes scripts back, with a few scripted behaviours:
///
/// - `!fail:TEXT` raises `TEXT`
/// - `!malformed` raises with a non-text payload
/// - `!ack` answers with the handshake reply
/// - `!bindings` returns the bindings it received
/// - `!sleep:MS:TEXT` waits, then returns `TEXT`
/// - `!execution` answers with an `EXECUTION` reply
pub struct EchoWorker {
    shutdown: CancellationSource,
    closed: Receiver<ChannelId>,
}

impl EchoWorker {
    /// Waits for the next `CLOSE_ENGINE` the worker observed
    pub fn wait_closed(&self, timeout: Duration) -> Option<ChannelId> {
        self.closed.recv_timeout(timeout).ok()
    }
}

impl Drop for EchoWorker {
    fn drop(&mut self) {
        self.shutdown.cancel(CancellationReason::Shutdown);
    }
}

/// Serves the worker side of a negotiation pair until dropped
pub fn echo_worker(negotiation: WorkerEnd<Message>) -> EchoWorker {
    let shutdown = CancellationSource::new();
    let (closed_tx, closed) = crossbeam_channel::unbounded();
    let token = shutdown.token();

    thread::spawn(move || {
        while let Ok(message) = negotiation.request.receive(&token) {
            match message {
                Message::NewEngine { channels } => {
                    let instance_token = token.clone();
                    let closed_tx = closed_tx.clone();
                    thread::spawn(move || serve(channels, instance_token, closed_tx));
                    if negotiation
                        .response
                        .send(Message::NewEngineResult, &token)
                        .is_err()
                    {
                        return;
                    }
                }
                Message::CloseService => return,
                other => {
                    let reply = Message::exception(format!("Unknown command: {}", other.command()));
                    let _ = negotiation.response.send(reply, &token);
                }
            }
        }
    });

    EchoWorker { shutdown, closed }
}

fn serve(channels: InstanceChannels, token: CancellationToken, closed: Sender<ChannelId>) {
    while let Ok(message) = channels.request.receive(&token) {
        let reply = match message {
            Message::Evaluate { script, bindings } => evaluate(&script, bindings),
            Message::Execute { .. } => Message::Execution,
            Message::CloseEngine => {
                let _ = closed.send(channels.id());
                return;
            }
            other => Message::exception(format!("Unknown command: {}", other.command())),
        };
        if channels.response.send(reply, &token).is_err() {
            return;
        }
    }
}

fn evaluate(script: &str, bindings: ipc::Bindings) -> Message {
    if let Some(text) = script.strip_prefix("!fail:") {
        return Message::exception(text);
    }
    if let Some(rest) = script.strip_prefix("!sleep:") {
        let (ms, text) = rest.split_once(':').unwrap_or((rest, ""));
        thread::sleep(Duration::from_millis(ms.parse().unwrap_or(0)));
        return Message::EvaluateResult { value: json!(text) };
    }
    match script {
        "!malformed" => Message::Exception {
            details: vec![json!(1), json!(2)],
        },
        "!ack" => Message::NewEngineResult,
        "!execution" => Message::Execution,
        "!bindings" => Message::EvaluateResult {
            value: Value::Object(bindings),
        },
        _ => Message::EvaluateResult {
            value: json!(script),
        },
    }
}
