//! In-process [`WorkerLauncher`]

use crate::runner::RunnerFactory;
use crate::service::{WorkerHandle, WorkerService};
use ipc::{Message, WorkerEnd};
use parking_lot::Mutex;
use script_engine::WorkerLauncher;
use std::io;
use std::sync::Arc;

/// Runs the worker on threads of the current process.
///
/// The bootstrap text is checked once in a scratch runner at launch and then
/// executed by every new instance before it serves requests.
pub struct SimLauncher {
    factory: RunnerFactory,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl SimLauncher {
    pub fn new(factory: RunnerFactory) -> Self {
        Self {
            factory,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Number of workers launched so far
    pub fn launched(&self) -> usize {
        self.workers.lock().len()
    }

    /// Live instance loops across every launched worker
    pub fn live_instances(&self) -> usize {
        self.workers.lock().iter().map(|w| w.live_instances()).sum()
    }
}

impl WorkerLauncher for SimLauncher {
    fn launch(&self, bootstrap: &str, channels: WorkerEnd<Message>) -> io::Result<()> {
        (self.factory)()
            .execute(bootstrap)
            .map_err(|text| io::Error::new(io::ErrorKind::InvalidData, text))?;

        let prelude = bootstrap.to_string();
        let inner = Arc::clone(&self.factory);
        let factory: RunnerFactory = Arc::new(move || {
            let mut runner = inner();
            if let Err(text) = runner.execute(&prelude) {
                tracing::warn!(error = %text, "bootstrap failed in new instance");
            }
            runner
        });

        let handle = WorkerService::spawn(channels, factory)?;
        self.workers.lock().push(handle);
        Ok(())
    }
}

impl std::fmt::Debug for SimLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimLauncher")
            .field("launched", &self.launched())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::arithmetic_factory;
    use ipc::channel_pair;
    use lifecycle::CancellationToken;
    use serde_json::json;

    #[test]
    fn test_instances_see_bootstrap() {
        let launcher = SimLauncher::new(arithmetic_factory());
        let (negotiation, worker) = channel_pair();
        launcher.launch("limit = 10", worker).unwrap();

        let none = CancellationToken::none();
        let (instance, channels) = channel_pair();
        negotiation
            .request
            .send(Message::NewEngine { channels }, &none)
            .unwrap();
        negotiation.response.receive(&none).unwrap();

        instance.request.send(Message::evaluate("limit * 2"), &none).unwrap();
        match instance.response.receive(&none).unwrap() {
            Message::EvaluateResult { value } => assert_eq!(value, json!(20)),
            other => panic!("unexpected {}", other.command()),
        }
        assert_eq!(launcher.launched(), 1);
    }

    #[test]
    fn test_broken_bootstrap_refused() {
        let launcher = SimLauncher::new(arithmetic_factory());
        let err = launcher
            .launch("raise ImportError: no module", channel_pair().1)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(err.to_string(), "ImportError: no module");
        assert_eq!(launcher.launched(), 0);
    }
}
