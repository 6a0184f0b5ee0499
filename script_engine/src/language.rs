//! Host-facing engine factory

use crate::bootstrap::{BootstrapLoader, WorkerLauncher};
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::negotiation::NegotiationService;
use lifecycle::CancellationToken;
use parking_lot::Mutex;
use services_logger::{LogEntry, LogSink, TracingSink};
use std::sync::Arc;

const LOG_SOURCE: &str = "script_language";

/// Creates engines for one script language.
///
/// The worker is started lazily by the first [`get_engine`](Self::get_engine):
/// the bootstrap resource is loaded, then handed to the launcher together
/// with the worker side of the negotiation pair. Failures are reported to
/// the log sink and surface as `None`; a later call tries again.
///
/// Dropping the language sends `CLOSE_SERVICE` if a worker was started.
pub struct ScriptLanguage {
    config: EngineConfig,
    service: Arc<NegotiationService>,
    loader: Box<dyn BootstrapLoader>,
    launcher: Box<dyn WorkerLauncher>,
    log: Arc<dyn LogSink>,
    started: Mutex<bool>,
}

impl ScriptLanguage {
    /// Creates a language with its own negotiation service, logging through
    /// `tracing`
    pub fn new(
        config: EngineConfig,
        loader: impl BootstrapLoader + 'static,
        launcher: impl WorkerLauncher + 'static,
    ) -> Self {
        Self {
            config,
            service: NegotiationService::new(),
            loader: Box::new(loader),
            launcher: Box::new(launcher),
            log: Arc::new(TracingSink),
            started: Mutex::new(false),
        }
    }

    /// Negotiates through `service` instead of a private one
    pub fn with_service(mut self, service: Arc<NegotiationService>) -> Self {
        self.service = service;
        self
    }

    /// Reports problems to `log`
    pub fn with_log_sink(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    pub fn engine_name(&self) -> &str {
        &self.config.engine_name
    }

    pub fn language_name(&self) -> &str {
        &self.config.language_name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn service(&self) -> &Arc<NegotiationService> {
        &self.service
    }

    /// Checks if the worker has been started
    pub fn is_started(&self) -> bool {
        *self.started.lock()
    }

    /// Returns a ready engine, or `None` if one could not be created
    pub fn get_engine(&self) -> Option<Engine> {
        self.get_engine_cancellable(&CancellationToken::none())
    }

    /// Like [`get_engine`](Self::get_engine); `cancel` aborts the handshake
    pub fn get_engine_cancellable(&self, cancel: &CancellationToken) -> Option<Engine> {
        if !self.ensure_started() {
            return None;
        }

        match Engine::negotiate(&self.service, &self.config, cancel) {
            Ok(engine) => Some(engine),
            Err(e) => {
                self.log.log(
                    LogEntry::warn(format!(
                        "Engine construction failed in script language for {}: {}",
                        self.config.engine_name, e
                    ))
                    .with_source(LOG_SOURCE)
                    .with_field("engine", &self.config.engine_name)
                    .with_field("error", &e),
                );
                None
            }
        }
    }

    /// Sends `CLOSE_SERVICE` if a worker was started.
    ///
    /// Returns whether the worker took the message.
    pub fn shutdown(&self) -> bool {
        if !self.is_started() {
            return false;
        }
        self.service.close_service(self.config.close_grace())
    }

    fn ensure_started(&self) -> bool {
        let mut started = self.started.lock();
        if *started {
            return true;
        }

        let resource = self.loader.resource_name();
        let bootstrap = match self.loader.load(self.config.read_chunk_size) {
            Ok(text) => text,
            Err(e) => {
                self.log.log(
                    LogEntry::warn(format!(
                        "Unexpected read failure in script language for {}: {}",
                        resource, e
                    ))
                    .with_source(LOG_SOURCE)
                    .with_field("resource", resource)
                    .with_field("error", &e),
                );
                return false;
            }
        };

        if let Err(e) = self
            .launcher
            .launch(&bootstrap, self.service.worker_channels())
        {
            self.log.log(
                LogEntry::warn(format!("Failed to start worker for {}: {}", resource, e))
                    .with_source(LOG_SOURCE)
                    .with_field("resource", resource)
                    .with_field("error", &e),
            );
            return false;
        }

        tracing::info!(
            engine = %self.config.engine_name,
            resource,
            "worker started"
        );
        *started = true;
        true
    }
}

impl Drop for ScriptLanguage {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ScriptLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptLanguage")
            .field("engine_name", &self.config.engine_name)
            .field("resource", &self.loader.resource_name())
            .field("started", &self.is_started())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::StaticBootstrap;
    use crate::testing::{echo_worker, EchoWorker};
    use ipc::{Message, WorkerEnd};
    use services_logger::{LogLevel, MemorySink};
    use serde_json::json;
    use std::io;
    use std::time::Duration;

    struct Unreadable;

    impl BootstrapLoader for Unreadable {
        fn resource_name(&self) -> &str {
            "scripting-cpython.py"
        }

        fn load(&self, _chunk_size: usize) -> io::Result<String> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no such resource"))
        }
    }

    /// Records the bootstrap text, runs an echo worker on the pair
    #[derive(Default)]
    struct RecordingLauncher {
        bootstraps: Arc<Mutex<Vec<String>>>,
        workers: Mutex<Vec<EchoWorker>>,
    }

    impl WorkerLauncher for RecordingLauncher {
        fn launch(&self, bootstrap: &str, channels: WorkerEnd<Message>) -> io::Result<()> {
            self.bootstraps.lock().push(bootstrap.to_string());
            self.workers.lock().push(echo_worker(channels));
            Ok(())
        }
    }

    struct FailingLauncher;

    impl WorkerLauncher for FailingLauncher {
        fn launch(&self, _bootstrap: &str, _channels: WorkerEnd<Message>) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "spawn refused"))
        }
    }

    fn config() -> EngineConfig {
        EngineConfig::default().with_close_grace(Duration::from_millis(50))
    }

    #[test]
    fn test_names_come_from_config() {
        let language = ScriptLanguage::new(
            config(),
            StaticBootstrap::new("prelude", ""),
            RecordingLauncher::default(),
        );
        assert_eq!(language.engine_name(), "cpython");
        assert_eq!(language.language_name(), "CPython");
        assert!(!language.is_started());
    }

    #[test]
    fn test_get_engine_starts_worker_once() {
        let launcher = RecordingLauncher::default();
        let bootstraps = Arc::clone(&launcher.bootstraps);
        let language = ScriptLanguage::new(
            config(),
            StaticBootstrap::new("prelude", "x = 1"),
            launcher,
        );

        let mut first = language.get_engine().unwrap();
        let second = language.get_engine().unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(first.evaluate("ping").unwrap(), json!("ping"));
        assert_eq!(*bootstraps.lock(), vec!["x = 1".to_string()]);
        assert!(language.is_started());
    }

    #[test]
    fn test_unreadable_bootstrap_is_logged() {
        let sink = Arc::new(MemorySink::new());
        let language = ScriptLanguage::new(config(), Unreadable, RecordingLauncher::default())
            .with_log_sink(sink.clone());

        assert!(language.get_engine().is_none());
        assert!(language.get_engine().is_none());
        assert!(!language.is_started());

        let warnings = sink.at_least(LogLevel::Warn);
        assert_eq!(warnings.len(), 2);
        assert_eq!(
            warnings[0].message,
            "Unexpected read failure in script language for scripting-cpython.py: no such resource"
        );
        assert_eq!(warnings[0].field("resource"), Some("scripting-cpython.py"));
    }

    #[test]
    fn test_launch_failure_is_logged() {
        let sink = Arc::new(MemorySink::new());
        let language = ScriptLanguage::new(
            config(),
            StaticBootstrap::new("prelude", ""),
            FailingLauncher,
        )
        .with_log_sink(sink.clone());

        assert!(language.get_engine().is_none());
        assert_eq!(sink.at_least(LogLevel::Warn).len(), 1);
    }

    #[test]
    fn test_shutdown_before_start_sends_nothing() {
        let language = ScriptLanguage::new(
            config(),
            StaticBootstrap::new("prelude", ""),
            FailingLauncher,
        );
        assert!(!language.shutdown());
        assert!(!language.service().is_closed());
    }

    #[test]
    fn test_engine_after_shutdown_is_none() {
        let sink = Arc::new(MemorySink::new());
        let language = ScriptLanguage::new(
            config(),
            StaticBootstrap::new("prelude", ""),
            RecordingLauncher::default(),
        )
        .with_log_sink(sink.clone());

        drop(language.get_engine());
        language.shutdown();
        assert!(language.get_engine().is_none());
        assert!(sink.entries()[0].message.contains("Script service is closed"));
    }
}
