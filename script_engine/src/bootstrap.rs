//! Worker bootstrap sources and launchers

use crate::reader::read_script;
use ipc::{Message, WorkerEnd};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// Supplies the script that prepares the worker before its first engine.
pub trait BootstrapLoader: Send + Sync {
    /// Name of the resource, used in diagnostics
    fn resource_name(&self) -> &str;

    /// Reads the whole resource, `chunk_size` bytes at a time
    fn load(&self, chunk_size: usize) -> io::Result<String>;
}

/// Bootstrap text held in memory
#[derive(Debug, Clone)]
pub struct StaticBootstrap {
    name: String,
    source: String,
}

impl StaticBootstrap {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }
}

impl BootstrapLoader for StaticBootstrap {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn load(&self, chunk_size: usize) -> io::Result<String> {
        read_script(self.source.as_bytes(), chunk_size)
    }
}

/// Bootstrap resource read from a directory
#[derive(Debug, Clone)]
pub struct FileBootstrap {
    name: String,
    path: PathBuf,
}

impl FileBootstrap {
    /// Looks for `resource` inside `dir`
    pub fn new(dir: impl AsRef<Path>, resource: impl Into<String>) -> Self {
        let name = resource.into();
        let path = dir.as_ref().join(&name);
        Self { name, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BootstrapLoader for FileBootstrap {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn load(&self, chunk_size: usize) -> io::Result<String> {
        let file = File::open(&self.path)?;
        read_script(file, chunk_size)
    }
}

/// Starts the worker that serves a negotiation pair.
///
/// Called at most once per language, with the loaded bootstrap text and the
/// worker side of the negotiation channels. The worker must run `bootstrap`
/// before it acknowledges any `NEW_ENGINE`.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, bootstrap: &str, channels: WorkerEnd<Message>) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_static_bootstrap() {
        let loader = StaticBootstrap::new("prelude", "x = 1\ny = 2");
        assert_eq!(loader.resource_name(), "prelude");
        assert_eq!(loader.load(3).unwrap(), "x = 1\ny = 2");
    }

    #[test]
    fn test_file_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = File::create(dir.path().join("scripting-cpython.py")).unwrap();
        write!(file, "limit = 10").unwrap();

        let loader = FileBootstrap::new(dir.path(), "scripting-cpython.py");
        assert_eq!(loader.resource_name(), "scripting-cpython.py");
        assert_eq!(loader.load(4).unwrap(), "limit = 10");
    }

    #[test]
    fn test_missing_file_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let loader = FileBootstrap::new(dir.path(), "absent.py");
        let err = loader.load(64).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(loader.path().ends_with("absent.py"));
    }
}
