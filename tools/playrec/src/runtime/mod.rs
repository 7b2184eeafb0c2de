use crate::errors::RecorderError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;

    fn now_ms(&self) -> u64 {
        self.now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, RecorderError>;
    fn write_string(&self, path: &Path, contents: &str) -> Result<(), RecorderError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), RecorderError>;
}

pub trait Terminal: Send + Sync {
    fn stdout_is_tty(&self) -> bool;
    fn write_line(&self, line: &str) -> Result<(), RecorderError>;
}

pub struct ProductionClock;

impl Clock for ProductionClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, RecorderError> {
        std::fs::read_to_string(path)
            .map_err(|e| RecorderError::Io(format!("{}: {e}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), RecorderError> {
        std::fs::write(path, contents)
            .map_err(|e| RecorderError::Io(format!("{}: {e}", path.display())))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), RecorderError> {
        std::fs::create_dir_all(path)
            .map_err(|e| RecorderError::Io(format!("{}: {e}", path.display())))
    }
}

pub struct ProductionTerminal;

impl Terminal for ProductionTerminal {
    fn stdout_is_tty(&self) -> bool {
        std::io::IsTerminal::is_terminal(&std::io::stdout())
    }

    fn write_line(&self, line: &str) -> Result<(), RecorderError> {
        use std::io::Write;
        let mut out = std::io::stdout().lock();
        writeln!(out, "{line}").map_err(|e| RecorderError::Io(e.to_string()))
    }
}

#[derive(Clone)]
pub struct Runtime {
    pub clock: Arc<dyn Clock>,
    pub file_system: Arc<dyn FileSystem>,
    pub terminal: Arc<dyn Terminal>,
}

impl Runtime {
    pub fn production() -> Self {
        Self {
            clock: Arc::new(ProductionClock),
            file_system: Arc::new(ProductionFileSystem),
            terminal: Arc::new(ProductionTerminal),
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::production()
    }
}

fn guard<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Manually advanced clock.
#[derive(Clone)]
pub struct FakeClock {
    now: Arc<Mutex<SystemTime>>,
}

impl FakeClock {
    pub fn new(now: SystemTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = guard(&self.now);
        *now += by;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(SystemTime::UNIX_EPOCH)
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        *guard(&self.now)
    }
}

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<BTreeMap<PathBuf, String>>>,
    dirs: Arc<Mutex<Vec<PathBuf>>>,
    fail_next: Arc<Mutex<Option<RecorderError>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        guard(&fs.files).insert(path.into(), contents.into());
        fs
    }

    pub fn set_fail_next(&self, error: RecorderError) {
        *guard(&self.fail_next) = Some(error);
    }

    pub fn file(&self, path: &Path) -> Option<String> {
        guard(&self.files).get(path).cloned()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        guard(&self.files).keys().cloned().collect()
    }

    pub fn created_dirs(&self) -> Vec<PathBuf> {
        guard(&self.dirs).clone()
    }

    fn maybe_fail(&self) -> Result<(), RecorderError> {
        match guard(&self.fail_next).take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, RecorderError> {
        self.maybe_fail()?;
        self.file(path)
            .ok_or_else(|| RecorderError::Io(format!("missing file {}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), RecorderError> {
        self.maybe_fail()?;
        guard(&self.files).insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), RecorderError> {
        self.maybe_fail()?;
        guard(&self.dirs).push(path.to_path_buf());
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct FakeTerminal {
    pub is_tty: bool,
    writes: Arc<Mutex<Vec<String>>>,
}

impl FakeTerminal {
    pub fn new(is_tty: bool) -> Self {
        Self {
            is_tty,
            ..Self::default()
        }
    }

    pub fn written_lines(&self) -> Vec<String> {
        guard(&self.writes).clone()
    }
}

impl Terminal for FakeTerminal {
    fn stdout_is_tty(&self) -> bool {
        self.is_tty
    }

    fn write_line(&self, line: &str) -> Result<(), RecorderError> {
        guard(&self.writes).push(line.to_string());
        Ok(())
    }
}
