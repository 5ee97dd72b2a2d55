use crate::fault::FaultCounters;
use crate::records::replace_file;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

const COUNTERS_FILE: &str = "fault_counters";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("counter store I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("counter file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// Durable home of the I/O-error and reboot counts.
pub trait CounterStore {
    fn load(&self) -> Result<FaultCounters, StoreError>;
    /// Replaces both counters at once.
    fn save(&mut self, counters: &FaultCounters) -> Result<(), StoreError>;

    fn reset(&mut self) -> Result<(), StoreError> {
        self.save(&FaultCounters::default())
    }
}

/// Both counters in one small `key=value` text file, replaced through a
/// temp file + rename so a crash mid-write leaves either the old or the new
/// pair on disk, never a mix.
#[derive(Debug, Clone)]
pub struct FileCounterStore {
    dir: PathBuf,
}

impl FileCounterStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(COUNTERS_FILE)
    }

    fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub fn encode_counters(counters: &FaultCounters) -> String {
    format!("io_errors={}\nreboots={}\n", counters.io_errors, counters.reboots)
}

pub fn decode_counters(text: &str) -> Result<FaultCounters, String> {
    let mut io_errors = None;
    let mut reboots = None;
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, got {:?}", line))?;
        let value: u32 = value
            .trim()
            .parse()
            .map_err(|e| format!("bad value for {}: {}", key.trim(), e))?;
        match key.trim() {
            "io_errors" => io_errors = Some(value),
            "reboots" => reboots = Some(value),
            other => return Err(format!("unknown key {:?}", other)),
        }
    }
    match (io_errors, reboots) {
        (Some(io_errors), Some(reboots)) => Ok(FaultCounters { io_errors, reboots }),
        _ => Err("missing io_errors or reboots".into()),
    }
}

impl CounterStore for FileCounterStore {
    fn load(&self) -> Result<FaultCounters, StoreError> {
        let path = self.path();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(FaultCounters::default()),
            Err(e) => return Err(Self::io_error(&path)(e)),
        };
        decode_counters(&text).map_err(|reason| StoreError::Corrupt { path, reason })
    }

    fn save(&mut self, counters: &FaultCounters) -> Result<(), StoreError> {
        let path = self.path();
        replace_file(&path, encode_counters(counters).as_bytes()).map_err(Self::io_error(&path))
    }
}

/// Volatile store for dry runs and tests. Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct MemoryCounterStore {
    counters: Arc<Mutex<FaultCounters>>,
}

impl MemoryCounterStore {
    pub fn new(counters: FaultCounters) -> Self {
        Self {
            counters: Arc::new(Mutex::new(counters)),
        }
    }

    pub fn get_counters(&self) -> FaultCounters {
        match self.counters.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl CounterStore for MemoryCounterStore {
    fn load(&self) -> Result<FaultCounters, StoreError> {
        Ok(self.get_counters())
    }

    fn save(&mut self, counters: &FaultCounters) -> Result<(), StoreError> {
        match self.counters.lock() {
            Ok(mut guard) => *guard = *counters,
            Err(poisoned) => *poisoned.into_inner() = *counters,
        }
        Ok(())
    }
}
