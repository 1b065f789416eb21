//! On-disk state
//!
//! Two small bincode records live in the state directory: the transceiver
//! record (serial, registered console ID, band) and the last link statistics.
//! Updates always read the whole record, modify it and write it back through a
//! temporary file so a crash never leaves a truncated record.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{Error, FrequencyBand, Result};
use super::LastStat;

/// File holding the transceiver record
pub const TRANSCEIVER_FILE: &str = "transceiver.state";

/// File holding the link statistics
pub const LAST_STAT_FILE: &str = "laststat.state";

/// What is remembered about the transceiver and its console
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransceiverRecord {
    pub serial: Option<String>,
    pub registered_id: Option<u16>,
    pub band: FrequencyBand,
}

enum Backend {
    Directory(PathBuf),
    Memory(Mutex<HashMap<&'static str, Vec<u8>>>),
}

/// Persistent storage for the transceiver record and link statistics
pub struct StateStore {
    backend: Backend,
}

impl StateStore {
    /// Opens a store rooted at `dir`, creating the directory if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(StateStore { backend: Backend::Directory(dir) })
    }

    /// A store that only lives as long as the process
    pub fn in_memory() -> Self {
        StateStore {
            backend: Backend::Memory(Mutex::new(HashMap::new())),
        }
    }

    /// Directory backing the store, `None` when in memory
    pub fn dir(&self) -> Option<&Path> {
        match &self.backend {
            Backend::Directory(dir) => Some(dir),
            Backend::Memory(_) => None,
        }
    }

    fn read_raw(&self, name: &'static str) -> Result<Option<Vec<u8>>> {
        match &self.backend {
            Backend::Directory(dir) => {
                let path = dir.join(name);
                if !path.exists() {
                    return Ok(None);
                }
                Ok(Some(fs::read(path)?))
            }
            Backend::Memory(map) => {
                let map = map.lock().unwrap_or_else(|e| e.into_inner());
                Ok(map.get(name).cloned())
            }
        }
    }

    fn write_raw(&self, name: &'static str, bytes: Vec<u8>) -> Result<()> {
        match &self.backend {
            Backend::Directory(dir) => {
                let tmp = dir.join(format!("{}.tmp", name));
                fs::write(&tmp, &bytes)?;
                fs::rename(&tmp, dir.join(name))?;
                Ok(())
            }
            Backend::Memory(map) => {
                let mut map = map.lock().unwrap_or_else(|e| e.into_inner());
                map.insert(name, bytes);
                Ok(())
            }
        }
    }

    fn load<T: DeserializeOwned>(&self, name: &'static str) -> Result<Option<T>> {
        match self.read_raw(name)? {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| Error::persistence(format!("Failed to decode {}: {}", name, e))),
            None => Ok(None),
        }
    }

    fn save<T: Serialize>(&self, name: &'static str, value: &T) -> Result<()> {
        let bytes = bincode::serialize(value)
            .map_err(|e| Error::persistence(format!("Failed to encode {}: {}", name, e)))?;
        self.write_raw(name, bytes)?;
        debug!("Persisted {}", name);
        Ok(())
    }

    pub fn load_transceiver(&self) -> Result<Option<TransceiverRecord>> {
        self.load(TRANSCEIVER_FILE)
    }

    pub fn save_transceiver(&self, record: &TransceiverRecord) -> Result<()> {
        self.save(TRANSCEIVER_FILE, record)
    }

    /// Read-modify-write of the transceiver record
    pub fn update_transceiver(&self, f: impl FnOnce(&mut TransceiverRecord)) -> Result<TransceiverRecord> {
        let mut record = self.load_transceiver()?.unwrap_or_default();
        f(&mut record);
        self.save_transceiver(&record)?;
        Ok(record)
    }

    pub fn load_last_stat(&self) -> Result<Option<LastStat>> {
        self.load(LAST_STAT_FILE)
    }

    pub fn save_last_stat(&self, stat: &LastStat) -> Result<()> {
        self.save(LAST_STAT_FILE, stat)
    }

    /// Read-modify-write of the link statistics
    pub fn update_last_stat(&self, f: impl FnOnce(&mut LastStat)) -> Result<LastStat> {
        let mut stat = self.load_last_stat()?.unwrap_or_default();
        f(&mut stat);
        self.save_last_stat(&stat)?;
        Ok(stat)
    }
}
