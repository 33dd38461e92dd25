//! Append-only JSONL store for completed-shutdown records.

use crate::sink::PersistenceSink;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use shutdown_core::{PersistenceFailure, SimulationRecord, TimeBase};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// One line of the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Wall-clock Unix timestamp in microseconds
    pub unix_us: u64,
    pub recorded_at: DateTime<Local>,
    pub record: SimulationRecord,
}

/// Thread-safe record store writing one JSON object per line.
#[derive(Clone)]
pub struct JsonlRecordStore {
    path: PathBuf,
    writer: Arc<Mutex<BufWriter<File>>>,
    timebase: TimeBase,
}

impl JsonlRecordStore {
    /// Opens (or creates) the store at `path` in append mode, creating parent
    /// directories as needed.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Arc::new(Mutex::new(BufWriter::with_capacity(8192, file))),
            timebase: TimeBase::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocking append; flushed before returning.
    pub fn append(&self, record: SimulationRecord) -> std::io::Result<()> {
        let entry = StoredRecord {
            unix_us: self.timebase.unix_us(),
            recorded_at: self.timebase.local_now(),
            record,
        };
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| std::io::Error::other("record store writer poisoned"))?;
        serde_json::to_writer(&mut *writer, &entry)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    /// Reads every stored line back.
    pub fn load(path: &Path) -> std::io::Result<Vec<StoredRecord>> {
        let reader = BufReader::new(File::open(path)?);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            out.push(serde_json::from_str(&line)?);
        }
        Ok(out)
    }
}

impl PersistenceSink for JsonlRecordStore {
    async fn persist(&self, record: SimulationRecord) -> Result<(), PersistenceFailure> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.append(record))
            .await
            .map_err(|e| PersistenceFailure::Unavailable(e.to_string()))?
            .map_err(|e| PersistenceFailure::Rejected(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shutdown_core::{OutputLevel, SimulationParameters};
    use tempfile::tempdir;

    fn record(latency_ms: f64) -> SimulationRecord {
        SimulationRecord::new(
            &SimulationParameters::default(),
            OutputLevel::new(45.0, 12.0),
            latency_ms,
            4.0,
        )
    }

    #[test]
    fn store_writes_jsonl() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records").join("simulation.jsonl");

        let store = JsonlRecordStore::open(&path).unwrap();
        store.append(record(47.5)).unwrap();
        store.append(record(52.0)).unwrap();

        let stored = JsonlRecordStore::load(&path).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].record.shutdown_latency_ms, 47.5);
        assert_eq!(stored[1].record.shutdown_latency_ms, 52.0);
        assert!(stored[0].unix_us > 0);
    }

    #[test]
    fn reopening_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("simulation.jsonl");

        JsonlRecordStore::open(&path).unwrap().append(record(46.0)).unwrap();
        JsonlRecordStore::open(&path).unwrap().append(record(48.0)).unwrap();

        assert_eq!(JsonlRecordStore::load(&path).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn persist_runs_off_the_async_thread() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("simulation.jsonl");
        let store = JsonlRecordStore::open(&path).unwrap();

        store.persist(record(49.9)).await.unwrap();

        let stored = JsonlRecordStore::load(&path).unwrap();
        assert_eq!(stored[0].record.auxiliary.power_loss_w, 4.0);
    }
}
