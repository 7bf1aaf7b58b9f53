// file: src/storage/catalog.rs
// description: file-backed product catalog with process-wide locking
// reference: json persistence of product records

use crate::error::{PipelineError, Result};
use crate::models::CatalogRecord;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Outcome of reading the catalog file. Unreadable or corrupt files are an
/// explicit variant and read as empty.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogLoad {
    Loaded(Vec<CatalogRecord>),
    Missing,
    Corrupt(String),
}

impl CatalogLoad {
    pub fn into_records(self) -> Vec<CatalogRecord> {
        match self {
            CatalogLoad::Loaded(records) => records,
            CatalogLoad::Missing | CatalogLoad::Corrupt(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

/// JSON array of product records, rewritten wholesale on every upsert.
///
/// The lock only serializes access within this process. Running several
/// processes against the same catalog file is not supported.
pub struct ProductCatalog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ProductCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> CatalogLoad {
        let _guard = self.guard();
        self.read_unlocked()
    }

    pub fn records(&self) -> Vec<CatalogRecord> {
        self.load().into_records()
    }

    pub fn get(&self, index: u64) -> Option<CatalogRecord> {
        self.records().into_iter().find(|r| r.index == index)
    }

    /// Next free index: one past the largest non-legacy index, or 1.
    pub fn next_index(&self) -> u64 {
        let _guard = self.guard();
        next_sequence(&self.read_unlocked().into_records())
    }

    pub fn upsert(&self, record: CatalogRecord) -> Result<UpsertOutcome> {
        let _guard = self.guard();
        let mut records = self.read_unlocked().into_records();

        let outcome = match records.iter().position(|r| r.index == record.index) {
            Some(position) => {
                records[position] = record;
                UpsertOutcome::Replaced
            }
            None => {
                records.push(record);
                UpsertOutcome::Inserted
            }
        };

        self.write_unlocked(&records)?;
        debug!(
            "Catalog {:?}: {} record(s) after {:?}",
            self.path,
            records.len(),
            outcome
        );
        Ok(outcome)
    }

    /// Assigns the next index to `record` and appends it in one locked step,
    /// so concurrent submissions never share an index.
    pub fn allocate(&self, record: CatalogRecord) -> Result<u64> {
        self.allocate_with(record, |_| Ok(()))
    }

    /// Like [`allocate`](Self::allocate), but runs `prepare` with the index
    /// already assigned before anything is written. If `prepare` fails the
    /// catalog is left untouched and the index stays free.
    pub fn allocate_with<F>(&self, mut record: CatalogRecord, prepare: F) -> Result<u64>
    where
        F: FnOnce(&mut CatalogRecord) -> Result<()>,
    {
        let _guard = self.guard();
        let mut records = self.read_unlocked().into_records();

        record.index = next_sequence(&records);
        let index = record.index;
        prepare(&mut record)?;
        records.push(record);

        self.write_unlocked(&records)?;
        debug!("Allocated catalog index {}", index);
        Ok(index)
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_unlocked(&self) -> CatalogLoad {
        if !self.path.exists() {
            debug!("No catalog file found at {:?}", self.path);
            return CatalogLoad::Missing;
        }

        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Failed to read catalog {:?}, treating as empty: {}", self.path, e);
                return CatalogLoad::Corrupt(e.to_string());
            }
        };

        if contents.trim().is_empty() {
            return CatalogLoad::Loaded(Vec::new());
        }

        match serde_json::from_str::<Vec<CatalogRecord>>(&contents) {
            Ok(records) => CatalogLoad::Loaded(records),
            Err(e) => {
                warn!("Failed to parse catalog {:?}, treating as empty: {}", self.path, e);
                CatalogLoad::Corrupt(e.to_string())
            }
        }
    }

    fn write_unlocked(&self, records: &[CatalogRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PipelineError::Persistence(format!("Failed to create catalog directory: {}", e))
            })?;
        }

        let contents = serde_json::to_string_pretty(records).map_err(|e| {
            PipelineError::Persistence(format!("Failed to serialize catalog: {}", e))
        })?;

        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, contents)
            .and_then(|_| fs::rename(&staging, &self.path))
            .map_err(|e| {
                PipelineError::Persistence(format!(
                    "Failed to write catalog {}: {}",
                    self.path.display(),
                    e
                ))
            })?;

        info!("Saved {} catalog records", records.len());
        Ok(())
    }
}

pub fn next_sequence(records: &[CatalogRecord]) -> u64 {
    records
        .iter()
        .filter(|r| !r.is_legacy())
        .map(|r| r.index)
        .max()
        .map(|max| max + 1)
        .unwrap_or(1)
}
