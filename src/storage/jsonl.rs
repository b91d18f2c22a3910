//! File-backed history collections
//!
//! Each history collection is one line-delimited JSON file (JSONL) where
//! every line is a complete history record. Appends are flushed
//! immediately; rewrites (enrichment, clear) go through a temp file and an
//! atomic rename. The backend moves all file work off the async
//! executor onto the blocking pool.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::audit::entry::AuditRecord;
use crate::config::paths::HistoryPaths;
use crate::error::{HistoryError, HistoryResult};
use crate::models::{Filter, IndexSpec};

use super::file_io::{read_json, write_json_atomic, write_lines_atomic};
use super::{record_matches, HistoryBackend};

/// One append-only JSONL file of history records
pub struct JsonlLog {
    /// Path to the log file
    log_path: PathBuf,
}

impl JsonlLog {
    /// Create a log that writes to the specified path
    pub fn new(log_path: PathBuf) -> Self {
        Self { log_path }
    }

    fn open_append(&self) -> HistoryResult<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| HistoryError::Io(format!("Failed to open history log: {}", e)))
    }

    /// Append one record as a JSON line and flush it
    pub fn append(&self, record: &AuditRecord) -> HistoryResult<()> {
        self.append_batch(std::slice::from_ref(record))
    }

    /// Append several records and flush once at the end
    pub fn append_batch(&self, records: &[AuditRecord]) -> HistoryResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut buffer = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buffer, record).map_err(|e| {
                HistoryError::Json(format!("Failed to serialize history record: {}", e))
            })?;
            buffer.push(b'\n');
        }

        let mut writer = BufWriter::new(self.open_append()?);
        writer
            .write_all(&buffer)
            .map_err(|e| HistoryError::Io(format!("Failed to write history record: {}", e)))?;
        writer
            .flush()
            .map_err(|e| HistoryError::Io(format!("Failed to flush history log: {}", e)))?;

        Ok(())
    }

    /// Read all records in insertion order (oldest first)
    pub fn read_all(&self) -> HistoryResult<Vec<AuditRecord>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.log_path)
            .map_err(|e| HistoryError::Io(format!("Failed to open history log: {}", e)))?;

        let reader = BufReader::new(file);
        let mut records = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| {
                HistoryError::Io(format!(
                    "Failed to read history log line {}: {}",
                    line_num + 1,
                    e
                ))
            })?;

            // Skip empty lines
            if line.trim().is_empty() {
                continue;
            }

            let record: AuditRecord = serde_json::from_str(&line).map_err(|e| {
                HistoryError::Json(format!(
                    "Failed to parse history record at line {}: {}",
                    line_num + 1,
                    e
                ))
            })?;

            records.push(record);
        }

        Ok(records)
    }

    /// Replace the whole log with the given records
    pub fn rewrite(&self, records: &[AuditRecord]) -> HistoryResult<()> {
        write_lines_atomic(&self.log_path, records)
    }

    /// Number of records in the log
    pub fn entry_count(&self) -> HistoryResult<usize> {
        if !self.log_path.exists() {
            return Ok(0);
        }

        let file = File::open(&self.log_path)
            .map_err(|e| HistoryError::Io(format!("Failed to open history log: {}", e)))?;

        let reader = BufReader::new(file);
        Ok(reader
            .lines()
            .map_while(Result::ok)
            .filter(|l| !l.trim().is_empty())
            .count())
    }

    /// Check if the log file exists
    pub fn exists(&self) -> bool {
        self.log_path.exists()
    }

    /// Get the path to the log file
    pub fn path(&self) -> &PathBuf {
        &self.log_path
    }
}

/// Directory of collection logs plus the lock serializing writers
struct JsonlFiles {
    paths: HistoryPaths,
    /// Serializes writers so appends never interleave with rewrites
    write_lock: Mutex<()>,
}

impl JsonlFiles {
    fn log(&self, collection: &str) -> HistoryResult<JsonlLog> {
        Ok(JsonlLog::new(self.paths.collection_log(collection)?))
    }

    fn lock(&self) -> HistoryResult<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|e| HistoryError::Storage(format!("Failed to acquire write lock: {}", e)))
    }
}

/// History backend keeping one JSONL file per collection
///
/// File work runs on tokio's blocking pool, so the backend needs a tokio
/// runtime.
pub struct JsonlBackend {
    name: String,
    files: Arc<JsonlFiles>,
}

impl JsonlBackend {
    /// Open a backend rooted at the given paths, creating the directory
    pub fn open(name: impl Into<String>, paths: HistoryPaths) -> HistoryResult<Self> {
        paths.ensure_directories()?;
        Ok(Self {
            name: name.into(),
            files: Arc::new(JsonlFiles {
                paths,
                write_lock: Mutex::new(()),
            }),
        })
    }

    /// Get the log of one collection
    pub fn log(&self, collection: &str) -> HistoryResult<JsonlLog> {
        self.files.log(collection)
    }

    /// Get the paths configuration
    pub fn paths(&self) -> &HistoryPaths {
        &self.files.paths
    }

    async fn blocking<T, F>(&self, task: F) -> HistoryResult<T>
    where
        F: FnOnce(&JsonlFiles) -> HistoryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let files = self.files.clone();
        tokio::task::spawn_blocking(move || task(&files))
            .await
            .map_err(|e| HistoryError::Storage(format!("History file task failed: {}", e)))?
    }
}

#[async_trait]
impl HistoryBackend for JsonlBackend {
    fn connection_name(&self) -> &str {
        &self.name
    }

    async fn prepare_collection(&self, collection: &str, indexes: &[IndexSpec]) -> HistoryResult<()> {
        let collection = collection.to_string();
        let indexes = indexes.to_vec();
        self.blocking(move |files| {
            let _guard = files.lock()?;
            let log = files.log(&collection)?;
            if !log.exists() {
                log.rewrite(&[])?;
            }

            if indexes.is_empty() {
                return Ok(());
            }
            let manifest = files.paths.index_manifest(&collection)?;
            let mut specs: Vec<IndexSpec> = read_json(&manifest)?;
            for spec in indexes {
                if !specs.iter().any(|s| s.name() == spec.name()) {
                    specs.push(spec);
                }
            }
            write_json_atomic(&manifest, &specs)
        })
        .await
    }

    async fn index_names(&self, collection: &str) -> HistoryResult<Vec<String>> {
        let manifest = self.files.paths.index_manifest(collection)?;
        self.blocking(move |_| {
            let specs: Vec<IndexSpec> = read_json(manifest)?;
            Ok(specs.iter().map(IndexSpec::name).collect())
        })
        .await
    }

    async fn append(&self, collection: &str, record: &AuditRecord) -> HistoryResult<()> {
        self.append_many(collection, std::slice::from_ref(record)).await
    }

    async fn append_many(&self, collection: &str, records: &[AuditRecord]) -> HistoryResult<()> {
        let collection = collection.to_string();
        let records = records.to_vec();
        self.blocking(move |files| {
            let _guard = files.lock()?;
            files.log(&collection)?.append_batch(&records)
        })
        .await
    }

    async fn records(&self, collection: &str, filter: &Filter) -> HistoryResult<Vec<AuditRecord>> {
        let log = self.files.log(collection)?;
        let filter = filter.clone();
        self.blocking(move |_| {
            let mut matched = Vec::new();
            for record in log.read_all()? {
                if record_matches(&record, &filter)? {
                    matched.push(record);
                }
            }
            Ok(matched)
        })
        .await
    }

    async fn replace_record(&self, collection: &str, record: &AuditRecord) -> HistoryResult<bool> {
        let collection = collection.to_string();
        let record = record.clone();
        self.blocking(move |files| {
            let _guard = files.lock()?;
            let log = files.log(&collection)?;
            let mut records = log.read_all()?;
            let Some(stored) = records.iter_mut().find(|r| r.id == record.id) else {
                return Ok(false);
            };
            *stored = record;
            log.rewrite(&records)?;
            Ok(true)
        })
        .await
    }

    async fn clear_collection(&self, collection: &str) -> HistoryResult<u64> {
        let collection = collection.to_string();
        self.blocking(move |files| {
            let _guard = files.lock()?;
            let log = files.log(&collection)?;
            let removed = log.entry_count()? as u64;
            if log.exists() {
                log.rewrite(&[])?;
            }
            Ok(removed)
        })
        .await
    }
}
