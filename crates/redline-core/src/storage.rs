//! Persistence for jobs and usage totals.
//!
//! [`FileStore`] keeps one JSON file per record under `<project>/.redline/`:
//!
//! ```text
//! .redline/jobs/<process-id>.json
//! .redline/usage/<document-id>.json
//! .redline/usage_totals.json
//! ```
//!
//! [`MemoryStore`] keeps the same records in memory.

use crate::job::{GenerationJob, JobId};
use crate::usage::{GlobalTotals, UsageTotals};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

const REDLINE_DIR: &str = ".redline";
const JOBS_DIR: &str = "jobs";
const USAGE_DIR: &str = "usage";
const GLOBAL_FILE: &str = "usage_totals.json";

/// Storage failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("corrupt record at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("record of {size} bytes exceeds the store limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },
}

/// Job record persistence.
pub trait JobStore: Send + Sync {
    fn load_job(&self, id: &JobId) -> Result<Option<GenerationJob>, StoreError>;

    /// Write the job, returning the serialized size in bytes.
    fn save_job(&self, job: &GenerationJob) -> Result<usize, StoreError>;

    /// Delete a job. Returns false if it did not exist.
    fn delete_job(&self, id: &JobId) -> Result<bool, StoreError>;

    fn list_jobs(&self) -> Result<Vec<JobId>, StoreError>;
}

/// Usage totals persistence.
pub trait UsageStore: Send + Sync {
    fn load_totals(&self, document_id: u64) -> Result<Option<UsageTotals>, StoreError>;

    fn save_totals(&self, document_id: u64, totals: &UsageTotals) -> Result<(), StoreError>;

    /// Document ids with stored totals, in ascending order, paged.
    fn list_documents(&self, offset: usize, limit: usize) -> Result<Vec<u64>, StoreError>;

    fn load_global(&self) -> Result<Option<GlobalTotals>, StoreError>;

    fn save_global(&self, totals: &GlobalTotals) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

/// JSON-file store rooted at a project directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Store under `<project_root>/.redline`.
    pub fn open(project_root: &Path) -> Self {
        Self {
            dir: project_root.join(REDLINE_DIR),
        }
    }

    /// Get the path to the redline directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn job_path(&self, id: &JobId) -> PathBuf {
        self.dir.join(JOBS_DIR).join(format!("{}.json", id))
    }

    fn usage_path(&self, document_id: u64) -> PathBuf {
        self.dir.join(USAGE_DIR).join(format!("{}.json", document_id))
    }

    fn global_path(&self) -> PathBuf {
        self.dir.join(GLOBAL_FILE)
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path)(e)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Write through a sibling temp file and rename, so readers never see a torn record.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<usize, StoreError> {
    let json = serde_json::to_vec_pretty(value)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &json).map_err(io_err(&tmp))?;
    fs::rename(&tmp, path).map_err(io_err(path))?;
    Ok(json.len())
}

fn json_stems(dir: &Path) -> Result<Vec<String>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(dir)(e)),
    };
    let mut stems = Vec::new();
    for entry in entries {
        let path = entry.map_err(io_err(dir))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            stems.push(stem.to_string());
        }
    }
    Ok(stems)
}

impl JobStore for FileStore {
    fn load_job(&self, id: &JobId) -> Result<Option<GenerationJob>, StoreError> {
        read_json(&self.job_path(id))
    }

    fn save_job(&self, job: &GenerationJob) -> Result<usize, StoreError> {
        write_json(&self.job_path(&job.id), job)
    }

    fn delete_job(&self, id: &JobId) -> Result<bool, StoreError> {
        let path = self.job_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    fn list_jobs(&self) -> Result<Vec<JobId>, StoreError> {
        let mut ids: Vec<JobId> = json_stems(&self.dir.join(JOBS_DIR))?
            .into_iter()
            .filter_map(|stem| stem.parse().ok())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

impl UsageStore for FileStore {
    fn load_totals(&self, document_id: u64) -> Result<Option<UsageTotals>, StoreError> {
        read_json(&self.usage_path(document_id))
    }

    fn save_totals(&self, document_id: u64, totals: &UsageTotals) -> Result<(), StoreError> {
        write_json(&self.usage_path(document_id), totals).map(|_| ())
    }

    fn list_documents(&self, offset: usize, limit: usize) -> Result<Vec<u64>, StoreError> {
        let mut ids: Vec<u64> = json_stems(&self.dir.join(USAGE_DIR))?
            .into_iter()
            .filter_map(|stem| stem.parse().ok())
            .collect();
        ids.sort_unstable();
        Ok(ids.into_iter().skip(offset).take(limit).collect())
    }

    fn load_global(&self) -> Result<Option<GlobalTotals>, StoreError> {
        read_json(&self.global_path())
    }

    fn save_global(&self, totals: &GlobalTotals) -> Result<(), StoreError> {
        write_json(&self.global_path(), totals).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Memory store
// ---------------------------------------------------------------------------

/// In-memory store. Records are kept serialized so size limits behave like
/// a real backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: Mutex<BTreeMap<JobId, String>>,
    usage: Mutex<BTreeMap<u64, UsageTotals>>,
    global: Mutex<Option<GlobalTotals>>,
    max_record_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject job records larger than `limit` bytes.
    pub fn with_record_limit(mut self, limit: usize) -> Self {
        self.max_record_bytes = Some(limit);
        self
    }
}

impl JobStore for MemoryStore {
    fn load_job(&self, id: &JobId) -> Result<Option<GenerationJob>, StoreError> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        jobs.get(id)
            .map(|json| serde_json::from_str(json))
            .transpose()
            .map_err(|source| StoreError::Corrupt {
                path: PathBuf::from(id.as_str()),
                source,
            })
    }

    fn save_job(&self, job: &GenerationJob) -> Result<usize, StoreError> {
        let json = serde_json::to_string(job)?;
        if let Some(limit) = self.max_record_bytes
            && json.len() > limit
        {
            return Err(StoreError::TooLarge {
                size: json.len(),
                limit,
            });
        }
        let size = json.len();
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job.id.clone(), json);
        Ok(size)
    }

    fn delete_job(&self, id: &JobId) -> Result<bool, StoreError> {
        Ok(self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some())
    }

    fn list_jobs(&self) -> Result<Vec<JobId>, StoreError> {
        Ok(self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }
}

impl UsageStore for MemoryStore {
    fn load_totals(&self, document_id: u64) -> Result<Option<UsageTotals>, StoreError> {
        Ok(self
            .usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&document_id)
            .cloned())
    }

    fn save_totals(&self, document_id: u64, totals: &UsageTotals) -> Result<(), StoreError> {
        self.usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(document_id, totals.clone());
        Ok(())
    }

    fn list_documents(&self, offset: usize, limit: usize) -> Result<Vec<u64>, StoreError> {
        Ok(self
            .usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .skip(offset)
            .take(limit)
            .copied()
            .collect())
    }

    fn load_global(&self) -> Result<Option<GlobalTotals>, StoreError> {
        Ok(self
            .global
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save_global(&self, totals: &GlobalTotals) -> Result<(), StoreError> {
        *self.global.lock().unwrap_or_else(PoisonError::into_inner) = Some(totals.clone());
        Ok(())
    }
}
