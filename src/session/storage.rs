use crate::session::types::{SessionId, SessionRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Current on-disk format version
pub const STORE_FORMAT_VERSION: u32 = 1;

/// Errors reported by a [`SessionStore`]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session records in {} are corrupted: {source}", path.display())]
    Corrupted {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported session store format version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("failed to serialize session records: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

/// Durable mapping from session id to state.
///
/// Every call is synchronous and durable on return. Implementations never
/// mutate records on their own; the tracker owns them.
pub trait SessionStore: Send + Sync {
    /// Add a record; an existing record with the same id is replaced
    fn create_record(&self, record: &SessionRecord) -> Result<(), StoreError>;

    /// All persisted records; empty when nothing was ever written
    fn read_all_records(&self) -> Result<Vec<SessionRecord>, StoreError>;

    /// Replace the state of an existing record; unknown ids are ignored
    fn update_record(&self, record: &SessionRecord) -> Result<(), StoreError>;

    fn delete_record(&self, session_id: &SessionId) -> Result<(), StoreError>;

    fn delete_all_records(&self) -> Result<(), StoreError>;
}

/// Apply a create to an in-memory record set
fn upsert(records: &mut Vec<SessionRecord>, record: &SessionRecord) {
    match records
        .iter_mut()
        .find(|existing| existing.session_id == record.session_id)
    {
        Some(existing) => existing.state = record.state,
        None => records.push(record.clone()),
    }
}

/// Apply an update; returns whether anything changed
fn update_existing(records: &mut [SessionRecord], record: &SessionRecord) -> bool {
    match records
        .iter_mut()
        .find(|existing| existing.session_id == record.session_id)
    {
        Some(existing) => {
            existing.state = record.state;
            true
        }
        None => false,
    }
}

/// On-disk envelope of the full record set
#[derive(Debug, Serialize, Deserialize)]
struct PersistedSessions {
    version: u32,
    saved_at: DateTime<Utc>,
    sessions: Vec<SessionRecord>,
}

/// JSON file store that atomically replaces the whole record set on every write
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Create a store backed by `path`; parent directories are created lazily
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn io_error(&self, action: &'static str, path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    fn read_records(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error("read", &self.path, e)),
        };

        if content.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Vec::new());
        }

        let persisted: PersistedSessions =
            serde_json::from_slice(&content).map_err(|source| StoreError::Corrupted {
                path: self.path.clone(),
                source,
            })?;

        if persisted.version != STORE_FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: persisted.version,
                expected: STORE_FORMAT_VERSION,
            });
        }

        Ok(persisted.sessions)
    }

    /// Write the full set to a temp file, sync it, then rename it into place
    fn write_records(&self, sessions: Vec<SessionRecord>) -> Result<(), StoreError> {
        let persisted = PersistedSessions {
            version: STORE_FORMAT_VERSION,
            saved_at: Utc::now(),
            sessions,
        };
        let serialized = serde_json::to_vec_pretty(&persisted).map_err(StoreError::Serialize)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| self.io_error("create directory", parent, e))?;
        }

        let temp_path = self.temp_path();
        let result = (|| {
            let mut file =
                fs::File::create(&temp_path).map_err(|e| self.io_error("create", &temp_path, e))?;
            file.write_all(&serialized)
                .map_err(|e| self.io_error("write", &temp_path, e))?;
            file.sync_all()
                .map_err(|e| self.io_error("sync", &temp_path, e))?;
            fs::rename(&temp_path, &self.path)
                .map_err(|e| self.io_error("replace", &self.path, e))?;
            self.sync_parent_dir()
        })();

        if result.is_err() && temp_path.exists() {
            if let Err(e) = fs::remove_file(&temp_path) {
                warn!("Failed to remove temp file {}: {}", temp_path.display(), e);
            }
        }
        result?;

        debug!(
            "Persisted {} session records to {} ({} bytes)",
            persisted.sessions.len(),
            self.path.display(),
            serialized.len()
        );
        Ok(())
    }

    /// Flush the directory entry so a completed rename survives a crash
    #[cfg(unix)]
    fn sync_parent_dir(&self) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::File::open(dir)
            .and_then(|dir_file| dir_file.sync_all())
            .map_err(|e| self.io_error("sync directory", dir, e))
    }

    #[cfg(not(unix))]
    fn sync_parent_dir(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SessionStore for JsonFileStore {
    fn create_record(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let _guard = self.lock();
        let mut records = self.read_records()?;
        upsert(&mut records, record);
        self.write_records(records)
    }

    fn read_all_records(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let _guard = self.lock();
        self.read_records()
    }

    fn update_record(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let _guard = self.lock();
        let mut records = self.read_records()?;
        if !update_existing(&mut records, record) {
            debug!("update_record: no record for session '{}'", record.session_id);
            return Ok(());
        }
        self.write_records(records)
    }

    fn delete_record(&self, session_id: &SessionId) -> Result<(), StoreError> {
        let _guard = self.lock();
        let mut records = self.read_records()?;
        records.retain(|record| &record.session_id != session_id);
        self.write_records(records)
    }

    fn delete_all_records(&self) -> Result<(), StoreError> {
        let _guard = self.lock();
        self.write_records(Vec::new())
    }
}

/// Volatile store with the same contract, for tests and embedding
#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<Vec<SessionRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the store, e.g. to simulate records left by a previous run
    pub fn with_records(records: impl IntoIterator<Item = SessionRecord>) -> Self {
        Self {
            records: Mutex::new(records.into_iter().collect()),
        }
    }

    fn records(&self) -> MutexGuard<'_, Vec<SessionRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionStore for InMemoryStore {
    fn create_record(&self, record: &SessionRecord) -> Result<(), StoreError> {
        upsert(&mut self.records(), record);
        Ok(())
    }

    fn read_all_records(&self) -> Result<Vec<SessionRecord>, StoreError> {
        Ok(self.records().clone())
    }

    fn update_record(&self, record: &SessionRecord) -> Result<(), StoreError> {
        update_existing(&mut self.records(), record);
        Ok(())
    }

    fn delete_record(&self, session_id: &SessionId) -> Result<(), StoreError> {
        self.records()
            .retain(|record| &record.session_id != session_id);
        Ok(())
    }

    fn delete_all_records(&self) -> Result<(), StoreError> {
        self.records().clear();
        Ok(())
    }
}

impl<T: SessionStore + ?Sized> SessionStore for std::sync::Arc<T> {
    fn create_record(&self, record: &SessionRecord) -> Result<(), StoreError> {
        (**self).create_record(record)
    }

    fn read_all_records(&self) -> Result<Vec<SessionRecord>, StoreError> {
        (**self).read_all_records()
    }

    fn update_record(&self, record: &SessionRecord) -> Result<(), StoreError> {
        (**self).update_record(record)
    }

    fn delete_record(&self, session_id: &SessionId) -> Result<(), StoreError> {
        (**self).delete_record(session_id)
    }

    fn delete_all_records(&self) -> Result<(), StoreError> {
        (**self).delete_all_records()
    }
}
