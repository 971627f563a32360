//! Durable feature store: one JSON record per identity under a directory.
//!
//! Writes go to a uniquely named temp file that is synced and then renamed
//! over the final path, so a record is either the old version or the new
//! one, never a torn mix. Mutations are serialized per identity.

use crate::types::FeatureRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

const RECORD_SUFFIX: &str = ".face.json";
const TEMP_SUFFIX: &str = ".tmp";
const RECORD_FORMAT_VERSION: u32 = 1;
const MAX_IDENTITY_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store directory {path} is not usable: {source}")]
    Unusable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode record for {identity}: {source}")]
    Encode {
        identity: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },
    #[error("invalid identity name {0:?}: use 1-64 characters of [A-Za-z0-9_.-], not starting with '.'")]
    InvalidIdentity(String),
    #[error("identity not found: {0}")]
    NotFound(String),
    #[error("identity already exists: {0}")]
    AlreadyExists(String),
}

/// On-disk envelope around a feature record.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    version: u32,
    identity: String,
    saved_at: DateTime<Utc>,
    record: FeatureRecord,
}

/// A stored record with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordInfo {
    pub identity: String,
    pub saved_at: DateTime<Utc>,
    pub record: FeatureRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Upsert,
    CreateNew,
    ReplaceExisting,
}

/// Check that a name can key a durable record.
pub fn validate_identity(identity: &str) -> Result<(), StoreError> {
    let valid = !identity.is_empty()
        && identity.len() <= MAX_IDENTITY_LEN
        && !identity.starts_with('.')
        && identity
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentity(identity.to_string()))
    }
}

/// Directory-backed store of one [`FeatureRecord`] per identity.
pub struct FeatureStore {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FeatureStore {
    /// Open (creating if needed) a store directory.
    ///
    /// Fails if the directory cannot be created or written to. Leftover
    /// temp files from interrupted writes are removed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        let unusable = |source| StoreError::Unusable {
            path: dir.clone(),
            source,
        };

        fs::create_dir_all(&dir).map_err(unusable)?;

        let writable = dir.join(format!(".writable-{}{TEMP_SUFFIX}", uuid::Uuid::new_v4()));
        fs::write(&writable, b"writable").map_err(unusable)?;
        fs::remove_file(&writable).map_err(unusable)?;

        let store = Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        };
        store.remove_stale_temps();

        tracing::info!(dir = %store.dir.display(), "feature store opened");
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, identity: &str) -> PathBuf {
        self.dir.join(format!("{identity}{RECORD_SUFFIX}"))
    }

    /// Per-identity write lock. Entries held only by the table are idle and
    /// get dropped here, so the table tracks in-flight identities only.
    fn identity_lock(&self, identity: &str) -> Arc<Mutex<()>> {
        let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        table.retain(|name, lock| name == identity || Arc::strong_count(lock) > 1);
        table.entry(identity.to_string()).or_default().clone()
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn remove_stale_temps(&self) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) {
                match fs::remove_file(entry.path()) {
                    Ok(()) => tracing::warn!(file = %name, "removed stale temp file"),
                    Err(e) => tracing::warn!(file = %name, error = %e, "failed to remove stale temp file"),
                }
            }
        }
    }

    /// Write `record` for `identity`, replacing any previous record.
    pub fn save(&self, identity: &str, record: &FeatureRecord) -> Result<(), StoreError> {
        self.write(identity, record, WriteMode::Upsert)
    }

    /// Write a record for an identity that must not exist yet.
    pub fn create(&self, identity: &str, record: &FeatureRecord) -> Result<(), StoreError> {
        self.write(identity, record, WriteMode::CreateNew)
    }

    /// Replace the record of an identity that must already exist.
    pub fn replace(&self, identity: &str, record: &FeatureRecord) -> Result<(), StoreError> {
        self.write(identity, record, WriteMode::ReplaceExisting)
    }

    fn write(&self, identity: &str, record: &FeatureRecord, mode: WriteMode) -> Result<(), StoreError> {
        validate_identity(identity)?;
        let lock = self.identity_lock(identity);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let path = self.record_path(identity);
        let exists = path.exists();
        match mode {
            WriteMode::CreateNew if exists => {
                return Err(StoreError::AlreadyExists(identity.to_string()))
            }
            WriteMode::ReplaceExisting if !exists => {
                return Err(StoreError::NotFound(identity.to_string()))
            }
            _ => {}
        }

        let envelope = StoredRecord {
            version: RECORD_FORMAT_VERSION,
            identity: identity.to_string(),
            saved_at: Utc::now(),
            record: record.clone(),
        };
        let bytes = serde_json::to_vec(&envelope).map_err(|source| StoreError::Encode {
            identity: identity.to_string(),
            source,
        })?;

        self.write_atomic(identity, &path, &bytes)?;
        tracing::info!(identity, replaced = exists, "feature record saved");
        Ok(())
    }

    fn write_atomic(&self, identity: &str, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let tmp = self
            .dir
            .join(format!(".{identity}.{}{TEMP_SUFFIX}", uuid::Uuid::new_v4()));

        let written = (|| -> io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            drop(file);
            fs::rename(&tmp, path)
        })();

        if let Err(source) = written {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }

        // Persist the rename itself; not every platform allows syncing a directory.
        if let Ok(d) = File::open(&self.dir) {
            let _ = d.sync_all();
        }
        Ok(())
    }

    fn read_envelope(&self, path: &Path, identity: &str) -> Result<StoredRecord, StoreError> {
        let bytes = fs::read(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound(identity.to_string())
            } else {
                StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let envelope: StoredRecord =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Decode {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if envelope.version != RECORD_FORMAT_VERSION {
            return Err(StoreError::Decode {
                path: path.to_path_buf(),
                reason: format!("unsupported record version {}", envelope.version),
            });
        }
        if envelope.identity != identity {
            return Err(StoreError::Decode {
                path: path.to_path_buf(),
                reason: format!("record names identity {:?}", envelope.identity),
            });
        }
        Ok(envelope)
    }

    /// Load one identity's record.
    pub fn load(&self, identity: &str) -> Result<FeatureRecord, StoreError> {
        Ok(self.inspect(identity)?.record)
    }

    /// Load one identity's record together with its metadata.
    pub fn inspect(&self, identity: &str) -> Result<RecordInfo, StoreError> {
        validate_identity(identity)?;
        let envelope = self.read_envelope(&self.record_path(identity), identity)?;
        Ok(RecordInfo {
            identity: envelope.identity,
            saved_at: envelope.saved_at,
            record: envelope.record,
        })
    }

    /// Load every readable record, ordered by identity.
    ///
    /// Records that fail to read or decode are logged and skipped.
    pub fn load_all(&self) -> Result<BTreeMap<String, FeatureRecord>, StoreError> {
        let mut records = BTreeMap::new();
        for identity in self.list()? {
            match self.read_envelope(&self.record_path(&identity), &identity) {
                Ok(envelope) => {
                    records.insert(identity, envelope.record);
                }
                Err(StoreError::NotFound(_)) => {
                    tracing::debug!(identity, "record vanished during load");
                }
                Err(e) => {
                    tracing::warn!(identity, error = %e, "skipping unreadable feature record");
                }
            }
        }
        tracing::debug!(count = records.len(), "feature records loaded");
        Ok(records)
    }

    /// Remove an identity's record.
    pub fn delete(&self, identity: &str) -> Result<(), StoreError> {
        validate_identity(identity)?;
        let lock = self.identity_lock(identity);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let path = self.record_path(identity);
        fs::remove_file(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound(identity.to_string())
            } else {
                StoreError::Io { path, source }
            }
        })?;

        tracing::info!(identity, "feature record deleted");
        Ok(())
    }

    /// Names of every stored identity, without reading feature data.
    pub fn list(&self) -> Result<BTreeSet<String>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut names = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if let Some(identity) = name.strip_suffix(RECORD_SUFFIX) {
                if validate_identity(identity).is_ok() {
                    names.insert(identity.to_string());
                }
            }
        }
        Ok(names)
    }

    pub fn contains(&self, identity: &str) -> bool {
        validate_identity(identity).is_ok() && self.record_path(identity).is_file()
    }
}
