//! Durable per-network deployment records.

use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use fs2::FileExt;
use rand::Rng;

use crate::{error::DeployError, network::NetworkId, record::DeploymentRecord};

/// Default file name prefix of persisted records.
pub const DEFAULT_RECORD_PREFIX: &str = "uniswap-v3";

/// Persists one deployment record per network name.
///
/// `save` replaces the whole record atomically: a concurrent `load` sees either
/// the previous record or the new one. `load` of a network never saved returns
/// an empty record.
pub trait DeploymentStore: Send + Sync {
    fn load(&self, network: &NetworkId) -> Result<DeploymentRecord, DeployError>;

    fn save(&self, record: &DeploymentRecord) -> Result<(), DeployError>;
}

impl<S: DeploymentStore + ?Sized> DeploymentStore for &S {
    fn load(&self, network: &NetworkId) -> Result<DeploymentRecord, DeployError> {
        (**self).load(network)
    }

    fn save(&self, record: &DeploymentRecord) -> Result<(), DeployError> {
        (**self).save(record)
    }
}

/// Stores records as `<dir>/<prefix>-<network>.json`.
#[derive(Debug, Clone)]
pub struct FileDeploymentStore {
    dir: PathBuf,
    prefix: String,
}

impl FileDeploymentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            prefix: DEFAULT_RECORD_PREFIX.to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn record_path(&self, network: &str) -> PathBuf {
        self.dir.join(format!("{}-{network}.json", self.prefix))
    }

    fn lock_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Take an advisory lock shared with other processes using the same store.
    fn lock(&self, path: &Path, exclusive: bool) -> Result<File, DeployError> {
        let lock_path = Self::lock_path(path);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| DeployError::io(&lock_path, e))?;
        let locked = if exclusive {
            file.lock_exclusive()
        } else {
            file.lock_shared()
        };
        locked.map_err(|e| DeployError::io(&lock_path, e))?;
        Ok(file)
    }
}

impl DeploymentStore for FileDeploymentStore {
    fn load(&self, network: &NetworkId) -> Result<DeploymentRecord, DeployError> {
        let path = self.record_path(&network.name);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No deployment record yet");
            return Ok(DeploymentRecord::empty(network.clone()));
        }

        let lock = self.lock(&path, false)?;
        let content = std::fs::read_to_string(&path).map_err(|e| DeployError::io(&path, e));
        drop(lock);

        let value: serde_json::Value =
            serde_json::from_str(&content?).map_err(|source| DeployError::CorruptRecord {
                path: path.clone(),
                source,
            })?;
        let mut record = DeploymentRecord::from_json(value, network)
            .map_err(|source| DeployError::CorruptRecord {
                path: path.clone(),
                source,
            })?;

        if record.network.chain_id != network.chain_id {
            tracing::warn!(
                path = %path.display(),
                recorded = record.network.chain_id,
                configured = network.chain_id,
                "Deployment record chain id differs from the configured network"
            );
        }
        record.network.name = network.name.clone();

        tracing::debug!(
            path = %path.display(),
            entries = record.entries.len(),
            pending = record.pending.len(),
            "Deployment record loaded"
        );
        Ok(record)
    }

    fn save(&self, record: &DeploymentRecord) -> Result<(), DeployError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| DeployError::io(&self.dir, e))?;

        let path = self.record_path(&record.network.name);
        let content = serde_json::to_string_pretty(&record.to_json()).map_err(|source| {
            DeployError::CorruptRecord {
                path: path.clone(),
                source,
            }
        })?;

        let _lock = self.lock(&path, true)?;

        let suffix: u32 = rand::rng().random();
        let tmp_path = self
            .dir
            .join(format!(".{}-{}.{suffix:08x}.tmp", self.prefix, record.network.name));

        let written = (|| {
            let mut file = File::create(&tmp_path)?;
            file.write_all(content.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()?;
            std::fs::rename(&tmp_path, &path)
        })();

        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(DeployError::io(&path, e));
        }

        tracing::debug!(
            path = %path.display(),
            entries = record.entries.len(),
            "Deployment record saved"
        );
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryDeploymentStore {
    records: Mutex<HashMap<String, DeploymentRecord>>,
    saves: Mutex<usize>,
}

impl MemoryDeploymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: DeploymentRecord) -> Self {
        let store = Self::default();
        if let Ok(mut records) = store.records.lock() {
            records.insert(record.network.name.clone(), record);
        }
        store
    }

    /// Number of `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|s| *s).unwrap_or_default()
    }
}

impl DeploymentStore for MemoryDeploymentStore {
    fn load(&self, network: &NetworkId) -> Result<DeploymentRecord, DeployError> {
        let records = self.records.lock().map_err(|_| poisoned())?;
        Ok(records
            .get(&network.name)
            .cloned()
            .unwrap_or_else(|| DeploymentRecord::empty(network.clone())))
    }

    fn save(&self, record: &DeploymentRecord) -> Result<(), DeployError> {
        self.records
            .lock()
            .map_err(|_| poisoned())?
            .insert(record.network.name.clone(), record.clone());
        *self.saves.lock().map_err(|_| poisoned())? += 1;
        Ok(())
    }
}

fn poisoned() -> DeployError {
    DeployError::io(
        "<memory>",
        std::io::Error::other("deployment store lock poisoned"),
    )
}
