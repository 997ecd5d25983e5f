// # File Config Store
//
// File-based implementation of ConfigStore with crash recovery.
//
// ## Purpose
//
// Keeps the package configuration (and, for standalone deployments, the
// host's trusted proxy list) in a single JSON document that survives
// restarts.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good document
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "values": {
//     "proxy_ip_manager::providers": {
//       "manual": { "abstract": "manual", "enabled": true, "lastIPs": ["10.0.0.1"] }
//     },
//     "proxy_ip_manager::updates.last_run": 1736424000
//   }
// }
// ```

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::config_store::ConfigStore;

/// Document format version
const STORE_FILE_VERSION: &str = "1.0";

/// File-based config store with crash recovery
///
/// Every `set` rewrites the whole document through a temporary file that is
/// then renamed over the original. The previous document is copied to a
/// `.backup` file first.
///
/// # Example
///
/// ```rust,no_run
/// use pim_core::state::FileConfigStore;
/// use pim_core::traits::ConfigStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileConfigStore::new("/var/lib/pim/config.json").await?;
///
///     store.set("proxy_ip_manager::updates.last_run", serde_json::json!(0)).await?;
///     let last_run = store.get("proxy_ip_manager::updates.last_run").await?;
///     assert_eq!(last_run, Some(serde_json::json!(0)));
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    values: Arc<RwLock<Map<String, Value>>>,
}

/// Serializable store file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoreFileFormat {
    version: String,
    values: Map<String, Value>,
}

impl FileConfigStore {
    /// Create or load a file config store
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Try to load the existing document
    /// 3. If it is corrupted, load the backup and restore it
    /// 4. If both fail, start with an empty document
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let values = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            values: Arc::new(RwLock::new(values)),
        })
    }

    /// Path of the JSON document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, falling back to the backup on corruption
    async fn load_with_recovery(path: &Path) -> Result<Map<String, Value>, Error> {
        let err = match Self::load(path).await {
            Ok(values) => {
                tracing::debug!("Loaded config store: {} keys", values.len());
                return Ok(values);
            }
            Err(err) => err,
        };

        // Only a parse failure counts as corruption; I/O errors propagate
        if !matches!(err, Error::Json(_)) {
            return Err(err);
        }

        tracing::warn!(
            "Config store {} appears corrupted: {}. Attempting recovery from backup.",
            path.display(),
            err
        );

        let backup_path = Self::backup_path(path);
        if !backup_path.exists() {
            tracing::warn!("No backup file found. Starting with an empty config store.");
            return Ok(Map::new());
        }

        match Self::load(&backup_path).await {
            Ok(values) => {
                tracing::info!("Recovered config store from backup: {} keys", values.len());
                if let Err(restore_err) = fs::copy(&backup_path, path).await {
                    tracing::error!(
                        "Failed to restore {} from backup: {}",
                        path.display(),
                        restore_err
                    );
                }
                Ok(values)
            }
            Err(backup_err) => {
                tracing::error!(
                    "Backup also corrupted: {}. Starting with an empty config store.",
                    backup_err
                );
                Ok(Map::new())
            }
        }
    }

    /// Load the document from `path`
    async fn load(path: &Path) -> Result<Map<String, Value>, Error> {
        if !path.exists() {
            tracing::debug!("Config store file does not exist: {}", path.display());
            return Ok(Map::new());
        }

        let content = fs::read_to_string(path).await?;
        let document: StoreFileFormat = serde_json::from_str(&content)?;

        if document.version != STORE_FILE_VERSION {
            tracing::warn!(
                "Config store version mismatch: expected {}, got {}. Attempting to load anyway.",
                STORE_FILE_VERSION,
                document.version
            );
        }

        Ok(document.values)
    }

    /// Write the document atomically
    async fn write(&self, values: &Map<String, Value>) -> Result<(), Error> {
        let document = StoreFileFormat {
            version: STORE_FILE_VERSION.to_string(),
            values: values.clone(),
        };
        let json = serde_json::to_string_pretty(&document)?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::config_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::config_store(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            file.flush().await?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::config_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Config store written to {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, Error> {
        let guard = self.values.read().await;
        Ok(guard.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), Error> {
        // Hold the write lock across the file write so concurrent sets
        // cannot interleave their documents
        let mut guard = self.values.write().await;
        let previous = guard.insert(key.to_string(), value);

        if let Err(e) = self.write(&guard).await {
            match previous {
                Some(previous) => guard.insert(key.to_string(), previous),
                None => guard.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }
}
