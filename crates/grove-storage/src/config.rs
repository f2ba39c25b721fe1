//! Store configuration.
//!
//! Loaded from YAML; every field has a default so an empty document is a
//! valid in-memory store.
//!
//! ```yaml
//! backend: filesystem
//! path: /var/lib/grove/repo
//! compression: best
//! initial_branch: main
//! identity:
//!   name: Grove
//!   email: grove@example.com
//! cache_capacity: 4096
//! ```

use crate::compression::CompressionLevel;
use crate::refname::{check_name, HEADS_PREFIX};
use crate::{Result, Signature, StorageError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which storage backend a store binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-local, non-persistent storage.
    #[default]
    Memory,
    /// Loose objects and reference files under `path`.
    Filesystem,
    /// RocksDB database at `path`. Requires the `rocksdb-backend` feature.
    Rocksdb,
}

/// The name and email recorded in reflog entries when a mutation does not
/// supply its own committer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            name: "grove".to_string(),
            email: "grove@localhost".to_string(),
        }
    }
}

/// Configuration for opening a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Storage backend.
    pub backend: BackendKind,
    /// Root directory for persistent backends.
    pub path: Option<PathBuf>,
    /// Zlib level for loose objects.
    pub compression: CompressionLevel,
    /// Branch `HEAD` points at in a fresh store.
    pub initial_branch: String,
    /// Default reflog identity.
    pub identity: Identity,
    /// Number of objects kept in the read cache; `None` disables it.
    pub cache_capacity: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            path: None,
            compression: CompressionLevel::Default,
            initial_branch: "main".to_string(),
            identity: Identity::default(),
            cache_capacity: None,
        }
    }
}

impl StoreConfig {
    /// A filesystem store rooted at `path`, other fields defaulted.
    pub fn filesystem(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::Filesystem,
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Parses and validates a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: StoreConfig =
            serde_yaml::from_str(yaml).map_err(|e| StorageError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            StorageError::InvalidConfig(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Renders the configuration as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| StorageError::InvalidConfig(e.to_string()))
    }

    /// The full name of the initial branch.
    pub fn initial_ref(&self) -> String {
        format!("{HEADS_PREFIX}{}", self.initial_branch)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.backend != BackendKind::Memory && self.path.is_none() {
            return Err(StorageError::InvalidConfig(format!(
                "{:?} backend requires a path",
                self.backend
            )));
        }
        check_name(&self.initial_ref()).map_err(|_| {
            StorageError::InvalidConfig(format!(
                "invalid initial branch: {:?}",
                self.initial_branch
            ))
        })?;
        Signature::now(&self.identity.name, &self.identity.email).map_err(|e| {
            StorageError::InvalidConfig(format!("invalid reflog identity: {e}"))
        })?;
        if self.cache_capacity == Some(0) {
            return Err(StorageError::InvalidConfig(
                "cache_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
