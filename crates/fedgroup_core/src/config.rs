//! Group sync configuration.
//!
//! # Responsibility
//! - Describe reconciliation policy knobs and cache sizing.
//! - Load them from JSON with defaults for every omitted field.
//!
//! # Invariants
//! - A loaded config is always validated before it is returned.

use crate::cache::{BoundedExistenceCache, ExistenceCache, MemoryExistenceCache};
use crate::model::group::{normalize_group_id, GroupIdError};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_ADMIN_GROUP: &str = "admin";

/// Reconciliation policy and cache sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Whether asserted groups unknown to every backend may be created.
    pub allow_group_creation: bool,
    /// Host group whose members are system-wide administrators.
    pub admin_group: String,
    /// Existence cache bound; `None` keeps it unbounded.
    pub cache_capacity: Option<usize>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            allow_group_creation: true,
            admin_group: DEFAULT_ADMIN_GROUP.to_string(),
            cache_capacity: None,
        }
    }
}

/// Configuration load/validation errors.
#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
    InvalidAdminGroup(GroupIdError),
    ZeroCacheCapacity,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config json: {err}"),
            Self::InvalidAdminGroup(err) => write!(f, "invalid admin_group: {err}"),
            Self::ZeroCacheCapacity => write!(f, "cache_capacity must be greater than zero"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::InvalidAdminGroup(err) => Some(err),
            Self::ZeroCacheCapacity => None,
        }
    }
}

impl SyncConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(json).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Validates fields and normalizes `admin_group` in place.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.admin_group =
            normalize_group_id(&self.admin_group).map_err(ConfigError::InvalidAdminGroup)?;
        if self.cache_capacity == Some(0) {
            return Err(ConfigError::ZeroCacheCapacity);
        }
        Ok(())
    }

    /// Builds the existence cache matching `cache_capacity`.
    pub fn build_cache(&self) -> Arc<dyn ExistenceCache> {
        match self.cache_capacity.and_then(NonZeroUsize::new) {
            Some(capacity) => Arc::new(BoundedExistenceCache::new(capacity)),
            None => Arc::new(MemoryExistenceCache::new()),
        }
    }
}
