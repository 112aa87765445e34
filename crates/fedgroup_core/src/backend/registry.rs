//! Ordered, immutable-after-build registry of group backends.

use crate::backend::GroupBackend;
use crate::delegate::DelegateResult;
use log::debug;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Backend registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendRegistryError {
    InvalidBackendId(String),
    DuplicateBackendId(String),
}

impl Display for BackendRegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBackendId(value) => write!(f, "backend id is invalid: {value}"),
            Self::DuplicateBackendId(value) => {
                write!(f, "backend id already registered: {value}")
            }
        }
    }
}

impl Error for BackendRegistryError {}

struct RegisteredBackend {
    id: String,
    backend: Arc<dyn GroupBackend>,
}

/// Collects backends at setup time; consumed by [`BackendRegistryBuilder::build`].
#[derive(Default)]
pub struct BackendRegistryBuilder {
    backends: Vec<RegisteredBackend>,
    ids: BTreeSet<String>,
}

impl BackendRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one backend; later registrations have lower priority.
    pub fn register(
        mut self,
        backend_id: &str,
        backend: Arc<dyn GroupBackend>,
    ) -> Result<Self, BackendRegistryError> {
        let backend_id = backend_id.trim().to_string();
        if !is_valid_backend_id(&backend_id) {
            return Err(BackendRegistryError::InvalidBackendId(backend_id));
        }
        if !self.ids.insert(backend_id.clone()) {
            return Err(BackendRegistryError::DuplicateBackendId(backend_id));
        }

        self.backends.push(RegisteredBackend {
            id: backend_id,
            backend,
        });
        Ok(self)
    }

    pub fn build(self) -> BackendRegistry {
        BackendRegistry {
            backends: self.backends,
        }
    }
}

/// Backend that claimed authority over a group id.
#[derive(Clone)]
pub struct ResolvedBackend {
    pub backend_id: String,
    pub backend: Arc<dyn GroupBackend>,
}

impl std::fmt::Debug for ResolvedBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedBackend")
            .field("backend_id", &self.backend_id)
            .finish_non_exhaustive()
    }
}

/// Read-only delegation chain, probed in registration order.
#[derive(Default)]
pub struct BackendRegistry {
    backends: Vec<RegisteredBackend>,
}

impl BackendRegistry {
    /// Registry with no delegates; every resolution yields `None`.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> BackendRegistryBuilder {
        BackendRegistryBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Returns backend ids in priority order.
    pub fn backend_ids(&self) -> Vec<String> {
        self.backends.iter().map(|entry| entry.id.clone()).collect()
    }

    /// Returns the first backend whose `group_exists(gid)` is true.
    ///
    /// Stops at the first failing probe and returns its error.
    pub fn resolve_authoritative_backend(
        &self,
        gid: &str,
    ) -> DelegateResult<Option<ResolvedBackend>> {
        for entry in &self.backends {
            if entry.backend.group_exists(gid)? {
                debug!(
                    "event=backend_resolve module=backend status=claimed gid={gid} backend={}",
                    entry.id
                );
                return Ok(Some(ResolvedBackend {
                    backend_id: entry.id.clone(),
                    backend: Arc::clone(&entry.backend),
                }));
            }
        }

        Ok(None)
    }
}

fn is_valid_backend_id(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}
