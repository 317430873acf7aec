//! Persistence and directory seams.
//!
//! The engine never talks to a database directly; embedders supply these
//! traits. `RunStore::save` carries the optimistic-concurrency contract that
//! serializes advances within a single run: the write is rejected when the
//! stored version no longer matches the version the caller loaded.
//!
//! The in-memory implementations back tests and single-process embeddings.

use std::collections::HashMap;
use std::sync::Mutex;

use runbook_types::{ActiveRun, DisplayIdentity, Procedure};
use thiserror::Error;

/// Errors surfaced by store operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// No record exists under the given identifier.
    #[error("no record found for id '{id}'")]
    NotFound { id: String },
    /// Compare-and-set rejection: the run changed since the caller loaded it.
    /// Reload the run and retry the intended operation; the state machine
    /// never retries on its own.
    #[error("concurrent update conflict for run '{id}': expected version {expected}, found {actual}")]
    Conflict { id: String, expected: u64, actual: u64 },
}

/// Read access to procedure definitions. Definitions are read-only during run
/// execution.
pub trait ProcedureStore {
    fn get_by_id(&self, id: &str) -> Result<Procedure, StoreError>;
}

/// Persistence for active runs with compare-and-set writes.
pub trait RunStore {
    fn load(&self, id: &str) -> Result<ActiveRun, StoreError>;

    /// Persists the run when the stored version equals `expected_version`,
    /// returning the new version. A mismatch yields [`StoreError::Conflict`]
    /// and leaves the stored run untouched.
    fn save(&self, run: &ActiveRun, expected_version: u64) -> Result<u64, StoreError>;
}

/// Resolves an assignee reference (id or email) to a presentation identity.
pub trait IdentityDirectory {
    fn resolve(&self, reference: &str) -> Option<DisplayIdentity>;
}

/// Thread-safe procedure store backed by a plain map.
#[derive(Debug, Default)]
pub struct InMemoryProcedureStore {
    procedures: Mutex<HashMap<String, Procedure>>,
}

impl InMemoryProcedureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, procedure: Procedure) {
        let mut procedures = self.procedures.lock().expect("procedure store lock poisoned");
        procedures.insert(procedure.id.clone(), procedure);
    }
}

impl ProcedureStore for InMemoryProcedureStore {
    fn get_by_id(&self, id: &str) -> Result<Procedure, StoreError> {
        let procedures = self.procedures.lock().expect("procedure store lock poisoned");
        procedures.get(id).cloned().ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }
}

/// Thread-safe run store enforcing version compare-and-set on every write.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    runs: Mutex<HashMap<String, ActiveRun>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStore for InMemoryRunStore {
    fn load(&self, id: &str) -> Result<ActiveRun, StoreError> {
        let runs = self.runs.lock().expect("run store lock poisoned");
        runs.get(id).cloned().ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    fn save(&self, run: &ActiveRun, expected_version: u64) -> Result<u64, StoreError> {
        let mut runs = self.runs.lock().expect("run store lock poisoned");

        if let Some(existing) = runs.get(&run.id)
            && existing.version != expected_version
        {
            return Err(StoreError::Conflict {
                id: run.id.clone(),
                expected: expected_version,
                actual: existing.version,
            });
        }

        let new_version = expected_version + 1;
        let mut stored = run.clone();
        stored.version = new_version;
        runs.insert(stored.id.clone(), stored);
        Ok(new_version)
    }
}

/// Identity directory backed by a fixed set of identities, matched by id or
/// email.
#[derive(Debug, Default)]
pub struct StaticIdentityDirectory {
    identities: Vec<DisplayIdentity>,
}

impl StaticIdentityDirectory {
    pub fn new(identities: Vec<DisplayIdentity>) -> Self {
        Self { identities }
    }
}

impl IdentityDirectory for StaticIdentityDirectory {
    fn resolve(&self, reference: &str) -> Option<DisplayIdentity> {
        self.identities
            .iter()
            .find(|identity| identity.id == reference || identity.email.as_deref() == Some(reference))
            .cloned()
    }
}
