//! In-memory arena of live runs.
//!
//! The outer map is guarded by a short-held `std::sync::Mutex`; each run
//! sits behind its own `tokio::sync::Mutex` so transitions serialize per
//! run while distinct runs proceed independently. Nothing here awaits while
//! holding the outer lock.

use std::sync::{Arc, Mutex};

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

use super::Run;
use crate::graph::Graph;

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("run `{run_id}` already exists")]
    #[diagnostic(
        code(stepflow::store::run_exists),
        help("Run ids are caller-chosen and must be unique while the run is live.")
    )]
    RunExists { run_id: String },

    #[error("no run `{run_id}`")]
    #[diagnostic(code(stepflow::store::run_not_found))]
    RunNotFound { run_id: String },
}

/// Owns every live run record.
#[derive(Default)]
pub struct RunStore {
    runs: Mutex<FxHashMap<String, Arc<AsyncMutex<Run>>>>,
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh run; rejects an id that is already live.
    pub fn create(&self, run_id: &str, graph: &Graph) -> Result<Arc<AsyncMutex<Run>>, StoreError> {
        let mut runs = self.runs.lock().expect("run store poisoned");
        if runs.contains_key(run_id) {
            return Err(StoreError::RunExists {
                run_id: run_id.to_string(),
            });
        }
        let run = Arc::new(AsyncMutex::new(Run::new(run_id, graph)));
        runs.insert(run_id.to_string(), Arc::clone(&run));
        Ok(run)
    }

    pub fn get(&self, run_id: &str) -> Result<Arc<AsyncMutex<Run>>, StoreError> {
        self.runs
            .lock()
            .expect("run store poisoned")
            .get(run_id)
            .cloned()
            .ok_or_else(|| StoreError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }

    /// Drop a run record entirely. Terminal runs stay queryable until
    /// purged, so this is an explicit operation rather than automatic.
    pub fn purge(&self, run_id: &str) -> bool {
        self.runs
            .lock()
            .expect("run store poisoned")
            .remove(run_id)
            .is_some()
    }

    pub fn run_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .runs
            .lock()
            .expect("run store poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}
