//! Stage registry: role -> live worker handle

use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::worker::Worker;
use trishul_common::StageRole;

/// Live stages by role. Mutated only by the control context.
///
/// A handle leaves the registry when it is torn down, so it can be torn
/// down at most once.
#[derive(Default)]
pub struct StageRegistry {
    stages: BTreeMap<StageRole, Box<dyn Worker>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage; an existing handle for the same role is kept and
    /// the new one is handed back.
    pub fn insert(&mut self, worker: Box<dyn Worker>) -> Result<(), Box<dyn Worker>> {
        let role = worker.role();
        if self.stages.contains_key(&role) {
            warn!("{} stage already registered", role);
            return Err(worker);
        }
        self.stages.insert(role, worker);
        Ok(())
    }

    pub fn contains(&self, role: StageRole) -> bool {
        self.stages.contains_key(&role)
    }

    pub fn get(&self, role: StageRole) -> Option<&dyn Worker> {
        self.stages.get(&role).map(|w| w.as_ref())
    }

    pub fn get_mut(&mut self, role: StageRole) -> Option<&mut (dyn Worker + 'static)> {
        self.stages.get_mut(&role).map(|w| w.as_mut())
    }

    /// Remove a stage for teardown.
    pub fn take(&mut self, role: StageRole) -> Option<Box<dyn Worker>> {
        self.stages.remove(&role)
    }

    pub fn live_roles(&self) -> BTreeSet<StageRole> {
        self.stages.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Terminate every live stage.
    pub fn terminate_all(&self) {
        for worker in self.stages.values() {
            worker.terminate();
        }
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRegistry").field("live", &self.live_roles()).finish()
    }
}
