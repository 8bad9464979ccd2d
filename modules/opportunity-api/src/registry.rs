use std::collections::{HashMap, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;
use uuid::Uuid;

use opportunity_common::{RunState, RunStats, RunStatus};
use opportunity_scout::RunObserver;

const DEFAULT_RETAINED: usize = 1000;

/// Process-local status of every tracked run.
///
/// Finished runs are kept for polling; past `retain` finished entries the
/// oldest is forgotten.
pub struct RunRegistry {
    runs: RwLock<HashMap<Uuid, RunStatus>>,
    finished: RwLock<VecDeque<Uuid>>,
    retain: usize,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_RETAINED)
    }
}

impl RunRegistry {
    pub fn new(retain: usize) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            finished: RwLock::new(VecDeque::new()),
            retain: retain.max(1),
        }
    }

    pub fn queue(&self, run_id: Uuid) {
        self.write_runs().insert(run_id, RunStatus::Queued);
    }

    pub fn complete(&self, run_id: Uuid, post_count: usize, stats: RunStats) {
        self.finish(run_id, RunStatus::Completed { post_count, stats });
    }

    pub fn fail(&self, run_id: Uuid, error: impl Into<String>) {
        self.finish(run_id, RunStatus::Failed { error: error.into() });
    }

    pub fn get(&self, run_id: Uuid) -> Option<RunStatus> {
        self.read_runs().get(&run_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read_runs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn finish(&self, run_id: Uuid, status: RunStatus) {
        self.write_runs().insert(run_id, status);

        let mut finished = self.finished.write().unwrap_or_else(|e| e.into_inner());
        finished.push_back(run_id);
        while finished.len() > self.retain {
            if let Some(old) = finished.pop_front() {
                self.write_runs().remove(&old);
                debug!(run_id = %old, "Evicted finished run");
            }
        }
    }

    fn read_runs(&self) -> RwLockReadGuard<'_, HashMap<Uuid, RunStatus>> {
        self.runs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_runs(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, RunStatus>> {
        self.runs.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl RunObserver for RunRegistry {
    fn on_state(&self, run_id: Uuid, state: RunState) {
        // Terminal statuses carry results or an error message and are set
        // by `complete`/`fail`.
        if state == RunState::Failed {
            return;
        }
        let mut runs = self.write_runs();
        let entry = runs.entry(run_id).or_insert(RunStatus::Queued);
        if !entry.is_terminal() {
            *entry = RunStatus::Running { state };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_run_through_states() {
        let registry = RunRegistry::default();
        let id = Uuid::new_v4();

        registry.queue(id);
        assert!(matches!(registry.get(id), Some(RunStatus::Queued)));

        registry.on_state(id, RunState::Pruning);
        assert!(matches!(
            registry.get(id),
            Some(RunStatus::Running { state: RunState::Pruning })
        ));

        registry.complete(id, 3, RunStats::default());
        registry.on_state(id, RunState::Done);
        assert!(matches!(
            registry.get(id),
            Some(RunStatus::Completed { post_count: 3, .. })
        ));
    }

    #[test]
    fn failed_runs_keep_their_message() {
        let registry = RunRegistry::default();
        let id = Uuid::new_v4();
        registry.queue(id);
        registry.on_state(id, RunState::Validating);
        registry.on_state(id, RunState::Failed);
        registry.fail(id, "audience must not be empty");

        match registry.get(id) {
            Some(RunStatus::Failed { error }) => assert!(error.contains("audience")),
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[test]
    fn oldest_finished_runs_are_evicted() {
        let registry = RunRegistry::new(2);
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            registry.complete(*id, 0, RunStats::default());
        }
        assert_eq!(registry.len(), 2);
        assert!(registry.get(ids[0]).is_none());
        assert!(registry.get(ids[2]).is_some());
    }
}
