//! In-memory collection of active polls.
//!
//! Every structural change goes through one mutex, so inserts from the
//! command layer, lookups from the push path and sweeps never interleave.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::entity::{PollEntity, PollId, PollSpec};
use crate::error::ValidationError;
use crate::messaging::MessageRef;
use crate::storage::PollRecord;

#[derive(Debug, Default)]
pub struct Registry {
    entries: Mutex<Vec<Arc<PollEntity>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `spec` and register a new poll in `Posting`.
    ///
    /// The caller starts its tasks; this never waits on resolution.
    pub fn create(&self, spec: PollSpec) -> Result<Arc<PollEntity>, ValidationError> {
        spec.validate()?;
        let entity = Arc::new(PollEntity::new_from_spec(spec));
        let mut entries = self.lock();
        sweep_locked(&mut entries);
        entries.push(entity.clone());
        Ok(entity)
    }

    /// Register a rehydrated poll. Returns `None` if another live poll already
    /// owns the same message.
    pub fn adopt(&self, entity: PollEntity) -> Option<Arc<PollEntity>> {
        let identity = *entity.identity()?;
        let mut entries = self.lock();
        sweep_locked(&mut entries);
        let taken = entries.iter().any(|existing| {
            existing
                .identity()
                .is_some_and(|other| other.same_message(&identity))
        });
        if taken {
            return None;
        }
        let entity = Arc::new(entity);
        entries.push(entity.clone());
        Some(entity)
    }

    /// Unresolved poll bound to `message`, if any.
    pub fn find_by_identity(&self, message: &MessageRef) -> Option<Arc<PollEntity>> {
        self.lock()
            .iter()
            .find(|entity| {
                !entity.is_resolved()
                    && entity
                        .identity()
                        .is_some_and(|identity| identity.same_message(message))
            })
            .cloned()
    }

    pub fn get(&self, id: PollId) -> Option<Arc<PollEntity>> {
        self.lock().iter().find(|entity| entity.id() == id).cloned()
    }

    /// Drop every resolved poll. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        sweep_locked(&mut self.lock())
    }

    /// Records for every posted, unresolved poll, stamped with `now`.
    pub fn snapshot_all(&self, now: DateTime<Utc>) -> Vec<PollRecord> {
        let mut entries = self.lock();
        sweep_locked(&mut entries);
        entries
            .iter()
            .filter(|entity| !entity.is_resolved())
            .filter_map(|entity| entity.to_record(now))
            .collect()
    }

    /// Live polls in insertion order.
    pub fn active(&self) -> Vec<Arc<PollEntity>> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<PollEntity>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn sweep_locked(entries: &mut Vec<Arc<PollEntity>>) -> usize {
    let before = entries.len();
    entries.retain(|entity| !entity.is_resolved());
    let removed = before - entries.len();
    if removed > 0 {
        debug!(removed, remaining = entries.len(), "swept resolved polls");
    }
    removed
}
