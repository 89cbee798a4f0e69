//! In-memory storage backend.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

use crate::error::Result;
use crate::storage::{LimiterState, StateEntry, Storage};

/// Process-local [`Storage`] backed by a concurrent map.
///
/// Versioned writes go through the map's entry API, so a compare and
/// swap observes and replaces an entry in one step.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    entries: DashMap<String, StateEntry>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of identities with stored state.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Drop all stored state.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn fetch(&self, identity: &str) -> Result<Option<StateEntry>> {
        Ok(self.entries.get(identity).map(|entry| *entry.value()))
    }

    async fn store(
        &self,
        identity: &str,
        expected_version: u64,
        state: LimiterState,
    ) -> Result<bool> {
        let applied = match self.entries.entry(identity.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().version != expected_version {
                    false
                } else {
                    occupied.insert(StateEntry {
                        version: expected_version + 1,
                        state,
                    });
                    true
                }
            }
            Entry::Vacant(vacant) => {
                if expected_version != 0 {
                    false
                } else {
                    vacant.insert(StateEntry { version: 1, state });
                    true
                }
            }
        };
        if !applied {
            trace!(identity = %identity, expected_version, "Stale version, write rejected");
        }
        Ok(applied)
    }

    async fn delete(&self, identity: &str) -> Result<()> {
        self.entries.remove(identity);
        Ok(())
    }
}
