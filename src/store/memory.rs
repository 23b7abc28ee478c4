//! In-memory store backend.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{Change, Mutation, StoreBackend, StoreKey, Versioned};
use crate::{Error, Result};

#[derive(Default)]
struct Inner {
    records: HashMap<StoreKey, Versioned>,
    last_revision: u64,
}

/// Store backend holding all records in a process-local map.
///
/// Revisions come from one backend-wide counter, so a record that is deleted
/// and recreated never reuses an old revision.
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Whether no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl StoreBackend for MemoryBackend {
    async fn get(&self, key: &StoreKey) -> Result<Option<Versioned>> {
        Ok(self.inner.read().records.get(key).cloned())
    }

    async fn apply(&self, mutations: Vec<Mutation>) -> Result<()> {
        let mut inner = self.inner.write();

        for m in &mutations {
            let Some(expected) = m.expected else { continue };
            let current = inner.records.get(&m.key).map_or(0, |v| v.revision);
            if current != expected {
                return Err(Error::Conflict(format!(
                    "record {:?} changed concurrently (expected revision {expected}, found {current})",
                    m.key.id
                )));
            }
        }

        for m in mutations {
            match m.change {
                Change::Put(value) => {
                    inner.last_revision += 1;
                    let revision = inner.last_revision;
                    inner.records.insert(m.key, Versioned { revision, value });
                }
                Change::Delete => {
                    inner.records.remove(&m.key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(id: &str) -> StoreKey {
        StoreKey::service("t", id)
    }

    #[tokio::test]
    async fn apply_is_all_or_nothing() {
        // GIVEN: one existing record
        let backend = MemoryBackend::new();
        backend
            .apply(vec![Mutation { key: key("a"), expected: None, change: Change::Put(json!(1)) }])
            .await
            .unwrap();

        // WHEN: a batch contains one valid and one stale mutation
        let result = backend
            .apply(vec![
                Mutation { key: key("b"), expected: Some(0), change: Change::Put(json!(2)) },
                Mutation { key: key("a"), expected: Some(42), change: Change::Delete },
            ])
            .await;

        // THEN: nothing is applied
        assert!(result.is_err());
        assert_eq!(backend.len(), 1);
        assert!(backend.get(&key("b")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revisions_never_repeat_after_recreate() {
        let backend = MemoryBackend::new();
        let put = |v| Mutation { key: key("a"), expected: None, change: Change::Put(json!(v)) };

        backend.apply(vec![put(1)]).await.unwrap();
        let first = backend.get(&key("a")).await.unwrap().unwrap().revision;
        backend
            .apply(vec![Mutation { key: key("a"), expected: None, change: Change::Delete }])
            .await
            .unwrap();
        backend.apply(vec![put(2)]).await.unwrap();
        let second = backend.get(&key("a")).await.unwrap().unwrap().revision;

        assert!(second > first);
    }
}
