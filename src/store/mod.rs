//! Transactional record store.
//!
//! The [`StoreBackend`] trait abstracts over storage engines. The only current
//! implementation is [`MemoryBackend`].
//!
//! # Transactions
//!
//! [`Store::begin`] hands out a [`Tx`]. Reads go straight to the backend and
//! remember the revision they observed; writes and deletes are staged inside
//! the transaction. [`Tx::commit`] applies the staged changes atomically, and
//! only if every touched record is still at the revision this transaction
//! observed. Anything else is a `Conflict`.
//!
//! A `Tx` that is dropped without being committed discards its staged
//! changes, so every early return (`?`) rolls back.

mod memory;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::debug;

use crate::{Error, Result};

pub use memory::MemoryBackend;

/// Data type of persisted authorization requests.
pub const RESOURCE_TOKEN_REQUEST_STATE: &str = "resource_token_request_state";
/// Storage realm for records that are not realm scoped.
pub const DEFAULT_REALM: &str = "master";
/// Owner for records that belong to the service itself.
pub const DEFAULT_OWNER: &str = "admin";

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

/// Address of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey {
    /// Record type
    pub data_type: String,
    /// Storage realm
    pub realm: String,
    /// Owning user
    pub owner: String,
    /// Record id
    pub id: String,
}

impl StoreKey {
    /// Key of a service-owned record of `data_type`.
    #[must_use]
    pub fn service(data_type: &str, id: &str) -> Self {
        Self {
            data_type: data_type.to_string(),
            realm: DEFAULT_REALM.to_string(),
            owner: DEFAULT_OWNER.to_string(),
            id: id.to_string(),
        }
    }
}

/// Which revision of a record an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revision {
    /// Whatever is current
    Latest,
    /// Exactly this revision
    Exact(u64),
}

/// A stored record with its revision.
#[derive(Debug, Clone)]
pub struct Versioned {
    /// Revision number, unique across the backend
    pub revision: u64,
    /// Serialized record
    pub value: Value,
}

/// Staged modification of one record.
#[derive(Debug, Clone)]
pub enum Change {
    /// Create or replace
    Put(Value),
    /// Remove
    Delete,
}

/// A staged change plus the revision it expects to replace.
///
/// `expected` of `None` writes unconditionally; `Some(0)` requires the record
/// to be absent.
#[derive(Debug, Clone)]
pub struct Mutation {
    /// Target record
    pub key: StoreKey,
    /// Revision the record must be at when applied
    pub expected: Option<u64>,
    /// What to do
    pub change: Change,
}

/// Storage engine contract.
#[async_trait::async_trait]
pub trait StoreBackend: Send + Sync + 'static {
    /// Check that the backend can serve a transaction.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    /// Current revision of a record, if present.
    async fn get(&self, key: &StoreKey) -> Result<Option<Versioned>>;

    /// Apply all mutations or none.
    ///
    /// Fails with `Conflict` if any record is not at its expected revision.
    async fn apply(&self, mutations: Vec<Mutation>) -> Result<()>;
}

/// Handle to a storage backend.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn StoreBackend>,
}

impl Store {
    /// Wrap a backend.
    #[must_use]
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self { backend }
    }

    /// Store backed by a fresh [`MemoryBackend`].
    #[must_use]
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Open a transaction. `write` allows staging writes and deletes.
    ///
    /// Fails with `Unavailable` when the backend cannot be reached.
    pub async fn begin(&self, write: bool) -> Result<Tx> {
        self.backend.ping().await.map_err(Error::into_unavailable)?;
        let id = NEXT_TX_ID.fetch_add(1, Ordering::Relaxed);
        debug!(tx = id, write, "Transaction opened");
        Ok(Tx {
            id,
            write,
            backend: Arc::clone(&self.backend),
            observed: HashMap::new(),
            staged: BTreeMap::new(),
            finished: false,
        })
    }
}

/// A store transaction. Rolls back unless [`Tx::commit`] succeeds.
pub struct Tx {
    id: u64,
    write: bool,
    backend: Arc<dyn StoreBackend>,
    observed: HashMap<StoreKey, u64>,
    staged: BTreeMap<StoreKey, Change>,
    finished: bool,
}

impl Tx {
    /// Read and deserialize a record.
    ///
    /// Sees this transaction's own staged changes. Fails with `NotFound` if
    /// the record (or the requested revision) does not exist.
    pub async fn read<T: DeserializeOwned>(&mut self, key: &StoreKey, rev: Revision) -> Result<T> {
        if let Some(change) = self.staged.get(key) {
            return match change {
                Change::Put(value) => Ok(serde_json::from_value(value.clone())?),
                Change::Delete => Err(not_found(key)),
            };
        }

        let current = self
            .backend
            .get(key)
            .await
            .map_err(Error::into_unavailable)?;
        self.observed
            .entry(key.clone())
            .or_insert_with(|| current.as_ref().map_or(0, |v| v.revision));

        match current {
            Some(v) if rev == Revision::Latest || rev == Revision::Exact(v.revision) => {
                Ok(serde_json::from_value(v.value)?)
            }
            _ => Err(not_found(key)),
        }
    }

    /// Stage a create-or-replace.
    pub fn write<T: Serialize>(&mut self, key: &StoreKey, rev: Revision, value: &T) -> Result<()> {
        self.expect_revision(key, rev)?;
        let value = serde_json::to_value(value)?;
        self.staged.insert(key.clone(), Change::Put(value));
        Ok(())
    }

    /// Stage a delete.
    pub fn delete(&mut self, key: &StoreKey, rev: Revision) -> Result<()> {
        self.expect_revision(key, rev)?;
        self.staged.insert(key.clone(), Change::Delete);
        Ok(())
    }

    fn expect_revision(&mut self, key: &StoreKey, rev: Revision) -> Result<()> {
        if !self.write {
            return Err(Error::internal("write attempted in a read-only transaction"));
        }
        if let Revision::Exact(n) = rev {
            match self.observed.get(key) {
                Some(seen) if *seen != n => {
                    return Err(Error::Conflict(format!(
                        "record {:?} is at revision {seen}, not {n}",
                        key.id
                    )));
                }
                Some(_) => {}
                None => {
                    self.observed.insert(key.clone(), n);
                }
            }
        }
        Ok(())
    }

    /// Apply all staged changes.
    pub async fn commit(mut self) -> Result<()> {
        self.finished = true;
        if self.staged.is_empty() {
            debug!(tx = self.id, "Transaction finished without changes");
            return Ok(());
        }

        let mutations = std::mem::take(&mut self.staged)
            .into_iter()
            .map(|(key, change)| Mutation {
                expected: self.observed.get(&key).copied(),
                key,
                change,
            })
            .collect();

        self.backend.apply(mutations).await.map_err(|e| match e {
            Error::Conflict(_) => e,
            other => other.into_unavailable(),
        })?;
        debug!(tx = self.id, "Transaction committed");
        Ok(())
    }
}

impl Drop for Tx {
    fn drop(&mut self) {
        if !self.finished && !self.staged.is_empty() {
            debug!(tx = self.id, discarded = self.staged.len(), "Transaction rolled back");
        }
    }
}

fn not_found(key: &StoreKey) -> Error {
    Error::not_found(format!("{} {:?} not found", key.data_type, key.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn key(id: &str) -> StoreKey {
        StoreKey::service("test_record", id)
    }

    #[tokio::test]
    async fn committed_write_is_visible_to_next_transaction() {
        // GIVEN: a write committed in one transaction
        let store = Store::memory();
        let mut tx = store.begin(true).await.unwrap();
        tx.write(&key("a"), Revision::Latest, &"hello").unwrap();
        tx.commit().await.unwrap();

        // WHEN: a later transaction reads it
        let mut tx = store.begin(false).await.unwrap();
        let value: String = tx.read(&key("a"), Revision::Latest).await.unwrap();

        // THEN: it sees the committed value
        assert_eq!(value, "hello");
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = Store::memory();
        {
            let mut tx = store.begin(true).await.unwrap();
            tx.write(&key("a"), Revision::Latest, &1).unwrap();
        }

        let mut tx = store.begin(false).await.unwrap();
        let err = tx.read::<i32>(&key("a"), Revision::Latest).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn transaction_reads_its_own_staged_changes() {
        let store = Store::memory();
        let mut tx = store.begin(true).await.unwrap();
        tx.write(&key("a"), Revision::Latest, &7).unwrap();
        assert_eq!(tx.read::<i32>(&key("a"), Revision::Latest).await.unwrap(), 7);

        tx.delete(&key("a"), Revision::Latest).unwrap();
        let err = tx.read::<i32>(&key("a"), Revision::Latest).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn read_only_transaction_rejects_writes() {
        let store = Store::memory();
        let mut tx = store.begin(false).await.unwrap();
        let err = tx.write(&key("a"), Revision::Latest, &1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[tokio::test]
    async fn concurrent_deletes_of_same_record_conflict() {
        // GIVEN: a stored record and two transactions that both read it
        let store = Store::memory();
        let mut setup = store.begin(true).await.unwrap();
        setup.write(&key("a"), Revision::Latest, &1).unwrap();
        setup.commit().await.unwrap();

        let mut first = store.begin(true).await.unwrap();
        let mut second = store.begin(true).await.unwrap();
        first.read::<i32>(&key("a"), Revision::Latest).await.unwrap();
        second.read::<i32>(&key("a"), Revision::Latest).await.unwrap();

        // WHEN: both delete it
        first.delete(&key("a"), Revision::Latest).unwrap();
        second.delete(&key("a"), Revision::Latest).unwrap();

        // THEN: only the first commit wins
        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn exact_revision_mismatch_is_not_found_on_read() {
        let store = Store::memory();
        let mut tx = store.begin(true).await.unwrap();
        tx.write(&key("a"), Revision::Latest, &1).unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin(false).await.unwrap();
        let err = tx.read::<i32>(&key("a"), Revision::Exact(999_999)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn stale_exact_write_conflicts_immediately() {
        let store = Store::memory();
        let mut tx = store.begin(true).await.unwrap();
        tx.write(&key("a"), Revision::Latest, &1).unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin(true).await.unwrap();
        tx.read::<i32>(&key("a"), Revision::Latest).await.unwrap();
        let err = tx.write(&key("a"), Revision::Exact(999_999), &2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}
