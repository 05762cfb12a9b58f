//! Pending transaction store
//!
//! Transactions the orchestrator has broadcast but that have not shown up in
//! polled history yet. Entries are grouped by [`PendingScope`] (account plus
//! optional token) and round-trip through a [`PendingStorage`] collaborator on
//! every read and write.
//!
//! Lifecycle of an entry:
//! - `Pending -> Sent` when reconciliation sees it on-chain
//! - `Pending -> TimedOut` when it outlives the wait window
//! - removed by the collector once it is no longer `Pending`
//!
//! Mutations are serialized by a store-wide lock. Within one scope the store
//! never holds two entries with the same id.

use crate::chain::{ChainKind, InstructionSummary, TokenRef};
use crate::metrics::metrics;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("pending transaction {0} already stored")]
    DuplicateId(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
}

/// Account plus optional token the entries belong to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingScope {
    pub account: String,
    /// Mint / jetton master, `None` for the native asset
    pub token: Option<String>,
}

impl PendingScope {
    pub fn native(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            token: None,
        }
    }

    pub fn token(account: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            token: Some(token.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    Pending,
    Sent,
    TimedOut,
}

/// What was submitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PendingPayload {
    /// Transfer built from a user order
    Order {
        sender: String,
        target: String,
        amount: u64,
        token: Option<TokenRef>,
        comment: Option<String>,
    },
    /// Externally built transaction
    Prebuilt { instructions: Vec<InstructionSummary> },
}

/// Submitted but unconfirmed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    /// Submission signature / hash
    pub id: String,
    /// Submission time, epoch seconds
    pub time: i64,
    pub status: PendingStatus,
    /// Checkpoint the transaction was signed against
    pub last_checkpoint: String,
    /// Wallet seqno consumed by the transaction (TON)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seqno: Option<u32>,
    pub chain: ChainKind,
    pub payload: PendingPayload,
}

impl PendingTransaction {
    pub fn is_pending(&self) -> bool {
        self.status == PendingStatus::Pending
    }

    pub fn is_prebuilt(&self) -> bool {
        matches!(self.payload, PendingPayload::Prebuilt { .. })
    }

    /// Token this entry moves, `None` for native and prebuilt transfers.
    pub fn token_scope(&self) -> Option<&str> {
        match &self.payload {
            PendingPayload::Order {
                token: Some(token), ..
            } => Some(token.address.as_str()),
            _ => None,
        }
    }

    /// Whether the entry is shown under `scope`.
    pub fn in_scope(&self, scope: &PendingScope) -> bool {
        self.token_scope() == scope.token.as_deref()
    }
}

/// Keyed persistence behind the store
pub trait PendingStorage: Send + Sync {
    fn load(&self, scope: &PendingScope) -> Result<Vec<PendingTransaction>, StoreError>;

    fn save(&self, scope: &PendingScope, entries: &[PendingTransaction]) -> Result<(), StoreError>;

    /// Every scope that currently has a saved list
    fn scopes(&self) -> Result<Vec<PendingScope>, StoreError>;
}

/// Process memory storage, JSON encoded like the on-disk one
#[derive(Default)]
pub struct InMemoryStorage {
    entries: DashMap<PendingScope, String>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PendingStorage for InMemoryStorage {
    fn load(&self, scope: &PendingScope) -> Result<Vec<PendingTransaction>, StoreError> {
        match self.entries.get(scope) {
            Some(raw) => Ok(serde_json::from_str(raw.value())?),
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, scope: &PendingScope, entries: &[PendingTransaction]) -> Result<(), StoreError> {
        if entries.is_empty() {
            self.entries.remove(scope);
        } else {
            self.entries.insert(scope.clone(), serde_json::to_string(entries)?);
        }
        Ok(())
    }

    fn scopes(&self) -> Result<Vec<PendingScope>, StoreError> {
        Ok(self.entries.iter().map(|e| e.key().clone()).collect())
    }
}

/// sled backed storage, one key per scope
pub struct SledStorage {
    db: sled::Db,
}

impl SledStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    fn key(scope: &PendingScope) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(scope)?)
    }
}

impl PendingStorage for SledStorage {
    fn load(&self, scope: &PendingScope) -> Result<Vec<PendingTransaction>, StoreError> {
        match self.db.get(Self::key(scope)?)? {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, scope: &PendingScope, entries: &[PendingTransaction]) -> Result<(), StoreError> {
        let key = Self::key(scope)?;
        if entries.is_empty() {
            self.db.remove(key)?;
        } else {
            self.db.insert(key, serde_json::to_vec(entries)?)?;
        }
        self.db.flush()?;
        Ok(())
    }

    fn scopes(&self) -> Result<Vec<PendingScope>, StoreError> {
        let mut scopes = Vec::new();
        for key in self.db.iter().keys() {
            let key = key?;
            match serde_json::from_slice(&key) {
                Ok(scope) => scopes.push(scope),
                Err(e) => warn!(error = %e, "Skipping unreadable pending scope key"),
            }
        }
        Ok(scopes)
    }
}

/// Pending transactions of one session, shared between submit and
/// reconciliation flows
pub struct PendingStore {
    storage: Arc<dyn PendingStorage>,
    write_lock: Mutex<()>,
}

impl PendingStore {
    pub fn new(storage: Arc<dyn PendingStorage>) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStorage::new()))
    }

    pub fn list(&self, scope: &PendingScope) -> Result<Vec<PendingTransaction>, StoreError> {
        self.storage.load(scope)
    }

    /// Append `tx`. Refuses an id that is already stored for the scope.
    pub fn add(&self, scope: &PendingScope, tx: PendingTransaction) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let mut entries = self.storage.load(scope)?;
        if entries.iter().any(|e| e.id == tx.id) {
            return Err(StoreError::DuplicateId(tx.id));
        }

        debug!(id = %tx.id, chain = %tx.chain, "Tracking pending transaction");
        if tx.is_pending() {
            metrics().pending_live.inc();
        }
        entries.push(tx);
        self.storage.save(scope, &entries)
    }

    /// Move entry `id` to `status`.
    ///
    /// Returns `false` when the entry is not stored, or when it has already
    /// left `Pending` for a different status; `Sent` and `TimedOut` are final.
    pub fn set_status(
        &self,
        scope: &PendingScope,
        id: &str,
        status: PendingStatus,
    ) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();
        let mut entries = self.storage.load(scope)?;
        let Some(entry) = entries.iter_mut().find(|e| e.id == id) else {
            return Ok(false);
        };

        if entry.status == status {
            return Ok(true);
        }
        if !entry.is_pending() {
            debug!(id = %id, from = ?entry.status, to = ?status, "Ignoring change of a final status");
            return Ok(false);
        }
        metrics().pending_live.dec();
        debug!(id = %id, from = ?entry.status, to = ?status, "Pending status change");
        entry.status = status;

        self.storage.save(scope, &entries)?;
        Ok(true)
    }

    /// Remove entries by id, ignoring unknown ids. Returns how many went away.
    pub fn remove(&self, scope: &PendingScope, ids: &[String]) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock();
        self.remove_where(scope, |e| ids.contains(&e.id))
    }

    /// Remove every entry that left `Pending`, across all scopes.
    pub fn collect_resolved(&self) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock();
        let mut removed = 0;
        for scope in self.storage.scopes()? {
            removed += self.remove_where(&scope, |e| !e.is_pending())?;
        }
        Ok(removed)
    }

    fn remove_where<F>(&self, scope: &PendingScope, predicate: F) -> Result<usize, StoreError>
    where
        F: Fn(&PendingTransaction) -> bool,
    {
        let entries = self.storage.load(scope)?;
        let before = entries.len();

        let (removed, kept): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| predicate(e));
        if removed.is_empty() {
            return Ok(0);
        }

        let live = removed.iter().filter(|e| e.is_pending()).count();
        metrics().pending_live.sub(live as i64);

        self.storage.save(scope, &kept)?;
        Ok(before - kept.len())
    }
}
