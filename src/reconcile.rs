//! Pending / chain history reconciliation
//!
//! [`reconcile`] merges the pending entries of a scope with a polled history
//! page into one de-duplicated view. [`Reconciler`] drives it: poll history
//! with primary / fallback fault tolerance, mark confirmed and timed out
//! entries, merge. [`spawn_collector`] removes resolved entries on a fixed
//! timer, independently of polling.
//!
//! Polling never fails from the caller's point of view: a failed poll yields
//! an empty history page and the pending entries stay visible.

use crate::backoff::{with_fallback, Backoff};
use crate::chain::{ChainAdapter, ChainHistoryEntry, RpcPair};
use crate::metrics::metrics;
use crate::pending::{PendingScope, PendingStatus, PendingStore, PendingTransaction, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default grace window before resolved entries are removed
pub const DEFAULT_GC_GRACE: Duration = Duration::from_secs(15);

/// One row of the merged view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum MergedEntry {
    Pending(PendingTransaction),
    Chain(ChainHistoryEntry),
}

impl MergedEntry {
    pub fn id(&self) -> &str {
        match self {
            MergedEntry::Pending(tx) => &tx.id,
            MergedEntry::Chain(entry) => &entry.id,
        }
    }

    pub fn time(&self) -> i64 {
        match self {
            MergedEntry::Pending(tx) => tx.time,
            MergedEntry::Chain(entry) => entry.time,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, MergedEntry::Pending(_))
    }
}

/// Merge `pending` with a `history` page for `scope`.
///
/// Chain entries that share an id with a pending entry, or that are not older
/// than the earliest pending entry, are dropped. Pending entries come first,
/// newest first, followed by the remaining chain entries, newest first.
pub fn reconcile(
    pending: &[PendingTransaction],
    scope: &PendingScope,
    history: &[ChainHistoryEntry],
) -> Vec<MergedEntry> {
    let mut scoped: Vec<&PendingTransaction> = pending.iter().filter(|tx| tx.in_scope(scope)).collect();
    scoped.sort_by(|a, b| b.time.cmp(&a.time));

    let ids: HashSet<&str> = scoped.iter().map(|tx| tx.id.as_str()).collect();
    let earliest = scoped.iter().map(|tx| tx.time).min();

    let mut chain: Vec<&ChainHistoryEntry> = history
        .iter()
        .filter(|entry| !ids.contains(entry.id.as_str()))
        .filter(|entry| earliest.map_or(true, |t| entry.time < t))
        .collect();
    chain.sort_by(|a, b| b.time.cmp(&a.time));

    scoped
        .into_iter()
        .cloned()
        .map(MergedEntry::Pending)
        .chain(chain.into_iter().cloned().map(MergedEntry::Chain))
        .collect()
}

/// Ids of the `Pending` entries in `scope` that `history` confirms.
///
/// An entry is confirmed when its id appears in the page, or when some page
/// entry supersedes it: a wallet seqno at or past the entry's own when both
/// sides carry one, otherwise a block time at least as new as the submission.
pub fn confirmed_ids(
    pending: &[PendingTransaction],
    scope: &PendingScope,
    history: &[ChainHistoryEntry],
) -> Vec<String> {
    let seen: HashSet<&str> = history.iter().map(|e| e.id.as_str()).collect();

    pending
        .iter()
        .filter(|tx| tx.is_pending() && tx.in_scope(scope))
        .filter(|tx| seen.contains(tx.id.as_str()) || history.iter().any(|e| supersedes(e, tx)))
        .map(|tx| tx.id.clone())
        .collect()
}

/// History seqnos further than this past the pending one belong to another
/// wallet lifetime and are compared by time instead.
const SEQNO_GAP_LIMIT: i64 = 1_000;

fn supersedes(entry: &ChainHistoryEntry, tx: &PendingTransaction) -> bool {
    match (tx.seqno, entry.seqno) {
        (Some(pending), Some(chain))
            if chain != 0 && i64::from(pending) - i64::from(chain) >= -SEQNO_GAP_LIMIT =>
        {
            pending <= chain
        }
        _ => entry.time >= tx.time,
    }
}

/// Ids of the `Pending` entries in `scope` older than `wait_window` at `now`.
pub fn timed_out_ids(
    pending: &[PendingTransaction],
    scope: &PendingScope,
    now: i64,
    wait_window: Duration,
) -> Vec<String> {
    let window = wait_window.as_secs() as i64;
    pending
        .iter()
        .filter(|tx| tx.is_pending() && tx.in_scope(scope))
        .filter(|tx| now - tx.time > window)
        .map(|tx| tx.id.clone())
        .collect()
}

/// Generation counter that lets a consumer discard polls it no longer wants
#[derive(Debug, Clone, Default)]
pub struct PollGeneration {
    current: Arc<AtomicU64>,
}

/// Snapshot of a [`PollGeneration`] taken when a poll starts
#[derive(Debug, Clone)]
pub struct PollTicket {
    generation: u64,
    current: Arc<AtomicU64>,
}

impl PollGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticket(&self) -> PollTicket {
        PollTicket {
            generation: self.current.load(Ordering::SeqCst),
            current: Arc::clone(&self.current),
        }
    }

    /// Mark every outstanding ticket stale.
    pub fn invalidate(&self) {
        self.current.fetch_add(1, Ordering::SeqCst);
    }
}

impl PollTicket {
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }
}

/// Reconciliation settings
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// History entries inspected per poll
    pub history_limit: usize,
    /// Age after which a `Pending` entry is marked `TimedOut`
    pub wait_window: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            history_limit: 32,
            wait_window: Duration::from_secs(60),
        }
    }
}

/// Polls history for one chain and keeps a [`PendingStore`] in step with it
pub struct Reconciler<A: ChainAdapter> {
    adapter: A,
    rpc: RpcPair<A::Client>,
    backoff: Backoff,
    store: Arc<PendingStore>,
    config: ReconcileConfig,
    generation: PollGeneration,
}

impl<A: ChainAdapter> Reconciler<A> {
    pub fn new(
        adapter: A,
        rpc: RpcPair<A::Client>,
        backoff: Backoff,
        store: Arc<PendingStore>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            adapter,
            rpc,
            backoff,
            store,
            config,
            generation: PollGeneration::new(),
        }
    }

    /// Generation handle. Invalidate it to discard polls still in flight.
    pub fn generation(&self) -> &PollGeneration {
        &self.generation
    }

    /// Fetch the history page for `scope`. Failures yield an empty page.
    pub async fn fetch_history(&self, scope: &PendingScope) -> Vec<ChainHistoryEntry> {
        let adapter = &self.adapter;
        let limit = self.config.history_limit;

        match with_fallback(&self.backoff, "poll_history", &self.rpc, None, |client| {
            adapter.poll_history(client, scope, limit)
        })
        .await
        {
            Ok(mut page) => {
                page.truncate(limit);
                page
            }
            Err(err) => {
                warn!(
                    chain = %adapter.kind(),
                    error = %err,
                    "History poll failed, keeping pending entries as they are"
                );
                Vec::new()
            }
        }
    }

    /// Poll once and return the merged view for `scope`.
    ///
    /// Returns `None` when the generation was invalidated while the poll was
    /// in flight; the result is discarded without touching the store.
    pub async fn poll(&self, scope: &PendingScope, now: i64) -> Option<Vec<MergedEntry>> {
        let ticket = self.generation.ticket();
        let history = self.fetch_history(scope).await;

        if !ticket.is_current() {
            debug!("Discarding stale history poll");
            return None;
        }

        match self.apply(scope, &history, now) {
            Ok(merged) => Some(merged),
            Err(err) => {
                warn!(error = %err, "Pending store unavailable during reconciliation");
                Some(reconcile(&[], scope, &history))
            }
        }
    }

    /// Mark confirmed / timed out entries from `history`, then merge.
    pub fn apply(
        &self,
        scope: &PendingScope,
        history: &[ChainHistoryEntry],
        now: i64,
    ) -> Result<Vec<MergedEntry>, StoreError> {
        let pending = self.store.list(scope)?;

        for id in confirmed_ids(&pending, scope, history) {
            if self.store.set_status(scope, &id, PendingStatus::Sent)? {
                info!(id = %id, "Pending transaction confirmed");
                metrics().pending_marked_sent.inc();
            }
        }

        let pending = self.store.list(scope)?;
        for id in timed_out_ids(&pending, scope, now, self.config.wait_window) {
            if self.store.set_status(scope, &id, PendingStatus::TimedOut)? {
                warn!(id = %id, "Pending transaction timed out");
                metrics().pending_marked_timed_out.inc();
            }
        }

        let pending = self.store.list(scope)?;
        Ok(reconcile(&pending, scope, history))
    }
}

/// Remove resolved entries from `store` every `grace`.
///
/// This is the only removal path for `Sent` and `TimedOut` entries; it runs
/// whether or not anything polls. Abort the handle to stop it.
pub fn spawn_collector(store: Arc<PendingStore>, grace: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(grace);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match store.collect_resolved() {
                Ok(0) => {}
                Ok(removed) => {
                    debug!(removed, "Collected resolved pending transactions");
                    metrics().pending_collected.inc_by(removed as u64);
                }
                Err(err) => warn!(error = %err, "Pending collection failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainKind, TokenRef};
    use crate::pending::PendingPayload;

    fn pending(id: &str, time: i64, token: Option<&str>) -> PendingTransaction {
        PendingTransaction {
            id: id.to_string(),
            time,
            status: PendingStatus::Pending,
            last_checkpoint: "h".to_string(),
            seqno: None,
            chain: ChainKind::Solana,
            payload: PendingPayload::Order {
                sender: "S".to_string(),
                target: "R".to_string(),
                amount: 10,
                token: token.map(|t| TokenRef {
                    address: t.to_string(),
                    decimals: 6,
                }),
                comment: None,
            },
        }
    }

    fn chain(id: &str, time: i64) -> ChainHistoryEntry {
        ChainHistoryEntry {
            id: id.to_string(),
            time,
            failed: false,
            seqno: None,
        }
    }

    #[test]
    fn test_scope_filter() {
        let scope = PendingScope::token("S", "Mint");
        let merged = reconcile(
            &[pending("native", 10, None), pending("tok", 11, Some("Mint"))],
            &scope,
            &[],
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id(), "tok");
    }

    #[test]
    fn test_newer_chain_entries_hidden() {
        let scope = PendingScope::native("S");
        let merged = reconcile(
            &[pending("p", 100, None)],
            &scope,
            &[chain("c-new", 101), chain("c-same", 100), chain("c-old", 99)],
        );
        let ids: Vec<&str> = merged.iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec!["p", "c-old"]);
    }

    #[test]
    fn test_no_pending_keeps_history() {
        let scope = PendingScope::native("S");
        let merged = reconcile(&[], &scope, &[chain("a", 1), chain("b", 2)]);
        let ids: Vec<&str> = merged.iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_confirmed_by_id_and_by_time() {
        let scope = PendingScope::native("S");
        let entries = [pending("x", 50, None), pending("y", 90, None), pending("z", 200, None)];
        let history = [chain("x", 120), chain("other", 100)];

        let mut ids = confirmed_ids(&entries, &scope, &history);
        ids.sort();
        assert_eq!(ids, vec!["x", "y"]);
        assert!(confirmed_ids(&entries, &scope, &[]).is_empty());
    }

    fn with_seqno(mut tx: PendingTransaction, seqno: u32) -> PendingTransaction {
        tx.seqno = Some(seqno);
        tx
    }

    fn chain_seqno(id: &str, time: i64, seqno: u32) -> ChainHistoryEntry {
        ChainHistoryEntry {
            seqno: Some(seqno),
            ..chain(id, time)
        }
    }

    #[test]
    fn test_confirmed_by_seqno_over_time() {
        let scope = PendingScope::native("S");
        let entries = [
            with_seqno(pending("reached", 500, None), 7),
            with_seqno(pending("ahead", 100, None), 9),
        ];
        // Block time lags both submissions for "reached", leads for "ahead"
        let history = [chain_seqno("h", 400, 8)];

        assert_eq!(confirmed_ids(&entries, &scope, &history), vec!["reached"]);
    }

    #[test]
    fn test_seqno_falls_back_to_time() {
        let scope = PendingScope::native("S");
        let entries = [with_seqno(pending("p", 100, None), 5)];

        // Missing or zero seqno on the chain side
        assert_eq!(confirmed_ids(&entries, &scope, &[chain("h", 100)]), vec!["p"]);
        assert_eq!(confirmed_ids(&entries, &scope, &[chain_seqno("h", 100, 0)]), vec!["p"]);
        // Chain seqno too far ahead to be comparable
        assert!(confirmed_ids(&entries, &scope, &[chain_seqno("h", 99, 2_000)]).is_empty());
        assert_eq!(
            confirmed_ids(&entries, &scope, &[chain_seqno("h", 101, 2_000)]),
            vec!["p"]
        );
    }

    #[test]
    fn test_timed_out_after_window() {
        let scope = PendingScope::native("S");
        let entries = [pending("old", 0, None), pending("fresh", 50, None)];
        let ids = timed_out_ids(&entries, &scope, 70, Duration::from_secs(60));
        assert_eq!(ids, vec!["old"]);
    }

    #[test]
    fn test_generation_invalidates_tickets() {
        let generation = PollGeneration::new();
        let ticket = generation.ticket();
        assert!(ticket.is_current());
        generation.invalidate();
        assert!(!ticket.is_current());
        assert!(generation.ticket().is_current());
    }
}
