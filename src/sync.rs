//! Sync manager: buffers stock movements while offline, applies the
//! optimistic local projection, and replays the queue against the remote
//! store in original order once connectivity returns.

use crate::db::{self, OfflineTransaction, Pool, StorageError};
use crate::model::{NewStockMovement, SyncBacklog, SyncReport};
use crate::net::{ConnectivityHandle, OnlineListenerGuard};
use crate::remote::model::StockMovementRecord;
use crate::remote::{RemoteError, RemoteStore};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("movement quantity must be positive, got {0}")]
    InvalidQuantity(f64),
}

/// Replay retry policy. `max_attempts: None` retries on every trigger,
/// forever; `Some(n)` dead-letters a row after n failed submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    pub max_attempts: Option<u32>,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(10),
        }
    }
}

/// Coordinator between callers, the local cache store and the remote
/// store. Constructed once by the composition root and shared by
/// reference; there is no ambient global instance.
pub struct SyncManager {
    pool: Pool,
    remote: Arc<dyn RemoteStore>,
    connectivity: ConnectivityHandle,
    restaurant_id: String,
    policy: SyncPolicy,
    /// Serializes replay passes; overlapping triggers queue instead of
    /// double-submitting.
    replay_gate: Mutex<()>,
    id_counter: AtomicU64,
}

impl SyncManager {
    pub fn new(
        pool: Pool,
        remote: Arc<dyn RemoteStore>,
        connectivity: ConnectivityHandle,
        restaurant_id: String,
        policy: SyncPolicy,
    ) -> Self {
        Self {
            pool,
            remote,
            connectivity,
            restaurant_id,
            policy,
            replay_gate: Mutex::new(()),
            id_counter: AtomicU64::new(0),
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Current reachability as last reported; side-effect free.
    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Register `callback` for offline -> online transitions (fired once
    /// immediately when already online). Dropping the guard unsubscribes.
    pub fn on_online<F>(&self, callback: F) -> OnlineListenerGuard
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.connectivity.on_online(callback)
    }

    /// Device-local identifiers: a fixed prefix plus wall clock plus a
    /// session counter, so same-millisecond movements cannot collide and
    /// the ids are never mistaken for remote row ids.
    fn next_local_id(&self) -> String {
        let counter = self.id_counter.fetch_add(1, Ordering::Relaxed);
        format!("local-{}-{}", Utc::now().timestamp_millis(), counter)
    }

    /// Record a stock movement without touching the network: persist it
    /// unsynced and apply the optimistic stock projection. Fails only on
    /// invalid input or local storage errors, never because the device is
    /// offline.
    #[instrument(skip_all)]
    pub async fn add_offline_transaction(
        &self,
        input: NewStockMovement,
    ) -> Result<OfflineTransaction, SyncError> {
        if !(input.quantity > 0.0) || !input.quantity.is_finite() {
            return Err(SyncError::InvalidQuantity(input.quantity));
        }

        let mut tx = OfflineTransaction {
            seq: 0,
            local_id: self.next_local_id(),
            item_id: input.item_id,
            kind: input.kind,
            quantity: input.quantity,
            reason: input.reason,
            note: input.note,
            user_id: input.user_id,
            restaurant_id: input.restaurant_id,
            created_at: Utc::now(),
            synced: false,
            attempts: 0,
            dead: false,
        };
        tx.seq = db::append_transaction(&self.pool, &tx).await?;

        let delta = tx.kind.signed_delta(tx.quantity);
        let adjusted = db::adjust_item_stock(&self.pool, &tx.item_id, delta).await?;
        if !adjusted {
            debug!(item_id = %tx.item_id, "movement references an uncached item; projection skipped");
        }

        info!(local_id = %tx.local_id, kind = tx.kind.as_str(), quantity = tx.quantity, "queued offline movement");
        Ok(tx)
    }

    /// Replay pending movements oldest-first. Per-row remote failures are
    /// contained: the row keeps its unsynced state (or dead-letters at the
    /// policy ceiling) and the pass continues. Only the initial queue
    /// fetch can raise. Safe to trigger repeatedly and concurrently.
    #[instrument(skip_all)]
    pub async fn sync_offline_data(&self) -> Result<SyncReport, StorageError> {
        let _gate = self.replay_gate.lock().await;

        let pending = db::get_unsynced_transactions(&self.pool).await?;
        let mut report = SyncReport::default();

        for tx in &pending {
            report.attempted += 1;
            let record = StockMovementRecord::from_local(tx);
            match self.remote.insert_transaction(&record).await {
                Ok(()) => match db::mark_transaction_synced(&self.pool, &tx.local_id).await {
                    Ok(()) => report.synced += 1,
                    Err(err) => {
                        // The remote accepted the row; it will be offered
                        // again on the next pass.
                        warn!(?err, local_id = %tx.local_id, "failed to mark movement synced");
                        report.failed += 1;
                    }
                },
                Err(err) => {
                    warn!(?err, local_id = %tx.local_id, "remote rejected movement; kept for retry");
                    match db::record_failed_attempt(&self.pool, &tx.local_id, self.policy.max_attempts)
                        .await
                    {
                        Ok(true) => {
                            warn!(local_id = %tx.local_id, "movement dead-lettered");
                            report.dead_lettered += 1;
                        }
                        Ok(false) => report.failed += 1,
                        Err(err) => {
                            warn!(?err, local_id = %tx.local_id, "failed to record attempt");
                            report.failed += 1;
                        }
                    }
                }
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                synced = report.synced,
                failed = report.failed,
                dead_lettered = report.dead_lettered,
                "replay pass finished"
            );
        }
        Ok(report)
    }

    /// Refresh the local cache from the remote store with replace-all
    /// semantics. A remote failure propagates unchanged; the stale cache
    /// is left as is and the caller decides what to show.
    #[instrument(skip_all)]
    pub async fn cache_inventory_items(&self) -> Result<usize, SyncError> {
        let fetched = self.remote.fetch_inventory(&self.restaurant_id).await?;
        let items: Vec<_> = fetched.into_iter().map(|item| item.into_cached()).collect();
        db::replace_inventory_items(&self.pool, &items).await?;
        info!(count = items.len(), "inventory cache refreshed");
        Ok(items.len())
    }

    /// Unsynced and dead counts, for an "N movements not yet synced"
    /// indicator.
    pub async fn sync_backlog(&self) -> Result<SyncBacklog, StorageError> {
        db::count_backlog(&self.pool).await
    }

    /// Movements that exhausted the attempt limit. They stay local until
    /// an operator decides what to do with them.
    pub async fn dead_letter_transactions(&self) -> Result<Vec<OfflineTransaction>, StorageError> {
        db::get_dead_transactions(&self.pool).await
    }
}
