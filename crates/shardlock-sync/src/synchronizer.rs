//! [`GraphSynchronizer`]: lease-protected read-modify-write of the shared graph.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use shardlock_graph::{codec, EntityGraph, PrunePolicy};
use shardlock_mutex::{LeaseMutex, MutexError, MutexTable};
use shardlock_store::{BlobStore, LockStore};
use shardlock_types::{ChainId, Clock, HolderId, SystemClock};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::pointer::GraphPointer;
use crate::types::{PersistOutcome, PersistReport};

/// Merges shard deltas into the shared graph of each chain.
///
/// One synchronizer per shard process. It owns the shard's holder identity
/// and an in-process cache of the last graph it wrote or loaded per chain.
pub struct GraphSynchronizer {
    lock_store: Arc<dyn LockStore>,
    blob_store: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    holder: HolderId,
    table: MutexTable,
    cache: RwLock<HashMap<ChainId, EntityGraph>>,
}

impl std::fmt::Debug for GraphSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphSynchronizer")
            .field("holder", &self.holder)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GraphSynchronizer {
    /// Build a synchronizer on the system clock with a random holder id.
    pub fn new(
        lock_store: Arc<dyn LockStore>,
        blob_store: Arc<dyn BlobStore>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let table = Self::build_table(&lock_store, &clock, &config);
        Ok(Self {
            lock_store,
            blob_store,
            clock,
            config,
            holder: HolderId::random(),
            table,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.table = Self::build_table(&self.lock_store, &clock, &self.config);
        self.clock = clock;
        self
    }

    pub fn with_holder(mut self, holder: HolderId) -> Self {
        self.holder = holder;
        self
    }

    fn build_table(
        store: &Arc<dyn LockStore>,
        clock: &Arc<dyn Clock>,
        config: &SyncConfig,
    ) -> MutexTable {
        MutexTable::new(Arc::clone(store), Arc::clone(clock), config.resource_prefix.clone())
            .with_ttl_minutes(config.lock_ttl_minutes)
    }

    pub fn holder(&self) -> &HolderId {
        &self.holder
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The lease mutex guarding `chain`'s graph.
    pub fn mutex(&self, chain: ChainId) -> SyncResult<LeaseMutex> {
        Ok(LeaseMutex::new(
            self.table.clone(),
            self.config.lock_name(chain),
            self.holder.clone(),
            self.config.lease_duration(),
        )?)
    }

    /// Merge `delta` into the shared graph of `chain`.
    ///
    /// Tries the lock up to `max_attempts` times, sleeping `retry_interval`
    /// between attempts. Store errors while locking count as failed attempts.
    /// Once the lock is held the outcome is always `Ok`: a failure inside the
    /// locked section is logged and returned as
    /// [`PersistOutcome::MergeFailed`], and the lock is released either way.
    /// The delta is not retained on failure; resubmit it next cycle.
    pub async fn persist<P>(
        &self,
        delta: &EntityGraph,
        chain: ChainId,
        prune: &P,
        cancel: &CancellationToken,
    ) -> SyncResult<PersistOutcome>
    where
        P: PrunePolicy + ?Sized,
    {
        let mutex = self.mutex(chain)?;
        let max_attempts = self.config.max_attempts;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled { attempts: attempt - 1 });
            }

            match mutex.acquire().await {
                Ok(guard) => {
                    let result = self.merge_locked(delta, chain, prune).await;
                    let released = match guard.release().await {
                        Ok(released) => released,
                        Err(e) => {
                            warn!(chain = %chain, error = %e, "release after persist failed");
                            false
                        }
                    };
                    return Ok(match result {
                        Ok(report) => {
                            info!(
                                chain = %chain,
                                holder = %self.holder,
                                nodes = report.nodes,
                                edges = report.edges,
                                raw_kb = report.raw_kb,
                                compressed_kb = report.compressed_kb,
                                attempt,
                                "persisted shared graph"
                            );
                            PersistOutcome::Merged { report, attempts: attempt, released }
                        }
                        Err(e) => {
                            error!(chain = %chain, holder = %self.holder, error = %e, "merge failed; delta dropped");
                            PersistOutcome::MergeFailed {
                                reason: e.to_string(),
                                attempts: attempt,
                                released,
                            }
                        }
                    });
                }
                Err(MutexError::NotAcquired { .. }) => {
                    info!(chain = %chain, holder = %self.holder, attempt, "mutex is locked; retrying");
                }
                Err(MutexError::Store(e)) => {
                    warn!(chain = %chain, holder = %self.holder, attempt, error = %e, "lock attempt failed");
                    last_error = Some(e.to_string());
                }
                Err(e) => return Err(e.into()),
            }

            if attempt < max_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(SyncError::Cancelled { attempts: attempt });
                    }
                    _ = tokio::time::sleep(self.config.retry_interval()) => {}
                }
            }
        }

        Err(SyncError::LockNotAcquired {
            lock: mutex.name().to_string(),
            attempts: max_attempts,
            last_error,
        })
    }

    /// Load, union, prune, encode, upload, repoint, cache. Lock must be held.
    async fn merge_locked<P>(
        &self,
        delta: &EntityGraph,
        chain: ChainId,
        prune: &P,
    ) -> SyncResult<PersistReport>
    where
        P: PrunePolicy + ?Sized,
    {
        let shared = self.load(chain).await?;
        let mut merged = shared.union(delta);
        let pruned = prune.prune(&mut merged);

        let encoded = codec::encode(&merged)?;
        let raw_kb = encoded.raw_size_kb();
        let compressed_kb = encoded.size_kb();

        let blob_key = self.config.blob_key(chain);
        self.blob_store
            .put_object(&blob_key, Bytes::from(encoded.bytes))
            .await?;

        let pointer = GraphPointer {
            chain_id: chain,
            blob_key: blob_key.clone(),
            size_kb: format!("{compressed_kb:.3}"),
            updated: self.clock.now_utc(),
        };
        self.lock_store.put_item(pointer.to_item(&self.config)).await?;

        let report = PersistReport {
            blob_key,
            nodes: merged.node_count(),
            edges: merged.edge_count(),
            pruned,
            raw_kb,
            compressed_kb,
            updated: pointer.updated,
        };
        self.cache.write().await.insert(chain, merged);
        Ok(report)
    }

    /// The current pointer row for `chain`, if any graph was ever stored.
    pub async fn pointer(&self, chain: ChainId) -> SyncResult<Option<GraphPointer>> {
        let key = GraphPointer::key(&self.config, chain);
        match self.lock_store.get_item(&key).await? {
            Some(item) => Ok(Some(GraphPointer::from_item(&item, chain)?)),
            None => Ok(None),
        }
    }

    /// Snapshot of the shared graph for `chain`. Empty if none is stored.
    ///
    /// Does not take the lock: the result may be overwritten concurrently.
    pub async fn load(&self, chain: ChainId) -> SyncResult<EntityGraph> {
        debug!(chain = %chain, graph_key = %self.config.graph_key, "loading shared graph");
        let Some(pointer) = self.pointer(chain).await? else {
            return Ok(EntityGraph::new());
        };
        let body = self
            .blob_store
            .get_object(&pointer.blob_key)
            .await?
            .ok_or(SyncError::MissingBlob {
                blob_key: pointer.blob_key,
            })?;
        Ok(codec::decode(&body)?)
    }

    /// The graph this shard last wrote or warmed for `chain`.
    pub async fn cached(&self, chain: ChainId) -> Option<EntityGraph> {
        self.cache.read().await.get(&chain).cloned()
    }

    /// Load `chain`'s shared graph into the cache. Returns its node count.
    pub async fn warm_cache(&self, chain: ChainId) -> SyncResult<usize> {
        let graph = self.load(chain).await?;
        let nodes = graph.node_count();
        self.cache.write().await.insert(chain, graph);
        info!(chain = %chain, nodes, "graph cache warmed");
        Ok(nodes)
    }

    /// Delete every pointer row under this deployment's pointer partition,
    /// for all chains, and the blobs they reference.
    ///
    /// Administrative reset; does not take any lock. `chain` only labels the
    /// request in the logs. Returns the number of pointer rows deleted.
    pub async fn clean_all(&self, chain: ChainId) -> SyncResult<usize> {
        let partition = self.config.pointer_partition();
        let rows = self.lock_store.query(&partition).await?;

        let mut deleted = 0;
        for item in &rows {
            if let Ok(Some(blob_key)) = item.get_str("s3_key") {
                self.blob_store.delete_object(blob_key).await?;
            }
            if self.lock_store.delete_item(&item.key).await? {
                info!(key = %item.key, "deleted graph pointer");
                deleted += 1;
            }
        }
        self.cache.write().await.clear();
        info!(chain = %chain, partition = %partition, deleted, "cleaned shared graphs");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::TimeZone;
    use shardlock_graph::{MaxAgePolicy, NoPrune, RelationKind};
    use shardlock_store::{FsBlobStore, InMemoryBlobStore, InMemoryLockStore};
    use shardlock_types::{Address, ManualClock};

    const START_MS: i64 = 1_700_000_000_000;

    struct Harness {
        locks: Arc<InMemoryLockStore>,
        blobs: Arc<InMemoryBlobStore>,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                locks: Arc::new(InMemoryLockStore::new()),
                blobs: Arc::new(InMemoryBlobStore::new()),
                clock: Arc::new(ManualClock::new(START_MS)),
            }
        }

        fn config() -> SyncConfig {
            SyncConfig {
                resource_prefix: "0xbot".into(),
                table_name: "test-table".into(),
                max_attempts: 3,
                retry_interval_ms: 10,
                ..SyncConfig::default()
            }
        }

        fn shard(&self, name: &str) -> GraphSynchronizer {
            self.shard_with(name, Self::config())
        }

        fn shard_with(&self, name: &str, config: SyncConfig) -> GraphSynchronizer {
            GraphSynchronizer::new(self.locks.clone(), self.blobs.clone(), config)
                .unwrap()
                .with_clock(self.clock.clone())
                .with_holder(HolderId::new(name).unwrap())
        }
    }

    fn addr(n: u8) -> Address {
        let mut bytes = [0x33u8; 20];
        bytes[19] = n;
        Address::from_bytes(bytes)
    }

    fn edge(a: u8, b: u8) -> EntityGraph {
        let seen = chrono::Utc.timestamp_millis_opt(START_MS).unwrap();
        let mut g = EntityGraph::new();
        g.observe_address(addr(a), seen);
        g.observe_address(addr(b), seen);
        g.add_relation(addr(a), addr(b), RelationKind::Funding, Some("0xtx"));
        g
    }

    const CHAIN: ChainId = ChainId::MAINNET;

    #[tokio::test]
    async fn load_without_pointer_is_empty() {
        let h = Harness::new();
        let shard = h.shard("a");
        assert!(shard.load(CHAIN).await.unwrap().is_empty());
        assert!(shard.pointer(CHAIN).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn persist_stores_blob_and_pointer() {
        let h = Harness::new();
        let shard = h.shard("a");
        let outcome = shard
            .persist(&edge(1, 2), CHAIN, &NoPrune, &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.is_merged());
        assert!(outcome.released());
        assert_eq!(outcome.attempts(), 1);
        let report = outcome.report().unwrap();
        assert_eq!((report.nodes, report.edges), (2, 1));
        assert_eq!(report.blob_key, "0xbot/sub_graph/1/test-table_SHARED_GRAPH");

        let pointer = shard.pointer(CHAIN).await.unwrap().unwrap();
        assert_eq!(pointer.blob_key, report.blob_key);
        assert_eq!(pointer.updated.timestamp_millis(), START_MS);
        assert_eq!(h.blobs.keys(), vec![report.blob_key.clone()]);

        assert_eq!(shard.load(CHAIN).await.unwrap(), edge(1, 2));
        assert_eq!(shard.cached(CHAIN).await.unwrap(), edge(1, 2));

        let lock = shard.mutex(CHAIN).unwrap().raw_lock().await.unwrap().unwrap();
        assert!(lock.is_released());
    }

    #[tokio::test]
    async fn two_shards_merge_disjoint_edges() {
        let h = Harness::new();
        let a = h.shard("a");
        let b = h.shard("b");
        let cancel = CancellationToken::new();

        a.persist(&edge(1, 2), CHAIN, &NoPrune, &cancel).await.unwrap();
        h.clock.advance(Duration::from_secs(30));
        b.persist(&edge(3, 4), CHAIN, &NoPrune, &cancel).await.unwrap();

        let shared = a.load(CHAIN).await.unwrap();
        assert_eq!(shared.edge_count(), 2);
        assert_eq!(shared.node_count(), 4);
        assert_eq!(shared, edge(1, 2).union(&edge(3, 4)));

        let pointer = a.pointer(CHAIN).await.unwrap().unwrap();
        assert_eq!(pointer.updated.timestamp_millis(), START_MS + 30_000);
    }

    #[tokio::test]
    async fn persisting_same_delta_twice_is_idempotent() {
        let h = Harness::new();
        let shard = h.shard("a");
        let cancel = CancellationToken::new();

        shard.persist(&edge(1, 2), CHAIN, &NoPrune, &cancel).await.unwrap();
        let once = shard.load(CHAIN).await.unwrap();
        shard.persist(&edge(1, 2), CHAIN, &NoPrune, &cancel).await.unwrap();
        assert_eq!(shard.load(CHAIN).await.unwrap(), once);
    }

    #[tokio::test]
    async fn chains_are_isolated() {
        let h = Harness::new();
        let shard = h.shard("a");
        let cancel = CancellationToken::new();
        let polygon = ChainId::new(137);

        shard.persist(&edge(1, 2), CHAIN, &NoPrune, &cancel).await.unwrap();
        shard.persist(&edge(5, 6), polygon, &NoPrune, &cancel).await.unwrap();

        assert_eq!(shard.load(CHAIN).await.unwrap(), edge(1, 2));
        assert_eq!(shard.load(polygon).await.unwrap(), edge(5, 6));
    }

    #[tokio::test]
    async fn held_lock_exhausts_attempts() {
        let h = Harness::new();
        let shard = h.shard("a");
        let rival = h.shard("b").mutex(CHAIN).unwrap();
        assert!(rival.lock().await.unwrap());

        let err = shard
            .persist(&edge(1, 2), CHAIN, &NoPrune, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            SyncError::LockNotAcquired { lock, attempts, last_error } => {
                assert_eq!(lock, "mutex|1");
                assert_eq!(attempts, 3);
                assert!(last_error.is_none());
            }
            other => panic!("expected LockNotAcquired, got {other}"),
        }
        assert!(shard.pointer(CHAIN).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unreachable_item_store_reports_not_acquired() {
        let h = Harness::new();
        let shard = h.shard("a");
        h.locks.set_offline(true);

        let err = shard
            .persist(&edge(1, 2), CHAIN, &NoPrune, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::LockNotAcquired { last_error: Some(_), attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn crashed_holder_lease_is_reclaimed() {
        let h = Harness::new();
        let crashed = h.shard("crashed").mutex(CHAIN).unwrap();
        assert!(crashed.lock().await.unwrap());

        h.clock.advance(Duration::from_secs(11));
        let outcome = h
            .shard("a")
            .persist(&edge(1, 2), CHAIN, &NoPrune, &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_merged());
        assert_eq!(outcome.attempts(), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_retry_loop() {
        let h = Harness::new();
        let config = SyncConfig {
            max_attempts: 100,
            retry_interval_ms: 60_000,
            ..Harness::config()
        };
        let shard = h.shard_with("a", config);
        assert!(h.shard("b").mutex(CHAIN).unwrap().lock().await.unwrap());

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = shard
            .persist(&edge(1, 2), CHAIN, &NoPrune, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Cancelled { attempts: 1 }));
    }

    #[tokio::test]
    async fn cancelled_before_start_makes_no_attempt() {
        let h = Harness::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = h
            .shard("a")
            .persist(&edge(1, 2), CHAIN, &NoPrune, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Cancelled { attempts: 0 }));
    }

    #[tokio::test]
    async fn failure_inside_lock_is_reported_and_lock_released() {
        let h = Harness::new();
        let shard = h.shard("a");
        h.blobs.set_offline(true);

        let outcome = shard
            .persist(&edge(1, 2), CHAIN, &NoPrune, &CancellationToken::new())
            .await
            .unwrap();
        match &outcome {
            PersistOutcome::MergeFailed { reason, attempts, released } => {
                assert!(reason.contains("offline"), "{reason}");
                assert_eq!(*attempts, 1);
                assert!(*released);
            }
            other => panic!("expected MergeFailed, got {other:?}"),
        }
        assert!(shard.pointer(CHAIN).await.unwrap().is_none());

        // Another shard can take the lock right away.
        h.blobs.set_offline(false);
        let next = h
            .shard("b")
            .persist(&edge(3, 4), CHAIN, &NoPrune, &CancellationToken::new())
            .await
            .unwrap();
        assert!(next.is_merged());
    }

    #[tokio::test]
    async fn prune_policy_runs_on_merged_graph() {
        let h = Harness::new();
        let shard = h.shard("a");
        let cancel = CancellationToken::new();
        shard.persist(&edge(1, 2), CHAIN, &NoPrune, &cancel).await.unwrap();

        // Eight days later a fresh edge arrives; the old nodes age out.
        h.clock.advance(Duration::from_secs(8 * 24 * 60 * 60));
        let now = h.clock.now_utc();
        let mut delta = EntityGraph::new();
        delta.observe_address(addr(7), now);
        delta.observe_address(addr(8), now);
        delta.add_relation(addr(7), addr(8), RelationKind::Transfer, None);

        let policy = MaxAgePolicy::default_for(h.clock.clone());
        let outcome = shard.persist(&delta, CHAIN, &policy, &cancel).await.unwrap();
        assert_eq!(outcome.report().unwrap().pruned, 2);
        assert_eq!(shard.load(CHAIN).await.unwrap(), delta);
    }

    #[tokio::test]
    async fn missing_blob_is_an_error() {
        let h = Harness::new();
        let shard = h.shard("a");
        let report = shard
            .persist(&edge(1, 2), CHAIN, &NoPrune, &CancellationToken::new())
            .await
            .unwrap();
        let blob_key = report.report().unwrap().blob_key.clone();
        h.blobs.delete_object(&blob_key).await.unwrap();

        assert!(matches!(
            shard.load(CHAIN).await,
            Err(SyncError::MissingBlob { .. })
        ));
    }

    #[tokio::test]
    async fn clean_all_removes_every_pointer_row() {
        let h = Harness::new();
        let shard = h.shard("a");
        let cancel = CancellationToken::new();
        let polygon = ChainId::new(137);
        shard.persist(&edge(1, 2), CHAIN, &NoPrune, &cancel).await.unwrap();
        shard.persist(&edge(5, 6), polygon, &NoPrune, &cancel).await.unwrap();

        assert_eq!(shard.clean_all(CHAIN).await.unwrap(), 2);
        let partition = shard.config().pointer_partition();
        assert!(h.locks.query(&partition).await.unwrap().is_empty());
        assert!(h.blobs.keys().is_empty());
        assert!(shard.load(CHAIN).await.unwrap().is_empty());
        assert!(shard.load(polygon).await.unwrap().is_empty());
        assert!(shard.cached(CHAIN).await.is_none());
        assert!(shard.cached(polygon).await.is_none());
        assert_eq!(shard.clean_all(CHAIN).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn warm_cache_loads_shared_graph() {
        let h = Harness::new();
        h.shard("a")
            .persist(&edge(1, 2), CHAIN, &NoPrune, &CancellationToken::new())
            .await
            .unwrap();

        let fresh = h.shard("b");
        assert!(fresh.cached(CHAIN).await.is_none());
        assert_eq!(fresh.warm_cache(CHAIN).await.unwrap(), 2);
        assert_eq!(fresh.cached(CHAIN).await.unwrap(), edge(1, 2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_shards_lose_no_updates() {
        let h = Harness::new();
        let config = SyncConfig {
            max_attempts: 200,
            retry_interval_ms: 2,
            ..Harness::config()
        };

        let mut handles = Vec::new();
        for i in 0..6u8 {
            let shard = Arc::new(h.shard_with(&format!("shard-{i}"), config.clone()));
            handles.push(tokio::spawn(async move {
                shard
                    .persist(&edge(10 + 2 * i, 11 + 2 * i), CHAIN, &NoPrune, &CancellationToken::new())
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_merged());
        }

        let shared = h.shard("reader").load(CHAIN).await.unwrap();
        assert_eq!(shared.edge_count(), 6);
        assert_eq!(shared.node_count(), 12);
    }

    #[tokio::test]
    async fn works_against_filesystem_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let locks = Arc::new(InMemoryLockStore::new());
        let blobs = Arc::new(FsBlobStore::new(dir.path()));
        let shard = GraphSynchronizer::new(locks, blobs, Harness::config()).unwrap();

        shard
            .persist(&edge(1, 2), CHAIN, &NoPrune, &CancellationToken::new())
            .await
            .unwrap();
        assert!(dir.path().join("0xbot/sub_graph/1/test-table_SHARED_GRAPH").is_file());
        assert_eq!(shard.load(CHAIN).await.unwrap(), edge(1, 2));
    }
}
