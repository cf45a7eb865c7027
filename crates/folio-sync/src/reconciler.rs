//! Per-document annotation reconciliation and debounced sync.
//!
//! Each document moves through `Idle -> Pending -> Syncing -> Idle`:
//!
//! - [`AnnotationReconciler::schedule_sync`] (re)arms a debounce timer; every
//!   call before it fires cancels and restarts it.
//! - When the timer fires the complete local set is pushed. At most one push
//!   per document is in flight; a timer firing while one is in flight is
//!   dropped, not queued. The next edit re-arms normally.
//! - [`AnnotationReconciler::teardown`] cancels pending timers and pushes
//!   immediately instead. In-flight pushes are never aborted.
//!
//! Remote failures are caught here, logged and reported as [`SyncEvent`]s;
//! local state is never rolled back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::{broadcast, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use folio_core::defaults::EVENT_BUS_CAPACITY;
use folio_core::{
    ActionRateLimiter, AnnotationRecord, AnnotationStore, AuthProvider, Error,
    RemoteAnnotationClient, Result,
};

use crate::config::SyncConfig;
use crate::events::SyncEvent;
use crate::merge::merge;

/// Observable sync state of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Nothing scheduled, nothing in flight.
    Idle,
    /// Debounce timer armed.
    Pending,
    /// A push is in flight. Takes precedence over an armed timer.
    Syncing,
}

/// Outcome of [`AnnotationReconciler::teardown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Pending pushes flushed successfully.
    pub flushed: usize,
    /// Flushes that failed; the failure is swallowed.
    pub failed: usize,
    /// Pending timers cancelled without a flush because a push was in flight.
    pub skipped: usize,
}

#[derive(Default)]
struct DocumentSync {
    timer: Option<JoinHandle<()>>,
    /// Set from a reconciler-wide counter whenever the timer is re-armed; a
    /// fired timer whose generation is stale has been superseded.
    generation: u64,
    in_flight: bool,
}

/// Why a push was requested.
#[derive(Debug, Clone, Copy)]
enum Trigger {
    Timer { generation: u64 },
    Flush,
}

enum Claim {
    Claimed,
    Superseded,
    Busy,
}

struct Inner {
    store: Arc<dyn AnnotationStore>,
    remote: Arc<dyn RemoteAnnotationClient>,
    auth: Arc<dyn AuthProvider>,
    config: SyncConfig,
    /// Only documents with an armed timer or a push in flight have an entry.
    documents: Mutex<HashMap<String, DocumentSync>>,
    next_generation: AtomicU64,
    write_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    fetch_limiter: Option<ActionRateLimiter>,
    event_tx: broadcast::Sender<SyncEvent>,
}

/// Reconciles local and remote annotations and schedules outbound pushes.
///
/// Cheap to clone; clones share state. Scheduling spawns Tokio tasks, so the
/// reconciler must be used from within a Tokio runtime.
#[derive(Clone)]
pub struct AnnotationReconciler {
    inner: Arc<Inner>,
}

impl AnnotationReconciler {
    pub fn new(
        store: Arc<dyn AnnotationStore>,
        remote: Arc<dyn RemoteAnnotationClient>,
        auth: Arc<dyn AuthProvider>,
        config: SyncConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let fetch_limiter = (config.fetch_rate_limit > 0).then(|| {
            ActionRateLimiter::new(config.fetch_rate_limit, config.fetch_rate_window())
        });
        Self {
            inner: Arc::new(Inner {
                store,
                remote,
                auth,
                config,
                documents: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                write_locks: Mutex::new(HashMap::new()),
                fetch_limiter,
                event_tx,
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Get a receiver for sync events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Current phase of `document_id`.
    pub fn phase(&self, document_id: &str) -> SyncPhase {
        let documents = lock(&self.inner.documents);
        match documents.get(document_id) {
            Some(state) if state.in_flight => SyncPhase::Syncing,
            Some(state) if state.timer.is_some() => SyncPhase::Pending,
            _ => SyncPhase::Idle,
        }
    }

    /// Clear the mount-time fetch counters.
    pub fn reset_rate_limits(&self) {
        if let Some(limiter) = &self.inner.fetch_limiter {
            limiter.reset();
        }
    }

    /// Arm (or re-arm) the debounce timer for `document_id`.
    ///
    /// When the timer fires uninterrupted, the complete local set is pushed.
    /// The deadline counts from this call. Fails with [`Error::Config`] when
    /// called outside a Tokio runtime.
    pub fn schedule_sync(&self, document_id: &str) -> Result<()> {
        validate_document_id(document_id)?;
        if !self.inner.config.enabled {
            debug!(document_id, "Sync disabled, not scheduling push");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Config(format!("scheduling a sync needs a Tokio runtime: {}", e)))?;
        let deadline = tokio::time::Instant::now() + self.inner.config.debounce();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);

        let mut documents = lock(&self.inner.documents);
        let state = documents.entry(document_id.to_string()).or_default();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation = generation;

        let inner = Arc::clone(&self.inner);
        let document = document_id.to_string();
        state.timer = Some(runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            inner.fire(&document, generation).await;
        }));

        debug!(
            document_id,
            debounce_ms = self.inner.config.debounce_ms,
            generation,
            "Debounce armed"
        );
        Ok(())
    }

    /// Mount-time reconciliation: read local, fetch remote, merge, write back.
    ///
    /// Fails open: when unauthenticated, rate limited, or the fetch fails,
    /// the local set is returned untouched. Only local store failures and an
    /// invalid document id are returned as errors.
    #[instrument(skip(self), fields(subsystem = "sync", op = "load"))]
    pub async fn load(&self, document_id: &str) -> Result<Vec<AnnotationRecord>> {
        validate_document_id(document_id)?;
        let _guard = self.inner.lock_document(document_id).await;

        let local = self.inner.store.get(document_id).await?;
        if !self.inner.auth.is_authenticated() {
            debug!(document_id, "Not authenticated, serving local annotations");
            return Ok(local);
        }

        if let Some(limiter) = &self.inner.fetch_limiter {
            if !limiter.try_acquire(document_id) {
                debug!(document_id, "Fetch rate limited, serving local annotations");
                self.inner.emit(SyncEvent::FetchRateLimited {
                    document_id: document_id.to_string(),
                });
                return Ok(local);
            }
        }

        let start = Instant::now();
        let remote = match self.inner.remote.fetch(document_id).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(
                    document_id,
                    error = %e,
                    "Annotation fetch failed, serving local annotations"
                );
                self.inner.emit(SyncEvent::FetchFailed {
                    document_id: document_id.to_string(),
                    error: e.to_string(),
                });
                return Ok(local);
            }
        };

        let (remote, foreign): (Vec<_>, Vec<_>) = remote
            .into_iter()
            .partition(|r| r.document_id == document_id);
        if !foreign.is_empty() {
            warn!(
                document_id,
                record_count = foreign.len(),
                "Ignoring fetched annotations that belong to another document"
            );
        }

        let merged = merge(&local, &remote);
        self.inner.store.put(document_id, merged.clone()).await?;

        info!(
            document_id,
            local = local.len(),
            remote = remote.len(),
            record_count = merged.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Annotations reconciled"
        );
        Ok(merged)
    }

    /// Local edit: store `record` (replacing any record at the same location)
    /// and schedule a push.
    pub async fn upsert(&self, document_id: &str, record: AnnotationRecord) -> Result<()> {
        validate_document_id(document_id)?;
        if record.document_id != document_id {
            return Err(Error::InvalidInput(format!(
                "annotation {} belongs to document '{}', not '{}'",
                record.id, record.document_id, document_id
            )));
        }

        {
            let _guard = self.inner.lock_document(document_id).await;
            let mut records = self.inner.store.get(document_id).await?;
            match records
                .iter_mut()
                .find(|r| r.location_key == record.location_key)
            {
                Some(existing) => *existing = record,
                None => records.push(record),
            }
            self.inner.store.put(document_id, records).await?;
        }

        self.schedule_sync(document_id)
    }

    /// Delete the annotation at `location_key` locally, then ask the remote
    /// store to delete it too (best effort).
    ///
    /// Returns whether a local record was removed.
    pub async fn remove(&self, document_id: &str, location_key: &str) -> Result<bool> {
        validate_document_id(document_id)?;
        if location_key.trim().is_empty() {
            return Err(Error::InvalidInput("location key is empty".to_string()));
        }

        let removed = {
            let _guard = self.inner.lock_document(document_id).await;
            let mut records = self.inner.store.get(document_id).await?;
            let before = records.len();
            records.retain(|r| r.location_key != location_key);
            let removed = records.len() != before;
            if removed {
                self.inner.store.put(document_id, records).await?;
            }
            removed
        };

        if self.inner.auth.is_authenticated() {
            if let Err(e) = self.inner.remote.delete(document_id, location_key).await {
                warn!(
                    document_id,
                    location_key,
                    error = %e,
                    "Remote annotation delete failed"
                );
            }
        }
        Ok(removed)
    }

    /// Cancel every pending debounce and push those documents immediately.
    ///
    /// Failures are swallowed. Documents with a push in flight only have their
    /// timer cancelled; the in-flight push is left to complete.
    pub async fn teardown(&self) -> TeardownReport {
        let pending: Vec<String> = {
            let documents = lock(&self.inner.documents);
            documents
                .iter()
                .filter(|(_, state)| state.timer.is_some())
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut report = TeardownReport::default();
        for document_id in pending {
            let single = self.teardown_document(&document_id).await;
            report.flushed += single.flushed;
            report.failed += single.failed;
            report.skipped += single.skipped;
        }

        info!(
            flushed = report.flushed,
            failed = report.failed,
            skipped = report.skipped,
            "Annotation sync torn down"
        );
        report
    }

    /// [`teardown`](Self::teardown) for a single document.
    pub async fn teardown_document(&self, document_id: &str) -> TeardownReport {
        let mut report = TeardownReport::default();
        match self.inner.claim(document_id, Trigger::Flush) {
            Claim::Claimed => {
                let result = self.inner.push(document_id).await;
                self.inner.release(document_id);
                let success = result.is_ok();
                if let Err(e) = result {
                    debug!(document_id, error = %e, "Teardown flush failed");
                    report.failed += 1;
                } else {
                    report.flushed += 1;
                }
                self.inner.emit(SyncEvent::TeardownFlushed {
                    document_id: document_id.to_string(),
                    success,
                });
            }
            Claim::Busy => report.skipped += 1,
            Claim::Superseded => {}
        }
        report
    }
}

impl Inner {
    fn emit(&self, event: SyncEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Exclusive access to a document's local set for a read-modify-write.
    async fn lock_document<'a>(&'a self, document_id: &'a str) -> DocumentWriteGuard<'a> {
        let mutex = {
            let mut locks = lock(&self.write_locks);
            Arc::clone(locks.entry(document_id.to_string()).or_default())
        };
        DocumentWriteGuard {
            inner: self,
            document_id,
            guard: Some(mutex.lock_owned().await),
        }
    }

    /// Timer callback.
    async fn fire(&self, document_id: &str, generation: u64) {
        match self.claim(document_id, Trigger::Timer { generation }) {
            Claim::Claimed => {}
            Claim::Superseded => return,
            Claim::Busy => {
                debug!(document_id, "Push already in flight, dropping debounced push");
                self.emit(SyncEvent::PushDropped {
                    document_id: document_id.to_string(),
                });
                return;
            }
        }

        let result = self.push(document_id).await;
        self.release(document_id);
        if let Err(e) = result {
            warn!(
                document_id,
                error = %e,
                "Annotation push failed, local state kept; next edit retries"
            );
        }
    }

    /// Take ownership of the document's single push slot.
    ///
    /// A timer trigger must still be current. A flush cancels whatever timer
    /// is armed. Either way the timer slot is cleared before the push starts,
    /// so re-arming can never abort a push that is already running.
    fn claim(&self, document_id: &str, trigger: Trigger) -> Claim {
        let mut documents = lock(&self.documents);
        let Some(state) = documents.get_mut(document_id) else {
            return Claim::Superseded;
        };

        match trigger {
            Trigger::Timer { generation } => {
                if state.generation != generation {
                    return Claim::Superseded;
                }
                // Dropping our own handle detaches; it does not abort this task.
                state.timer = None;
            }
            Trigger::Flush => match state.timer.take() {
                Some(timer) => timer.abort(),
                None => return Claim::Superseded,
            },
        }

        if state.in_flight {
            return Claim::Busy;
        }
        state.in_flight = true;
        Claim::Claimed
    }

    /// Give the push slot back, dropping the entry once nothing is pending.
    fn release(&self, document_id: &str) {
        let mut documents = lock(&self.documents);
        if let Some(state) = documents.get_mut(document_id) {
            state.in_flight = false;
            if state.timer.is_none() {
                documents.remove(document_id);
            }
        }
    }

    #[cfg(test)]
    fn tracked_documents(&self) -> usize {
        lock(&self.documents).len() + lock(&self.write_locks).len()
    }

    /// Push the complete local set. Errors are reported, never rolled back.
    async fn push(&self, document_id: &str) -> Result<usize> {
        if !self.auth.is_authenticated() {
            debug!(document_id, "Not authenticated, skipping push");
            self.emit(SyncEvent::PushSkipped {
                document_id: document_id.to_string(),
            });
            return Ok(0);
        }

        let result = self.push_local_set(document_id).await;
        if let Err(ref e) = result {
            self.emit(SyncEvent::PushFailed {
                document_id: document_id.to_string(),
                error: e.to_string(),
            });
        }
        result
    }

    async fn push_local_set(&self, document_id: &str) -> Result<usize> {
        let records = self.store.get(document_id).await?;
        let record_count = records.len();
        self.emit(SyncEvent::PushStarted {
            document_id: document_id.to_string(),
            record_count,
        });

        let start = Instant::now();
        let outcome = self
            .remote
            .push(document_id, &records)
            .await
            .map_err(|e| Error::RemoteSync(e.to_string()))?;
        if !outcome.success {
            return Err(Error::RemoteSync(
                "remote store rejected the push".to_string(),
            ));
        }

        info!(
            document_id,
            record_count,
            duration_ms = start.elapsed().as_millis() as u64,
            "Annotations pushed"
        );
        self.emit(SyncEvent::PushCompleted {
            document_id: document_id.to_string(),
            record_count,
        });
        Ok(record_count)
    }
}

/// Held for a document read-modify-write. On drop the per-document lock is
/// removed from the map unless another task is waiting for it.
struct DocumentWriteGuard<'a> {
    inner: &'a Inner,
    document_id: &'a str,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DocumentWriteGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = lock(&self.inner.write_locks);
        if locks
            .get(self.document_id)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(self.document_id);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn validate_document_id(document_id: &str) -> Result<()> {
    if document_id.trim().is_empty() {
        return Err(Error::InvalidInput("document id is empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRemoteClient;
    use crate::store::MemoryAnnotationStore;
    use std::time::Duration;

    const DOC: &str = "book-1";

    fn record(id: &str, key: &str, updated_at: i64) -> AnnotationRecord {
        let mut r = AnnotationRecord::new(DOC, key, id).with_timestamps(0, updated_at);
        r.id = id.to_string();
        r
    }

    fn reconciler(
        store: Arc<MemoryAnnotationStore>,
        remote: Arc<MockRemoteClient>,
        config: SyncConfig,
    ) -> AnnotationReconciler {
        AnnotationReconciler::new(store, remote.clone(), remote, config)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn drain(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_load_merges_and_writes_back() {
        let store = Arc::new(MemoryAnnotationStore::with_records(
            DOC,
            vec![record("L-a", "cfi-a", 5), record("L-b", "cfi-b", 9)],
        ));
        let remote = Arc::new(MockRemoteClient::new().with_remote(
            DOC,
            vec![record("R-a", "cfi-a", 7), record("R-b", "cfi-b", 9), record("R-c", "cfi-c", 1)],
        ));
        let reconciler = reconciler(store.clone(), remote, SyncConfig::default());

        let merged = reconciler.load(DOC).await.unwrap();
        let ids: Vec<_> = merged.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["R-a", "L-b", "R-c"]);
        assert_eq!(store.get(DOC).await.unwrap(), merged);
    }

    #[tokio::test]
    async fn test_load_fails_open_on_fetch_error() {
        let local = vec![record("L-a", "cfi-a", 5)];
        let store = Arc::new(MemoryAnnotationStore::with_records(DOC, local.clone()));
        let remote = Arc::new(MockRemoteClient::new().with_failing_fetches());
        let reconciler = reconciler(store.clone(), remote.clone(), SyncConfig::default());
        let mut events = reconciler.subscribe();

        assert_eq!(reconciler.load(DOC).await.unwrap(), local);
        assert_eq!(remote.fetch_count(), 1);
        assert!(matches!(
            drain(&mut events).as_slice(),
            [SyncEvent::FetchFailed { .. }]
        ));
    }

    #[tokio::test]
    async fn test_load_unauthenticated_is_pass_through() {
        let local = vec![record("L-a", "cfi-a", 5)];
        let store = Arc::new(MemoryAnnotationStore::with_records(DOC, local.clone()));
        let remote = Arc::new(
            MockRemoteClient::new()
                .with_remote(DOC, vec![record("R-b", "cfi-b", 1)])
                .signed_out(),
        );
        let reconciler = reconciler(store, remote.clone(), SyncConfig::default());

        assert_eq!(reconciler.load(DOC).await.unwrap(), local);
        assert_eq!(remote.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_load_ignores_foreign_records() {
        let store = Arc::new(MemoryAnnotationStore::new());
        let mut foreign = record("X", "cfi-x", 1);
        foreign.document_id = "another-book".to_string();
        let remote = Arc::new(
            MockRemoteClient::new().with_remote(DOC, vec![foreign, record("R", "cfi-a", 1)]),
        );
        let reconciler = reconciler(store, remote, SyncConfig::default());

        let merged = reconciler.load(DOC).await.unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "R");
    }

    #[tokio::test]
    async fn test_load_rate_limited_serves_local() {
        let store = Arc::new(MemoryAnnotationStore::new());
        let remote = Arc::new(MockRemoteClient::new());
        let config = SyncConfig::default().with_fetch_rate_limit(1, 60);
        let reconciler = reconciler(store, remote.clone(), config);

        reconciler.load(DOC).await.unwrap();
        reconciler.load(DOC).await.unwrap();
        assert_eq!(remote.fetch_count(), 1);

        reconciler.reset_rate_limits();
        reconciler.load(DOC).await.unwrap();
        assert_eq!(remote.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_rejects_empty_document_id() {
        let reconciler = reconciler(
            Arc::new(MemoryAnnotationStore::new()),
            Arc::new(MockRemoteClient::new()),
            SyncConfig::default(),
        );
        assert!(matches!(reconciler.schedule_sync(""), Err(Error::InvalidInput(_))));
        assert!(matches!(reconciler.load("  ").await, Err(Error::InvalidInput(_))));
        assert!(reconciler.remove("", "cfi-a").await.is_err());
    }

    #[tokio::test]
    async fn test_upsert_rejects_other_document() {
        let reconciler = reconciler(
            Arc::new(MemoryAnnotationStore::new()),
            Arc::new(MockRemoteClient::new()),
            SyncConfig::default(),
        );
        let record = AnnotationRecord::new("other", "cfi-a", "x");
        assert!(matches!(
            reconciler.upsert(DOC, record).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upsert_replaces_by_location_and_pushes() {
        let store = Arc::new(MemoryAnnotationStore::new());
        let remote = Arc::new(MockRemoteClient::new());
        let reconciler = reconciler(store.clone(), remote.clone(), SyncConfig::default());

        reconciler.upsert(DOC, record("first", "cfi-a", 1)).await.unwrap();
        reconciler.upsert(DOC, record("edited", "cfi-a", 2)).await.unwrap();
        assert_eq!(reconciler.phase(DOC), SyncPhase::Pending);

        let stored = store.get(DOC).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, "edited");

        tokio::time::sleep(Duration::from_millis(3_001)).await;
        settle().await;
        assert_eq!(remote.push_count(), 1);
        assert_eq!(remote.pushes()[0].records, stored);
        assert_eq!(reconciler.phase(DOC), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn test_remove_deletes_locally_and_remotely() {
        let store = Arc::new(MemoryAnnotationStore::with_records(
            DOC,
            vec![record("a", "cfi-a", 1), record("b", "cfi-b", 1)],
        ));
        let remote = Arc::new(MockRemoteClient::new());
        let reconciler = reconciler(store.clone(), remote.clone(), SyncConfig::default());

        assert!(reconciler.remove(DOC, "cfi-a").await.unwrap());
        assert!(!reconciler.remove(DOC, "cfi-missing").await.unwrap());

        let remaining = store.get(DOC).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].location_key, "cfi-b");
        assert_eq!(remote.deletes().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_config_never_schedules() {
        let remote = Arc::new(MockRemoteClient::new());
        let reconciler = reconciler(
            Arc::new(MemoryAnnotationStore::new()),
            remote.clone(),
            SyncConfig::default().with_enabled(false),
        );

        reconciler.schedule_sync(DOC).unwrap();
        assert_eq!(reconciler.phase(DOC), SyncPhase::Idle);
        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(remote.push_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthenticated_push_is_skipped() {
        let remote = Arc::new(MockRemoteClient::new().signed_out());
        let reconciler = reconciler(
            Arc::new(MemoryAnnotationStore::new()),
            remote.clone(),
            SyncConfig::default(),
        );
        let mut events = reconciler.subscribe();

        reconciler.schedule_sync(DOC).unwrap();
        tokio::time::sleep(Duration::from_millis(3_001)).await;
        settle().await;

        assert_eq!(remote.push_count(), 0);
        assert_eq!(
            drain(&mut events),
            vec![SyncEvent::PushSkipped {
                document_id: DOC.to_string()
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_failure_keeps_local_state_and_next_edit_retries() {
        let local = vec![record("a", "cfi-a", 1)];
        let store = Arc::new(MemoryAnnotationStore::with_records(DOC, local.clone()));
        let remote = Arc::new(MockRemoteClient::new());
        remote.set_failing_pushes(true);
        let reconciler = reconciler(store.clone(), remote.clone(), SyncConfig::default());
        let mut events = reconciler.subscribe();

        reconciler.schedule_sync(DOC).unwrap();
        tokio::time::sleep(Duration::from_millis(3_001)).await;
        settle().await;

        assert_eq!(remote.push_count(), 1);
        assert_eq!(store.get(DOC).await.unwrap(), local);
        assert_eq!(reconciler.phase(DOC), SyncPhase::Idle);
        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, SyncEvent::PushFailed { .. })));

        remote.set_failing_pushes(false);
        reconciler.schedule_sync(DOC).unwrap();
        tokio::time::sleep(Duration::from_millis(3_001)).await;
        settle().await;
        assert_eq!(remote.push_count(), 2);
        assert_eq!(remote.remote_records(DOC), local);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_push_is_a_failure() {
        let remote = Arc::new(MockRemoteClient::new());
        remote.set_rejecting_pushes(true);
        let reconciler = reconciler(
            Arc::new(MemoryAnnotationStore::new()),
            remote.clone(),
            SyncConfig::default(),
        );
        let mut events = reconciler.subscribe();

        reconciler.schedule_sync(DOC).unwrap();
        tokio::time::sleep(Duration::from_millis(3_001)).await;
        settle().await;

        let events = drain(&mut events);
        assert!(events
            .iter()
            .any(|e| matches!(e, SyncEvent::PushFailed { error, .. } if error.contains("rejected"))));
        assert!(!events
            .iter()
            .any(|e| matches!(e, SyncEvent::PushCompleted { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_flushes_pending_instead_of_waiting() {
        let store = Arc::new(MemoryAnnotationStore::with_records(
            DOC,
            vec![record("a", "cfi-a", 1)],
        ));
        let remote = Arc::new(MockRemoteClient::new());
        let reconciler = reconciler(store, remote.clone(), SyncConfig::default());

        reconciler.schedule_sync(DOC).unwrap();
        reconciler.schedule_sync("book-2").unwrap();

        let report = reconciler.teardown().await;
        assert_eq!(
            report,
            TeardownReport {
                flushed: 2,
                failed: 0,
                skipped: 0
            }
        );
        assert_eq!(remote.push_count(), 2);
        assert_eq!(reconciler.phase(DOC), SyncPhase::Idle);

        // The cancelled timers never fire.
        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(remote.push_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_swallows_flush_failure() {
        let remote = Arc::new(MockRemoteClient::new());
        remote.set_failing_pushes(true);
        let reconciler = reconciler(
            Arc::new(MemoryAnnotationStore::new()),
            remote.clone(),
            SyncConfig::default(),
        );

        reconciler.schedule_sync(DOC).unwrap();
        let report = reconciler.teardown().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.flushed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_without_pending_is_noop() {
        let remote = Arc::new(MockRemoteClient::new());
        let reconciler = reconciler(
            Arc::new(MemoryAnnotationStore::new()),
            remote.clone(),
            SyncConfig::default(),
        );
        assert_eq!(reconciler.teardown().await, TeardownReport::default());
        assert_eq!(remote.push_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_counts_from_schedule_call() {
        let remote = Arc::new(MockRemoteClient::new());
        let reconciler = reconciler(
            Arc::new(MemoryAnnotationStore::new()),
            remote.clone(),
            SyncConfig::default(),
        );

        // The timer task has not been polled yet when the clock moves.
        reconciler.schedule_sync(DOC).unwrap();
        tokio::time::advance(Duration::from_millis(3_000)).await;
        settle().await;
        assert_eq!(remote.push_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_documents_are_forgotten() {
        let store = Arc::new(MemoryAnnotationStore::new());
        let remote = Arc::new(MockRemoteClient::new());
        let reconciler = reconciler(store, remote.clone(), SyncConfig::default());

        reconciler.load(DOC).await.unwrap();
        reconciler.upsert(DOC, record("a", "cfi-a", 1)).await.unwrap();
        reconciler.remove("book-2", "cfi-x").await.unwrap();
        assert_eq!(reconciler.inner.tracked_documents(), 1);

        tokio::time::sleep(Duration::from_millis(3_001)).await;
        settle().await;
        assert_eq!(remote.push_count(), 1);
        assert_eq!(reconciler.inner.tracked_documents(), 0);

        reconciler.schedule_sync(DOC).unwrap();
        reconciler.teardown().await;
        assert_eq!(reconciler.inner.tracked_documents(), 0);
    }

    #[tokio::test]
    async fn test_remove_rejects_empty_location_key() {
        let remote = Arc::new(MockRemoteClient::new());
        let reconciler = reconciler(
            Arc::new(MemoryAnnotationStore::new()),
            remote.clone(),
            SyncConfig::default(),
        );
        assert!(matches!(
            reconciler.remove(DOC, " ").await,
            Err(Error::InvalidInput(_))
        ));
        assert!(remote.deletes().is_empty());
    }

    #[test]
    fn test_schedule_outside_runtime_is_an_error() {
        let remote = Arc::new(MockRemoteClient::new());
        let reconciler = reconciler(
            Arc::new(MemoryAnnotationStore::new()),
            remote,
            SyncConfig::default(),
        );
        assert!(matches!(reconciler.schedule_sync(DOC), Err(Error::Config(_))));
        assert_eq!(reconciler.phase(DOC), SyncPhase::Idle);
    }
}
