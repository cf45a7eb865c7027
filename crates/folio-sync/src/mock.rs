//! Mock remote annotation client for deterministic testing.
//!
//! Records every call, serves a scripted remote set, and can fail, reject
//! or hold pushes so the reconciler's in-flight handling can be exercised.
//!
//! ## Usage
//!
//! ```rust
//! use folio_sync::mock::MockRemoteClient;
//!
//! let remote = MockRemoteClient::new().with_failing_fetches();
//! assert_eq!(remote.push_count(), 0);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use folio_core::{
    AnnotationRecord, AuthProvider, Error, PushOutcome, RemoteAnnotationClient, Result,
};

/// Mock remote store for testing.
#[derive(Clone, Default)]
pub struct MockRemoteClient {
    state: Arc<Mutex<MockState>>,
    release: Arc<Notify>,
}

#[derive(Debug, Default)]
struct MockState {
    remote: HashMap<String, Vec<AnnotationRecord>>,
    pushes: Vec<MockPush>,
    deletes: Vec<(String, String)>,
    fetch_calls: usize,
    fail_fetches: bool,
    fail_pushes: bool,
    reject_pushes: bool,
    hold_next_push: bool,
    authenticated: bool,
}

/// One recorded push call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockPush {
    pub document_id: String,
    pub records: Vec<AnnotationRecord>,
}

impl MockRemoteClient {
    /// Create an authenticated mock with an empty remote set.
    pub fn new() -> Self {
        let mock = Self::default();
        mock.state().authenticated = true;
        mock
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed the remote set of a document.
    pub fn with_remote(self, document_id: &str, records: Vec<AnnotationRecord>) -> Self {
        self.state().remote.insert(document_id.to_string(), records);
        self
    }

    /// Make every fetch fail.
    pub fn with_failing_fetches(self) -> Self {
        self.state().fail_fetches = true;
        self
    }

    /// Report this mock as signed out when used as an [`AuthProvider`].
    pub fn signed_out(self) -> Self {
        self.state().authenticated = false;
        self
    }

    /// Make pushes fail (`true`) or succeed again (`false`).
    pub fn set_failing_pushes(&self, fail: bool) {
        self.state().fail_pushes = fail;
    }

    /// Make pushes return `success: false`.
    pub fn set_rejecting_pushes(&self, reject: bool) {
        self.state().reject_pushes = reject;
    }

    /// Keep the next push in flight until [`release_push`](Self::release_push).
    pub fn hold_next_push(&self) {
        self.state().hold_next_push = true;
    }

    /// Let a held push resolve.
    pub fn release_push(&self) {
        self.release.notify_one();
    }

    /// Number of push calls received, including held and failed ones.
    pub fn push_count(&self) -> usize {
        self.state().pushes.len()
    }

    pub fn pushes(&self) -> Vec<MockPush> {
        self.state().pushes.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.state().fetch_calls
    }

    pub fn deletes(&self) -> Vec<(String, String)> {
        self.state().deletes.clone()
    }

    /// Current remote set of a document.
    pub fn remote_records(&self, document_id: &str) -> Vec<AnnotationRecord> {
        self.state()
            .remote
            .get(document_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RemoteAnnotationClient for MockRemoteClient {
    async fn fetch(&self, document_id: &str) -> Result<Vec<AnnotationRecord>> {
        let mut state = self.state();
        state.fetch_calls += 1;
        if state.fail_fetches {
            return Err(Error::RemoteFetch("mock fetch failure".to_string()));
        }
        Ok(state.remote.get(document_id).cloned().unwrap_or_default())
    }

    async fn push(&self, document_id: &str, records: &[AnnotationRecord]) -> Result<PushOutcome> {
        let hold = {
            let mut state = self.state();
            state.pushes.push(MockPush {
                document_id: document_id.to_string(),
                records: records.to_vec(),
            });
            std::mem::take(&mut state.hold_next_push)
        };

        if hold {
            self.release.notified().await;
        }

        let mut state = self.state();
        if state.fail_pushes {
            return Err(Error::Request("mock push failure".to_string()));
        }
        if state.reject_pushes {
            return Ok(PushOutcome::rejected());
        }

        // Idempotent by location key: re-pushing a record replaces it.
        let remote = state.remote.entry(document_id.to_string()).or_default();
        for record in records {
            match remote
                .iter_mut()
                .find(|r| r.location_key == record.location_key)
            {
                Some(existing) => *existing = record.clone(),
                None => remote.push(record.clone()),
            }
        }
        Ok(PushOutcome::ok())
    }

    async fn delete(&self, document_id: &str, location_key: &str) -> Result<()> {
        let mut state = self.state();
        state
            .deletes
            .push((document_id.to_string(), location_key.to_string()));
        if let Some(remote) = state.remote.get_mut(document_id) {
            remote.retain(|r| r.location_key != location_key);
        }
        Ok(())
    }
}

impl AuthProvider for MockRemoteClient {
    fn is_authenticated(&self) -> bool {
        self.state().authenticated
    }
}
