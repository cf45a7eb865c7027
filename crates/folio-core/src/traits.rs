//! Collaborator traits for annotation reconciliation.
//!
//! These traits define the interfaces the reconciler is written against,
//! enabling pluggable local stores and remote clients and keeping the sync
//! state machine testable without a network.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::AnnotationRecord;

/// Outcome reported by the remote store for a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOutcome {
    pub success: bool,
}

impl PushOutcome {
    pub fn ok() -> Self {
        Self { success: true }
    }

    pub fn rejected() -> Self {
        Self { success: false }
    }
}

/// On-device annotation storage, keyed by document.
///
/// Assumed always available. Implementations replace the full set on `put`.
#[async_trait]
pub trait AnnotationStore: Send + Sync {
    /// All local records for a document (empty when none are stored).
    async fn get(&self, document_id: &str) -> Result<Vec<AnnotationRecord>>;

    /// Replace the local records for a document.
    async fn put(&self, document_id: &str, records: Vec<AnnotationRecord>) -> Result<()>;
}

/// Server-held annotation storage.
#[async_trait]
pub trait RemoteAnnotationClient: Send + Sync {
    /// Fetch the remote set for a document.
    async fn fetch(&self, document_id: &str) -> Result<Vec<AnnotationRecord>>;

    /// Push the complete local set. Must be idempotent keyed by `location_key`.
    async fn push(&self, document_id: &str, records: &[AnnotationRecord]) -> Result<PushOutcome>;

    /// Delete one annotation by its location key.
    async fn delete(&self, document_id: &str, location_key: &str) -> Result<()>;
}

/// Gate deciding whether remote calls are attempted at all.
pub trait AuthProvider: Send + Sync {
    fn is_authenticated(&self) -> bool;
}

/// Fixed authentication state.
#[derive(Debug, Clone, Copy)]
pub struct StaticAuth(pub bool);

impl AuthProvider for StaticAuth {
    fn is_authenticated(&self) -> bool {
        self.0
    }
}
