//! Sync lifecycle events.

/// Event emitted by the reconciler on its broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A debounced or teardown push started.
    PushStarted {
        document_id: String,
        record_count: usize,
    },
    /// The remote store accepted a push.
    PushCompleted {
        document_id: String,
        record_count: usize,
    },
    /// A push failed; local state is unchanged.
    PushFailed { document_id: String, error: String },
    /// A debounce fired while a push was in flight and was discarded.
    PushDropped { document_id: String },
    /// The user is not authenticated; nothing was pushed.
    PushSkipped { document_id: String },
    /// The mount-time fetch failed; local state was served instead.
    FetchFailed { document_id: String, error: String },
    /// The mount-time fetch was refused by the rate limiter.
    FetchRateLimited { document_id: String },
    /// A pending push was flushed during teardown.
    TeardownFlushed { document_id: String, success: bool },
}

impl SyncEvent {
    pub fn document_id(&self) -> &str {
        match self {
            SyncEvent::PushStarted { document_id, .. }
            | SyncEvent::PushCompleted { document_id, .. }
            | SyncEvent::PushFailed { document_id, .. }
            | SyncEvent::PushDropped { document_id }
            | SyncEvent::PushSkipped { document_id }
            | SyncEvent::FetchFailed { document_id, .. }
            | SyncEvent::FetchRateLimited { document_id }
            | SyncEvent::TeardownFlushed { document_id, .. } => document_id,
        }
    }
}
