//! Structured logging field name constants for folio.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log tooling can query by the same names across packaging and sync.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Invariant broken, requires attention |
//! | WARN  | Recoverable issue, fail-open fallback applied |
//! | INFO  | Completed pushes, produced packages, teardown |
//! | DEBUG | Decision points (debounce armed, push dropped, skipped) |
//! | TRACE | Per-record iteration during merge and parsing |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "epub", "sync", "cli"
pub const SUBSYSTEM: &str = "subsystem";

/// Logical operation name.
/// Examples: "package", "merge", "push", "fetch", "teardown"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Document whose annotations are being reconciled.
pub const DOCUMENT_ID: &str = "document_id";

/// Annotation anchor (CFI) being operated on.
pub const LOCATION_KEY: &str = "location_key";

/// Archive entry name.
pub const ENTRY_NAME: &str = "entry_name";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of annotation records involved.
pub const RECORD_COUNT: &str = "record_count";

/// Number of archive entries written or read.
pub const ENTRY_COUNT: &str = "entry_count";

/// Byte length of a produced or parsed buffer.
pub const BYTE_LEN: &str = "byte_len";

/// Debounce window in milliseconds.
pub const DEBOUNCE_MS: &str = "debounce_ms";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
