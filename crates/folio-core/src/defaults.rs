//! Centralized default constants for folio.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers.

// =============================================================================
// ANNOTATION SYNC
// =============================================================================

/// Quiet period before local annotation edits are pushed to the remote store.
pub const SYNC_DEBOUNCE_MS: u64 = 3_000;

/// Maximum mount-time remote fetches per document within one window.
pub const FETCH_RATE_LIMIT: u32 = 10;

/// Window for [`FETCH_RATE_LIMIT`], in seconds.
pub const FETCH_RATE_WINDOW_SECS: u64 = 60;

/// Broadcast channel capacity for sync events.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Timeout for a single remote request made by the HTTP client.
pub const REMOTE_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// EPUB PACKAGING
// =============================================================================

/// Media type declared for produced packages and stored in the `mimetype` entry.
pub const EPUB_MEDIA_TYPE: &str = "application/epub+zip";

/// Default `dc:language` of produced packages.
pub const EPUB_LANGUAGE: &str = "en";

/// Title used when the caller supplies an empty one.
pub const EPUB_UNTITLED: &str = "Untitled";

// =============================================================================
// ENVIRONMENT VARIABLES
// =============================================================================

/// Enables/disables outbound annotation pushes.
pub const ENV_SYNC_ENABLED: &str = "FOLIO_SYNC_ENABLED";

/// Overrides [`SYNC_DEBOUNCE_MS`].
pub const ENV_SYNC_DEBOUNCE_MS: &str = "FOLIO_SYNC_DEBOUNCE_MS";

/// Overrides [`FETCH_RATE_LIMIT`].
pub const ENV_FETCH_RATE_LIMIT: &str = "FOLIO_FETCH_RATE_LIMIT";

/// Overrides [`FETCH_RATE_WINDOW_SECS`].
pub const ENV_FETCH_RATE_WINDOW_SECS: &str = "FOLIO_FETCH_RATE_WINDOW_SECS";

/// Base URL of the remote annotation service.
pub const ENV_REMOTE_URL: &str = "FOLIO_REMOTE_URL";

/// Bearer token for the remote annotation service.
pub const ENV_REMOTE_TOKEN: &str = "FOLIO_REMOTE_TOKEN";
