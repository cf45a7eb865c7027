//! Reconciler configuration.

use std::time::Duration;

use folio_core::defaults::{
    ENV_FETCH_RATE_LIMIT, ENV_FETCH_RATE_WINDOW_SECS, ENV_SYNC_DEBOUNCE_MS, ENV_SYNC_ENABLED,
    FETCH_RATE_LIMIT, FETCH_RATE_WINDOW_SECS, SYNC_DEBOUNCE_MS,
};

/// Configuration for the annotation reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Whether outbound pushes are scheduled at all.
    pub enabled: bool,
    /// Quiet period before a push fires, in milliseconds.
    pub debounce_ms: u64,
    /// Mount-time fetches allowed per document per window. 0 disables the limit.
    pub fetch_rate_limit: u32,
    /// Window for `fetch_rate_limit`, in seconds.
    pub fetch_rate_window_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: SYNC_DEBOUNCE_MS,
            fetch_rate_limit: FETCH_RATE_LIMIT,
            fetch_rate_window_secs: FETCH_RATE_WINDOW_SECS,
        }
    }
}

impl SyncConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `FOLIO_SYNC_ENABLED` | `true` | Enable/disable outbound pushes |
    /// | `FOLIO_SYNC_DEBOUNCE_MS` | `3000` | Debounce window |
    /// | `FOLIO_FETCH_RATE_LIMIT` | `10` | Fetches per document per window (0 = unlimited) |
    /// | `FOLIO_FETCH_RATE_WINDOW_SECS` | `60` | Fetch rate window |
    pub fn from_env() -> Self {
        let enabled = std::env::var(ENV_SYNC_ENABLED)
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let debounce_ms = std::env::var(ENV_SYNC_DEBOUNCE_MS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(SYNC_DEBOUNCE_MS);

        let fetch_rate_limit = std::env::var(ENV_FETCH_RATE_LIMIT)
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(FETCH_RATE_LIMIT);

        let fetch_rate_window_secs = std::env::var(ENV_FETCH_RATE_WINDOW_SECS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(FETCH_RATE_WINDOW_SECS)
            .max(1);

        Self {
            enabled,
            debounce_ms,
            fetch_rate_limit,
            fetch_rate_window_secs,
        }
    }

    /// Set the debounce window.
    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    /// Enable or disable outbound pushes.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the fetch rate limit. A limit of 0 disables it.
    pub fn with_fetch_rate_limit(mut self, limit: u32, window_secs: u64) -> Self {
        self.fetch_rate_limit = limit;
        self.fetch_rate_window_secs = window_secs.max(1);
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn fetch_rate_window(&self) -> Duration {
        Duration::from_secs(self.fetch_rate_window_secs)
    }
}
