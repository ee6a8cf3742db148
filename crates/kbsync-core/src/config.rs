#![forbid(unsafe_code)]

//! Engine configuration.
//!
//! [`SyncConfig`] is an immutable record handed to the engine at
//! construction. Builders consume and return the record; nothing mutates a
//! live configuration.
//!
//! # Defaults
//!
//! | Setting | Default | Range | Description |
//! |---------|---------|-------|-------------|
//! | `get_text_limit` | 1000 | 16-100000 | Largest read the host answers in full |
//! | `extract_monitor_text_limit` | 1000 | 16-100000 | Window size for extracted-text monitoring |
//! | `probe_window` | 200 | 2-100000 | Window requested when probing the selection |
//! | `lost_update_timeout` | 500ms | 50-10000ms | Watchdog deadline for a missing confirmation |
//! | `monitor_extracted_text` | false | | Expect extracted-text confirmations |
//! | `retain_composition_on_cursor_backtrack` | false | | See below |
//!
//! # Environment Variables
//!
//! | Variable | Type |
//! |----------|------|
//! | `KBSYNC_GET_TEXT_LIMIT` | usize |
//! | `KBSYNC_EXTRACT_MONITOR_TEXT_LIMIT` | usize |
//! | `KBSYNC_PROBE_WINDOW` | usize |
//! | `KBSYNC_LOST_UPDATE_TIMEOUT_MS` | u64 |
//! | `KBSYNC_MONITOR_EXTRACTED_TEXT` | bool |
//! | `KBSYNC_RETAIN_COMPOSITION_ON_CURSOR_BACKTRACK` | bool |
//!
//! # Cursor backtracking
//!
//! When an external change only moves the cursor and the probed text still
//! matches the cache, the composition bounds may still be right, but the
//! host is free to have finished the composition. With
//! `retain_composition_on_cursor_backtrack` the engine keeps the possibly
//! stale composition; without it the composition becomes unknown.

use web_time::Duration;

pub const DEFAULT_GET_TEXT_LIMIT: usize = 1000;
pub const MIN_TEXT_LIMIT: usize = 16;
pub const MAX_TEXT_LIMIT: usize = 100_000;

pub const DEFAULT_EXTRACT_MONITOR_TEXT_LIMIT: usize = 1000;

pub const DEFAULT_PROBE_WINDOW: usize = 200;
pub const MIN_PROBE_WINDOW: usize = 2;

pub const DEFAULT_LOST_UPDATE_TIMEOUT_MS: u64 = 500;
pub const MIN_LOST_UPDATE_TIMEOUT_MS: u64 = 50;
pub const MAX_LOST_UPDATE_TIMEOUT_MS: u64 = 10_000;

/// Engine configuration record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Largest length the host is known to answer in one `getText*` call.
    pub get_text_limit: usize,
    /// Window requested when asking the host to monitor extracted text.
    pub extract_monitor_text_limit: usize,
    /// Window requested by selection probes.
    pub probe_window: usize,
    /// Deadline after which a missing confirmation forces a resync.
    pub lost_update_timeout: Duration,
    /// Whether extracted-text updates are expected for text changes.
    pub monitor_extracted_text: bool,
    /// Keep a possibly stale composition when only the cursor moved.
    ///
    /// Off by default. The host may have finished the composition without
    /// telling us, and edits aimed at stale bounds would land on committed
    /// text. An unknown composition only costs a reload.
    pub retain_composition_on_cursor_backtrack: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            get_text_limit: DEFAULT_GET_TEXT_LIMIT,
            extract_monitor_text_limit: DEFAULT_EXTRACT_MONITOR_TEXT_LIMIT,
            probe_window: DEFAULT_PROBE_WINDOW,
            lost_update_timeout: Duration::from_millis(DEFAULT_LOST_UPDATE_TIMEOUT_MS),
            monitor_extracted_text: false,
            retain_composition_on_cursor_backtrack: false,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn with_get_text_limit(mut self, limit: usize) -> Self {
        self.get_text_limit = limit;
        self
    }

    #[must_use]
    pub fn with_extract_monitor_text_limit(mut self, limit: usize) -> Self {
        self.extract_monitor_text_limit = limit;
        self
    }

    #[must_use]
    pub fn with_probe_window(mut self, window: usize) -> Self {
        self.probe_window = window;
        self
    }

    #[must_use]
    pub fn with_lost_update_timeout(mut self, timeout: Duration) -> Self {
        self.lost_update_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_extracted_text_monitoring(mut self, enabled: bool) -> Self {
        self.monitor_extracted_text = enabled;
        self
    }

    #[must_use]
    pub fn retaining_composition_on_cursor_backtrack(mut self, retain: bool) -> Self {
        self.retain_composition_on_cursor_backtrack = retain;
        self
    }

    /// Load configuration from `KBSYNC_*` environment variables.
    ///
    /// Unset or unparsable variables keep their defaults. The result is
    /// [`validated`](Self::validated).
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(limit) = env_usize("KBSYNC_GET_TEXT_LIMIT") {
            config.get_text_limit = limit;
        }
        if let Some(limit) = env_usize("KBSYNC_EXTRACT_MONITOR_TEXT_LIMIT") {
            config.extract_monitor_text_limit = limit;
        }
        if let Some(window) = env_usize("KBSYNC_PROBE_WINDOW") {
            config.probe_window = window;
        }
        if let Ok(val) = std::env::var("KBSYNC_LOST_UPDATE_TIMEOUT_MS")
            && let Ok(ms) = val.parse::<u64>()
        {
            config.lost_update_timeout = Duration::from_millis(ms);
        }
        if let Some(flag) = env_bool("KBSYNC_MONITOR_EXTRACTED_TEXT") {
            config.monitor_extracted_text = flag;
        }
        if let Some(flag) = env_bool("KBSYNC_RETAIN_COMPOSITION_ON_CURSOR_BACKTRACK") {
            config.retain_composition_on_cursor_backtrack = flag;
        }

        config.validated()
    }

    /// Clamp every numeric setting to its supported range.
    ///
    /// ```
    /// use kbsync_core::config::SyncConfig;
    /// use web_time::Duration;
    ///
    /// let config = SyncConfig::default()
    ///     .with_lost_update_timeout(Duration::from_millis(5))
    ///     .validated();
    /// assert_eq!(config.lost_update_timeout.as_millis(), 50);
    /// ```
    #[must_use]
    pub fn validated(mut self) -> Self {
        self.get_text_limit = self.get_text_limit.clamp(MIN_TEXT_LIMIT, MAX_TEXT_LIMIT);
        self.extract_monitor_text_limit = self
            .extract_monitor_text_limit
            .clamp(MIN_TEXT_LIMIT, MAX_TEXT_LIMIT);
        self.probe_window = self.probe_window.clamp(MIN_PROBE_WINDOW, MAX_TEXT_LIMIT);

        let timeout_ms = self.lost_update_timeout.as_millis() as u64;
        self.lost_update_timeout = Duration::from_millis(
            timeout_ms.clamp(MIN_LOST_UPDATE_TIMEOUT_MS, MAX_LOST_UPDATE_TIMEOUT_MS),
        );
        self
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.parse().ok()
}

fn env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    Some(val == "1" || val.eq_ignore_ascii_case("true"))
}
