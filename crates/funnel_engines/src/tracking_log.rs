#![forbid(unsafe_code)]

use funnel_contracts::attribution::{TrackingParameterSet, DEBUG_TOGGLE_PARAM};
use funnel_storage::AttributionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingLogLevel {
    Info,
    Warn,
    Error,
}

/// Tracking diagnostics, emitted only while the debug toggle is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingLogger {
    enabled: bool,
}

impl TrackingLogger {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Stored toggle wins over the configured default.
    pub fn from_store(store: &AttributionStore, configured_default: bool) -> Self {
        Self::new(store.debug_logging().unwrap_or(configured_default))
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn log(&self, scope: &str, message: &str, details: &str, level: TrackingLogLevel) {
        if !self.enabled {
            return;
        }
        match level {
            TrackingLogLevel::Info => tracing::info!(target: "tracking", scope, details, "{message}"),
            TrackingLogLevel::Warn => tracing::warn!(target: "tracking", scope, details, "{message}"),
            TrackingLogLevel::Error => {
                tracing::error!(target: "tracking", scope, details, "{message}")
            }
        }
    }

    pub fn info(&self, scope: &str, message: &str, details: &str) {
        self.log(scope, message, details, TrackingLogLevel::Info);
    }

    pub fn warn(&self, scope: &str, message: &str, details: &str) {
        self.log(scope, message, details, TrackingLogLevel::Warn);
    }

    pub fn error(&self, scope: &str, message: &str, details: &str) {
        self.log(scope, message, details, TrackingLogLevel::Error);
    }
}

/// Persists `mobi_debug=1` / `mobi_debug=0` from the query; any other value
/// leaves the stored toggle alone. Returns the stored state afterwards.
pub fn apply_debug_toggle(store: &AttributionStore, query: &str) -> Option<bool> {
    match TrackingParameterSet::from_query(query).get(DEBUG_TOGGLE_PARAM) {
        Some("1") => store.set_debug_logging(true),
        Some("0") => store.set_debug_logging(false),
        _ => {}
    }
    store.debug_logging()
}
