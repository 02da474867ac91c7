#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use funnel_contracts::attribution::TrackingParameterSet;
use funnel_contracts::payment::Locale;
use funnel_contracts::postback::DedupeKey;
use sha2::{Digest, Sha256};

use crate::client_storage::{InMemoryStorage, KeyValueStorage};

pub const TRACKING_PARAMS_STORAGE_KEY: &str = "tracking_query_params";
pub const POSTBACK_SENT_KEY_PREFIX: &str = "postback_sent_";
pub const LOCALE_STORAGE_KEY: &str = "app_locale";
pub const DEBUG_STORAGE_KEY: &str = "mobi_debug";

const CONFIRMED_MARKER: &str = "1";

/// Per-session attribution state: merged tracking params and confirmed
/// postbacks in session scope, locale and debug toggle in local scope, and
/// in-flight postback markers in memory.
///
/// Storage failures never surface: reads fall back to empty/default values
/// and writes are dropped with a debug log.
pub struct AttributionStore {
    session: Arc<dyn KeyValueStorage>,
    local: Arc<dyn KeyValueStorage>,
    in_flight: Mutex<BTreeSet<String>>,
}

impl std::fmt::Debug for AttributionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributionStore")
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl AttributionStore {
    pub fn new(session: Arc<dyn KeyValueStorage>, local: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            session,
            local,
            in_flight: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryStorage::new()),
            Arc::new(InMemoryStorage::new()),
        )
    }

    pub fn tracking_params(&self) -> TrackingParameterSet {
        let raw = match self.session.get_item(TRACKING_PARAMS_STORAGE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return TrackingParameterSet::new(),
            Err(err) => {
                tracing::debug!(error = %err, "tracking params read failed");
                return TrackingParameterSet::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|err| {
            tracing::debug!(error = %err, "stored tracking params corrupt, treating as empty");
            TrackingParameterSet::new()
        })
    }

    /// Merge-overwrite `incoming` into the stored set, save it, and return
    /// the merged result.
    pub fn merge_tracking_params(&self, incoming: &TrackingParameterSet) -> TrackingParameterSet {
        let mut merged = self.tracking_params();
        merged.merge_overwrite(incoming);
        self.save_tracking_params(&merged);
        merged
    }

    fn save_tracking_params(&self, params: &TrackingParameterSet) {
        let raw = match serde_json::to_string(params) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::debug!(error = %err, "tracking params encode failed");
                return;
            }
        };
        if let Err(err) = self.session.set_item(TRACKING_PARAMS_STORAGE_KEY, &raw) {
            tracing::debug!(error = %err, "tracking params write failed");
        }
    }

    pub fn is_confirmed(&self, key: &DedupeKey) -> bool {
        match self.session.get_item(&confirmed_storage_key(key)) {
            Ok(v) => v.as_deref() == Some(CONFIRMED_MARKER),
            Err(err) => {
                tracing::debug!(error = %err, "postback ledger read failed");
                false
            }
        }
    }

    pub fn mark_confirmed(&self, key: &DedupeKey) {
        if let Err(err) = self
            .session
            .set_item(&confirmed_storage_key(key), CONFIRMED_MARKER)
        {
            tracing::debug!(error = %err, "postback ledger write failed");
        }
    }

    pub fn is_in_flight(&self, key: &DedupeKey) -> bool {
        match self.in_flight.lock() {
            Ok(set) => set.contains(&key.composite()),
            Err(_) => false,
        }
    }

    /// Claims the in-flight marker for `key`. Returns `None` when another
    /// send already holds it. The marker is released when the guard drops,
    /// on success and failure paths alike.
    pub fn begin_in_flight(&self, key: &DedupeKey) -> Option<InFlightGuard<'_>> {
        let composite = key.composite();
        let mut set = self.in_flight.lock().ok()?;
        if !set.insert(composite.clone()) {
            return None;
        }
        Some(InFlightGuard {
            store: self,
            composite,
        })
    }

    fn release_in_flight(&self, composite: &str) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(composite);
        }
    }

    pub fn locale(&self) -> Option<Locale> {
        match self.local.get_item(LOCALE_STORAGE_KEY) {
            Ok(v) => v.as_deref().and_then(Locale::parse),
            Err(_) => None,
        }
    }

    /// Stored preference, else derived from the browser language.
    pub fn locale_or_detect(&self, browser_language: &str) -> Locale {
        self.locale()
            .unwrap_or_else(|| Locale::from_browser_language(browser_language))
    }

    pub fn set_locale(&self, locale: Locale) {
        if let Err(err) = self.local.set_item(LOCALE_STORAGE_KEY, locale.as_str()) {
            tracing::debug!(error = %err, "locale write failed");
        }
    }

    /// Stored toggle; `None` when never set or unreadable.
    pub fn debug_logging(&self) -> Option<bool> {
        match self.local.get_item(DEBUG_STORAGE_KEY) {
            Ok(Some(v)) if v == "1" => Some(true),
            Ok(Some(v)) if v == "0" => Some(false),
            _ => None,
        }
    }

    pub fn set_debug_logging(&self, enabled: bool) {
        let value = if enabled { "1" } else { "0" };
        if let Err(err) = self.local.set_item(DEBUG_STORAGE_KEY, value) {
            tracing::debug!(error = %err, "debug toggle write failed");
        }
    }
}

/// Releases its in-flight marker on drop.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    store: &'a AttributionStore,
    composite: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.store.release_in_flight(&self.composite);
    }
}

/// Session-storage key for a confirmed postback. Hashed so raw click ids
/// do not end up in storage key names.
pub fn confirmed_storage_key(key: &DedupeKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.composite().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!(
        "{}{}_{}",
        POSTBACK_SENT_KEY_PREFIX,
        key.status.as_str(),
        &digest[..32]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_storage::UnavailableStorage;
    use funnel_contracts::attribution::ClickId;
    use funnel_contracts::postback::FunnelStage;

    fn key(stage: FunnelStage, click: &str) -> DedupeKey {
        DedupeKey::new(stage, ClickId::parse(click).unwrap(), None)
    }

    #[test]
    fn at_attr_store_01_in_flight_guard_blocks_then_releases() {
        let store = AttributionStore::in_memory();
        let k = key(FunnelStage::StartQuiz, "c1");
        let guard = store.begin_in_flight(&k).unwrap();
        assert!(store.is_in_flight(&k));
        assert!(store.begin_in_flight(&k).is_none());
        drop(guard);
        assert!(!store.is_in_flight(&k));
        assert!(store.begin_in_flight(&k).is_some());
    }

    #[test]
    fn at_attr_store_02_confirmed_keys_are_disjoint_per_stage_and_click() {
        let store = AttributionStore::in_memory();
        store.mark_confirmed(&key(FunnelStage::Block1Completed, "c1"));
        assert!(store.is_confirmed(&key(FunnelStage::Block1Completed, "c1")));
        assert!(!store.is_confirmed(&key(FunnelStage::Block2Completed, "c1")));
        assert!(!store.is_confirmed(&key(FunnelStage::Block1Completed, "c2")));
    }

    #[test]
    fn at_attr_store_03_storage_key_hides_click_id() {
        let k = key(FunnelStage::StartQuiz, "secret_click");
        let storage_key = confirmed_storage_key(&k);
        assert!(storage_key.starts_with("postback_sent_start_quiz_"));
        assert!(!storage_key.contains("secret_click"));
    }

    #[test]
    fn at_attr_store_04_unavailable_storage_degrades_to_defaults() {
        let store = AttributionStore::new(Arc::new(UnavailableStorage), Arc::new(UnavailableStorage));
        let merged = store.merge_tracking_params(&TrackingParameterSet::from_query("clickid=a"));
        assert_eq!(merged.get("clickid"), Some("a"));
        assert!(store.tracking_params().is_empty());
        store.mark_confirmed(&key(FunnelStage::StartQuiz, "a"));
        assert!(!store.is_confirmed(&key(FunnelStage::StartQuiz, "a")));
        assert_eq!(store.locale(), None);
        assert_eq!(store.debug_logging(), None);
    }

    #[test]
    fn at_attr_store_05_locale_and_debug_toggle_persist_in_local_scope() {
        let store = AttributionStore::in_memory();
        assert_eq!(store.locale_or_detect("en-GB"), Locale::En);
        store.set_locale(Locale::Ru);
        assert_eq!(store.locale_or_detect("en-GB"), Locale::Ru);
        store.set_debug_logging(true);
        assert_eq!(store.debug_logging(), Some(true));
        store.set_debug_logging(false);
        assert_eq!(store.debug_logging(), Some(false));
    }
}
