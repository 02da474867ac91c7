#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use funnel_contracts::attribution::{ClickId, TrackingParameterSet};
use funnel_contracts::postback::{DedupeKey, FunnelStage};
use funnel_storage::attribution_store::TRACKING_PARAMS_STORAGE_KEY;
use funnel_storage::{AttributionStore, InMemoryStorage, JsonFileStorage, KeyValueStorage};

fn store_with(session: Arc<InMemoryStorage>) -> AttributionStore {
    AttributionStore::new(session, Arc::new(InMemoryStorage::new()))
}

#[test]
fn at_store_wiring_01_merge_equals_last_write_wins_over_navigations() {
    let store = AttributionStore::in_memory();
    let navigations = [
        "?clickid=c1&utm_source=fb",
        "?sub1=a",
        "?utm_source=tt&sub2=b",
        "",
        "?clickid=c2",
    ];
    let mut expected = BTreeMap::new();
    for query in navigations {
        for (k, v) in TrackingParameterSet::from_query(query).iter() {
            expected.insert(k.to_string(), v.to_string());
        }
        store.merge_tracking_params(&TrackingParameterSet::from_query(query));
    }
    assert_eq!(store.tracking_params(), TrackingParameterSet::from(expected));
}

#[test]
fn at_store_wiring_02_corrupt_payload_reads_as_empty_and_is_repaired() {
    let session = Arc::new(InMemoryStorage::new());
    session
        .set_item(TRACKING_PARAMS_STORAGE_KEY, "{not-json")
        .unwrap();
    let store = store_with(session.clone());
    assert!(store.tracking_params().is_empty());

    let merged = store.merge_tracking_params(&TrackingParameterSet::from_query("bcid=b1"));
    assert_eq!(merged.get("bcid"), Some("b1"));
    let raw = session.get_item(TRACKING_PARAMS_STORAGE_KEY).unwrap().unwrap();
    assert_eq!(raw, r#"{"bcid":"b1"}"#);
}

#[test]
fn at_store_wiring_03_remerging_identical_query_is_stable() {
    let session = Arc::new(InMemoryStorage::new());
    let store = store_with(session.clone());
    store.merge_tracking_params(&TrackingParameterSet::from_query("clickid=c1&sub1=x"));
    let first = session.get_item(TRACKING_PARAMS_STORAGE_KEY).unwrap();
    store.merge_tracking_params(&TrackingParameterSet::from_query(""));
    store.merge_tracking_params(&TrackingParameterSet::from_query("clickid=c1"));
    assert_eq!(session.get_item(TRACKING_PARAMS_STORAGE_KEY).unwrap(), first);
}

#[test]
fn at_store_wiring_04_confirmed_ledger_survives_reopen_of_session_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    let key = DedupeKey::new(
        FunnelStage::Block2Completed,
        ClickId::parse("c1").unwrap(),
        Some("sess_1"),
    );
    {
        let store = AttributionStore::new(
            Arc::new(JsonFileStorage::open(&path)),
            Arc::new(InMemoryStorage::new()),
        );
        store.mark_confirmed(&key);
    }
    let reopened = AttributionStore::new(
        Arc::new(JsonFileStorage::open(&path)),
        Arc::new(InMemoryStorage::new()),
    );
    assert!(reopened.is_confirmed(&key));
    // in-flight markers are memory only
    assert!(!reopened.is_in_flight(&key));
}
