#![forbid(unsafe_code)]

pub mod attribution_store;
pub mod client_storage;
pub mod cookies;

pub use attribution_store::{AttributionStore, InFlightGuard};
pub use client_storage::{
    InMemoryStorage, JsonFileStorage, KeyValueStorage, StorageError, UnavailableStorage,
};
pub use cookies::CookieJar;
