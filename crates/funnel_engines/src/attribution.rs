#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use funnel_contracts::attribution::{
    ClickId, RuntimeTokens, TrackingParameterSet, BCID_PARAM, CLICK_ID_PARAM,
};
use funnel_storage::{AttributionStore, CookieJar};
use url::Url;

/// Read-only view of what the page environment provides for attribution.
pub trait AttributionEnvironment: Send + Sync {
    fn runtime_tokens(&self) -> RuntimeTokens;
    fn cookies(&self) -> CookieJar;
}

/// Environment whose tokens and cookies are set explicitly, e.g. from the
/// token library callback or a request's cookie header.
#[derive(Debug, Default)]
pub struct StaticEnvironment {
    tokens: Mutex<RuntimeTokens>,
    cookies: Mutex<CookieJar>,
}

impl StaticEnvironment {
    pub fn new(tokens: RuntimeTokens, cookies: CookieJar) -> Self {
        Self {
            tokens: Mutex::new(tokens),
            cookies: Mutex::new(cookies),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn set_tokens(&self, tokens: RuntimeTokens) {
        if let Ok(mut guard) = self.tokens.lock() {
            *guard = tokens;
        }
    }

    pub fn set_cookies(&self, cookies: CookieJar) {
        if let Ok(mut guard) = self.cookies.lock() {
            *guard = cookies;
        }
    }
}

impl AttributionEnvironment for StaticEnvironment {
    fn runtime_tokens(&self) -> RuntimeTokens {
        self.tokens
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    fn cookies(&self) -> CookieJar {
        self.cookies
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct AttributionResolver {
    store: Arc<AttributionStore>,
    env: Arc<dyn AttributionEnvironment>,
}

impl std::fmt::Debug for AttributionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributionResolver")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl AttributionResolver {
    pub fn new(store: Arc<AttributionStore>, env: Arc<dyn AttributionEnvironment>) -> Self {
        Self { store, env }
    }

    pub fn store(&self) -> &Arc<AttributionStore> {
        &self.store
    }

    /// Merges the current query into the stored tracking params and returns
    /// the merged set.
    pub fn merge_tracking_params(&self, query: &str) -> TrackingParameterSet {
        self.store
            .merge_tracking_params(&TrackingParameterSet::from_query(query))
    }

    /// Click id by precedence: token `clickid`, token `bcid`, cookie
    /// `clickid`, cookie `bcid`, merged query `clickid`, merged query `bcid`.
    /// The query is merged into the stored set before anything is read.
    pub fn resolve(&self, query: &str) -> Option<ClickId> {
        let merged = self.merge_tracking_params(query);
        let tokens = self.env.runtime_tokens();
        let cookies = self.env.cookies();

        tokens
            .clickid
            .as_deref()
            .and_then(ClickId::parse)
            .or_else(|| tokens.bcid.as_deref().and_then(ClickId::parse))
            .or_else(|| cookies.get(CLICK_ID_PARAM).as_deref().and_then(ClickId::parse))
            .or_else(|| cookies.get(BCID_PARAM).as_deref().and_then(ClickId::parse))
            .or_else(|| merged.get(CLICK_ID_PARAM).and_then(ClickId::parse))
            .or_else(|| merged.get(BCID_PARAM).and_then(ClickId::parse))
    }

    /// Appends every merged tracking param to an in-app path. Returns the
    /// path unchanged when nothing is tracked or it cannot be parsed.
    pub fn path_with_tracking(&self, origin: &Url, path: &str, query: &str) -> String {
        let params = self.merge_tracking_params(query);
        if params.is_empty() {
            return path.to_string();
        }
        let Ok(mut url) = origin.join(path) else {
            return path.to_string();
        };
        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !params.contains_key(k))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        pairs.extend(params.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        url.query_pairs_mut().clear().extend_pairs(pairs);
        match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        }
    }
}
