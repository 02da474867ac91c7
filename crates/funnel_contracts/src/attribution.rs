#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::{ContractViolation, Validate};

pub const CLICK_ID_PARAM: &str = "clickid";
pub const BCID_PARAM: &str = "bcid";
pub const FORCE_POSTBACK_PARAM: &str = "force_postback";
pub const DEBUG_TOGGLE_PARAM: &str = "mobi_debug";

pub const CLICK_ID_MAX_LEN: usize = 256;

/// Opaque token tying a visit to the ad click that produced it.
///
/// Only constructed from a non-empty trimmed value, so holding a `ClickId`
/// means attribution is present.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClickId(String);

impl ClickId {
    /// Returns `None` when the value is empty after trimming.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClickId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// No length cap: ids stay opaque on the client. Wire formats that bound
/// them check `CLICK_ID_MAX_LEN` themselves.
impl Validate for ClickId {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "click_id",
                reason: "must not be empty",
            });
        }
        Ok(())
    }
}

/// Tokens injected into the page by the attribution library at runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeTokens {
    pub clickid: Option<String>,
    pub bcid: Option<String>,
}

impl RuntimeTokens {
    pub fn new(clickid: Option<&str>, bcid: Option<&str>) -> Self {
        Self {
            clickid: clickid.map(str::to_string),
            bcid: bcid.map(str::to_string),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

/// Tracking query parameters merged across navigations within one browsing
/// session. Keys are unique; on merge the incoming value wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackingParameterSet {
    params: BTreeMap<String, String>,
}

impl TrackingParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a query string, with or without the leading `?`. Repeated keys
    /// keep the last value.
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut params = BTreeMap::new();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            params.insert(key.into_owned(), value.into_owned());
        }
        Self { params }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.insert(key.into(), value.into());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merge-overwrite: keys present in `incoming` replace stored values,
    /// keys absent from `incoming` are kept.
    pub fn merge_overwrite(&mut self, incoming: &TrackingParameterSet) {
        for (key, value) in &incoming.params {
            self.params.insert(key.clone(), value.clone());
        }
    }

    pub fn without_keys(&self, reserved: &[&str]) -> TrackingParameterSet {
        let params = self
            .params
            .iter()
            .filter(|(k, _)| !reserved.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self { params }
    }

    pub fn to_query_string(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.params.iter())
            .finish()
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.params
    }
}

impl From<BTreeMap<String, String>> for TrackingParameterSet {
    fn from(params: BTreeMap<String, String>) -> Self {
        Self { params }
    }
}

impl FromIterator<(String, String)> for TrackingParameterSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            params: iter.into_iter().collect(),
        }
    }
}

/// True when the query carries `name=1`.
pub fn query_flag_enabled(query: &str, name: &str) -> bool {
    TrackingParameterSet::from_query(query).get(name) == Some("1")
}
