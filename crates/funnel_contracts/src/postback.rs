#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::attribution::{ClickId, TrackingParameterSet, CLICK_ID_MAX_LEN};
use crate::common::{validate_opt_token, validate_token};
use crate::{ContractViolation, SchemaVersion, Validate};

pub const POSTBACK_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

pub const DEDUPE_GLOBAL_SCOPE: &str = "global";
pub const STATUS_MAX_LEN: usize = 64;
pub const SESSION_ID_MAX_LEN: usize = 128;
pub const PAGE_PATH_MAX_LEN: usize = 512;

/// Field names of the relay event itself; tracking params with these names
/// are not flattened over them.
pub const RELAY_RESERVED_FIELDS: [&str; 4] = ["status", "clickid", "session_id", "page_path"];

/// Parameter names owned by the affiliate postback URL.
pub const DIRECT_RESERVED_PARAMS: [&str; 3] = ["cnv_id", "payout", "cnv_status"];

/// Funnel-stage vocabulary reported to the affiliate network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunnelStage {
    StartQuiz,
    Block1Completed,
    Block2Completed,
    Block3Completed,
    Block4Completed,
    Block5Completed,
    Block6Completed,
    Block7Completed,
    TransitionToPayment,
    PaySuccess,
}

impl FunnelStage {
    pub const ALL: [FunnelStage; 10] = [
        FunnelStage::StartQuiz,
        FunnelStage::Block1Completed,
        FunnelStage::Block2Completed,
        FunnelStage::Block3Completed,
        FunnelStage::Block4Completed,
        FunnelStage::Block5Completed,
        FunnelStage::Block6Completed,
        FunnelStage::Block7Completed,
        FunnelStage::TransitionToPayment,
        FunnelStage::PaySuccess,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FunnelStage::StartQuiz => "start_quiz",
            FunnelStage::Block1Completed => "block1_completed",
            FunnelStage::Block2Completed => "block2_completed",
            FunnelStage::Block3Completed => "block3_completed",
            FunnelStage::Block4Completed => "block4_completed",
            FunnelStage::Block5Completed => "block5_completed",
            FunnelStage::Block6Completed => "block6_completed",
            FunnelStage::Block7Completed => "block7_completed",
            FunnelStage::TransitionToPayment => "transition_to_payment",
            FunnelStage::PaySuccess => "pay_success",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == raw)
    }

    /// Stages only the server may report (after the payment provider confirms).
    pub fn is_server_reserved(self) -> bool {
        matches!(self, FunnelStage::PaySuccess)
    }

    pub fn block_completed(block: u8) -> Option<Self> {
        match block {
            1 => Some(FunnelStage::Block1Completed),
            2 => Some(FunnelStage::Block2Completed),
            3 => Some(FunnelStage::Block3Completed),
            4 => Some(FunnelStage::Block4Completed),
            5 => Some(FunnelStage::Block5Completed),
            6 => Some(FunnelStage::Block6Completed),
            7 => Some(FunnelStage::Block7Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for FunnelStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostbackMode {
    /// JSON relay through the same-origin endpoint, full transport cascade.
    Relay,
    /// Straight to the affiliate postback URL, beacon or pixel only.
    Direct,
}

impl PostbackMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "relay" => Some(PostbackMode::Relay),
            "direct" => Some(PostbackMode::Direct),
            _ => None,
        }
    }

    pub fn reserved_params(self) -> &'static [&'static str] {
        match self {
            PostbackMode::Relay => &[],
            PostbackMode::Direct => &DIRECT_RESERVED_PARAMS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    KeepaliveFetch,
    Beacon,
    Pixel,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::KeepaliveFetch => "keepalive_fetch",
            TransportKind::Beacon => "beacon",
            TransportKind::Pixel => "pixel",
        }
    }
}

/// Composite identity of a postback for at-most-once delivery.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DedupeKey {
    pub status: FunnelStage,
    pub click_id: ClickId,
    pub session_scope: String,
}

impl DedupeKey {
    pub fn new(status: FunnelStage, click_id: ClickId, session_id: Option<&str>) -> Self {
        let session_scope = session_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEDUPE_GLOBAL_SCOPE)
            .to_string();
        Self {
            status,
            click_id,
            session_scope,
        }
    }

    /// `status|<len>:click|<len>:scope`. Lengths keep ids containing `|`
    /// from colliding with another key.
    pub fn composite(&self) -> String {
        let click = self.click_id.as_str();
        format!(
            "{}|{}:{}|{}:{}",
            self.status.as_str(),
            click.len(),
            click,
            self.session_scope.len(),
            self.session_scope
        )
    }
}

/// One funnel-stage completion, built at most once per dedupe key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostbackEvent {
    pub status: FunnelStage,
    pub click_id: ClickId,
    pub session_id: Option<String>,
    pub page_path: String,
    pub extra_params: TrackingParameterSet,
}

impl PostbackEvent {
    pub fn v1(
        status: FunnelStage,
        click_id: ClickId,
        session_id: Option<String>,
        page_path: impl Into<String>,
        tracking: &TrackingParameterSet,
        mode: PostbackMode,
    ) -> Result<Self, ContractViolation> {
        let event = Self {
            status,
            click_id,
            session_id: session_id.filter(|s| !s.trim().is_empty()),
            page_path: page_path.into(),
            extra_params: tracking.without_keys(mode.reserved_params()),
        };
        event.validate()?;
        Ok(event)
    }

    pub fn dedupe_key(&self) -> DedupeKey {
        DedupeKey::new(
            self.status,
            self.click_id.clone(),
            self.session_id.as_deref(),
        )
    }

    pub fn relay_payload(&self) -> RelayEventPayload {
        RelayEventPayload {
            status: self.status.as_str().to_string(),
            clickid: self.click_id.as_str().to_string(),
            session_id: self.session_id.clone(),
            page_path: Some(self.page_path.clone()),
            tracking_params: self.extra_params.clone().into_map(),
        }
    }

    /// Relay fields first, then tracking params that do not shadow them.
    pub fn relay_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("status".to_string(), self.status.as_str().to_string()),
            ("clickid".to_string(), self.click_id.as_str().to_string()),
        ];
        if let Some(session_id) = &self.session_id {
            pairs.push(("session_id".to_string(), session_id.clone()));
        }
        pairs.push(("page_path".to_string(), self.page_path.clone()));
        pairs.extend(
            self.extra_params
                .iter()
                .filter(|(k, _)| !RELAY_RESERVED_FIELDS.contains(k))
                .map(|(k, v)| (k.to_string(), v.to_string())),
        );
        pairs
    }

    /// Affiliate postback parameters: `cnv_id`, `payout=0`, `cnv_status`
    /// plus pass-through tracking params.
    pub fn direct_query_pairs(&self) -> Vec<(String, String)> {
        direct_postback_pairs(
            self.status.as_str(),
            self.click_id.as_str(),
            &self.extra_params,
        )
    }
}

/// Relay length caps are enforced server side, so an oversized event still
/// goes through the transport cascade.
impl Validate for PostbackEvent {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.click_id.validate()
    }
}

pub fn direct_postback_pairs(
    status: &str,
    click_id: &str,
    extra: &TrackingParameterSet,
) -> Vec<(String, String)> {
    let mut pairs = vec![
        ("cnv_id".to_string(), click_id.to_string()),
        ("payout".to_string(), "0".to_string()),
        ("cnv_status".to_string(), status.to_string()),
    ];
    pairs.extend(
        extra
            .iter()
            .filter(|(k, _)| !DIRECT_RESERVED_PARAMS.contains(k))
            .map(|(k, v)| (k.to_string(), v.to_string())),
    );
    pairs
}

/// Wire body of the same-origin relay endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEventPayload {
    pub status: String,
    pub clickid: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub page_path: Option<String>,
    #[serde(default)]
    pub tracking_params: BTreeMap<String, String>,
}

impl Validate for RelayEventPayload {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token("relay_event.status", &self.status, STATUS_MAX_LEN)?;
        validate_token("relay_event.clickid", &self.clickid, CLICK_ID_MAX_LEN)?;
        validate_opt_token("relay_event.session_id", &self.session_id, SESSION_ID_MAX_LEN)?;
        validate_opt_token("relay_event.page_path", &self.page_path, PAGE_PATH_MAX_LEN)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayAck {
    pub accepted: bool,
    pub forwarded: bool,
}

/// What a single `send_once` call ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOnceOutcome {
    Sent(TransportKind),
    SkippedNoClickId,
    SkippedInFlight,
    SkippedConfirmed,
    Failed,
}
