#![forbid(unsafe_code)]

use std::sync::Arc;

use funnel_contracts::attribution::TrackingParameterSet;
use funnel_contracts::postback::{
    direct_postback_pairs, FunnelStage, RelayAck, RelayEventPayload, DIRECT_RESERVED_PARAMS,
    PAGE_PATH_MAX_LEN, SESSION_ID_MAX_LEN, STATUS_MAX_LEN,
};
use funnel_contracts::{ContractViolation, Validate};
use thiserror::Error;
use url::Url;

use crate::config::FunnelConfig;
use crate::http::PostbackHttp;

pub const TRACKING_PARAM_KEY_MAX_LEN: usize = 64;
pub const TRACKING_PARAM_VALUE_MAX_LEN: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("Invalid status")]
    InvalidStatus,
    #[error("Unknown status")]
    UnknownStatus,
    #[error("Invalid clickid")]
    InvalidClickId,
    #[error(transparent)]
    Contract(#[from] ContractViolation),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayForwarderConfig {
    pub postback_url: Option<Url>,
    pub max_attempts: u16,
}

impl RelayForwarderConfig {
    pub fn mvp_v1(postback_url: Option<Url>) -> Self {
        Self {
            postback_url,
            max_attempts: crate::config::DEFAULT_POSTBACK_MAX_ATTEMPTS,
        }
    }

    pub fn from_funnel_config(cfg: &FunnelConfig) -> Self {
        Self {
            postback_url: cfg.postback_url.clone(),
            max_attempts: cfg.postback_max_attempts,
        }
    }
}

/// Server side of the relay endpoint: validates browser-reported events and
/// forwards them to the affiliate postback URL.
pub struct RelayForwarder {
    config: RelayForwarderConfig,
    http: Arc<dyn PostbackHttp>,
}

impl RelayForwarder {
    pub fn new(config: RelayForwarderConfig, http: Arc<dyn PostbackHttp>) -> Self {
        Self { config, http }
    }

    pub fn config(&self) -> &RelayForwarderConfig {
        &self.config
    }

    /// `Ok` means the event was accepted; `forwarded` says whether the
    /// affiliate network took it.
    pub fn relay(&self, payload: &RelayEventPayload) -> Result<RelayAck, RelayError> {
        payload.validate()?;
        let stage = normalize_status(&payload.status)?;
        let click_id = sanitize_click_id(&payload.clickid);
        if click_id.is_empty() {
            return Err(RelayError::InvalidClickId);
        }
        if stage.is_server_reserved() {
            tracing::warn!(
                status = stage.as_str(),
                source = "frontend_relay",
                reason = "reserved_server_side",
                "relay skipped"
            );
            return Ok(RelayAck {
                accepted: true,
                forwarded: false,
            });
        }

        let params = sanitize_tracking_params(payload.tracking_params.iter());
        tracing::info!(
            status = stage.as_str(),
            clickid = %click_id,
            session_id = %truncate(payload.session_id.as_deref().unwrap_or("").trim(), SESSION_ID_MAX_LEN),
            page_path = %truncate(payload.page_path.as_deref().unwrap_or("").trim(), PAGE_PATH_MAX_LEN),
            params = params.len(),
            "relay request"
        );
        let forwarded = self.send_postback(stage, &click_id, &params, "frontend_relay");
        Ok(RelayAck {
            accepted: true,
            forwarded,
        })
    }

    /// POSTs `cnv_id`/`payout`/`cnv_status` plus `extra` to the affiliate
    /// URL, retrying up to the configured attempts. Success is any status
    /// below 400.
    pub fn send_postback(
        &self,
        stage: FunnelStage,
        click_id: &str,
        extra: &TrackingParameterSet,
        source: &str,
    ) -> bool {
        let Some(base) = self.config.postback_url.as_ref() else {
            tracing::warn!(status = stage.as_str(), source, "postback skipped: missing url");
            return false;
        };
        let pairs = direct_postback_pairs(stage.as_str(), click_id, extra);
        let mut url = base.clone();
        url.query_pairs_mut().extend_pairs(&pairs);

        let mut last_error = String::from("unknown");
        for attempt in 1..=self.config.max_attempts.max(1) {
            tracing::info!(
                status = stage.as_str(),
                clickid = click_id,
                attempt,
                source,
                params = pairs.len(),
                "postback attempt"
            );
            match self.http.post_empty(&url) {
                Ok(reply) if reply.status < 400 => {
                    tracing::info!(
                        status = stage.as_str(),
                        clickid = click_id,
                        attempt,
                        source,
                        code = reply.status,
                        body = %reply.body_preview,
                        "postback sent"
                    );
                    return true;
                }
                Ok(reply) => {
                    last_error = format!("HTTP {}", reply.status);
                    tracing::warn!(
                        status = stage.as_str(),
                        clickid = click_id,
                        attempt,
                        source,
                        code = reply.status,
                        body = %reply.body_preview,
                        "postback bad response"
                    );
                }
                Err(err) => {
                    last_error = err.to_string();
                    tracing::warn!(
                        status = stage.as_str(),
                        clickid = click_id,
                        attempt,
                        source,
                        error = %err,
                        "postback exception"
                    );
                }
            }
        }
        tracing::error!(
            status = stage.as_str(),
            clickid = click_id,
            source,
            error = %last_error,
            "postback failed"
        );
        false
    }
}

/// Trimmed, lowercased, `[a-z0-9_]{1,64}`, and part of the stage vocabulary.
pub fn normalize_status(raw: &str) -> Result<FunnelStage, RelayError> {
    let status = raw.trim().to_ascii_lowercase();
    let well_formed = !status.is_empty()
        && status.len() <= STATUS_MAX_LEN
        && status
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    if !well_formed {
        return Err(RelayError::InvalidStatus);
    }
    FunnelStage::parse(&status).ok_or(RelayError::UnknownStatus)
}

/// Drops every character outside `[A-Za-z0-9_.-]`.
pub fn sanitize_click_id(raw: &str) -> String {
    raw.trim().chars().filter(|c| is_safe_char(*c)).collect()
}

/// Keeps keys matching `[A-Za-z0-9_.-]{1,64}` that are not affiliate-owned,
/// with non-empty trimmed values cut to 512 chars.
pub fn sanitize_tracking_params<'a, I>(raw: I) -> TrackingParameterSet
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut out = TrackingParameterSet::new();
    for (raw_key, raw_value) in raw {
        let key = raw_key.trim();
        if key.is_empty() || key.len() > TRACKING_PARAM_KEY_MAX_LEN || !key.chars().all(is_safe_char) {
            continue;
        }
        if DIRECT_RESERVED_PARAMS.contains(&key) {
            continue;
        }
        let value = raw_value.trim();
        if value.is_empty() {
            continue;
        }
        out.set(key, truncate(value, TRACKING_PARAM_VALUE_MAX_LEN));
    }
    out
}

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
