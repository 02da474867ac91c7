#![forbid(unsafe_code)]

use std::env;

use funnel_contracts::postback::PostbackMode;
use url::Url;

pub const DEFAULT_ORIGIN: &str = "http://localhost:8080";
pub const DEFAULT_RELAY_PATH: &str = "/api/tracking/mobi-slon-event";
pub const DEFAULT_DIRECT_POSTBACK_URL: &str = "https://mobi-slon.com/index.php";
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_POSTBACK_MAX_ATTEMPTS: u16 = 3;
pub const DEFAULT_SESSION_FILE: &str = ".funnel_session.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunnelConfig {
    pub origin: Url,
    pub relay_endpoint: Url,
    pub postback_mode: PostbackMode,
    /// Affiliate postback URL. Relay forwarding is disabled while unset.
    pub postback_url: Option<Url>,
    pub tracking_debug: bool,
    pub http_timeout_ms: u64,
    pub postback_max_attempts: u16,
    pub session_file: String,
}

impl FunnelConfig {
    pub fn mvp_v1() -> Self {
        let origin = default_origin();
        let relay_endpoint = join_or(&origin, DEFAULT_RELAY_PATH);
        Self {
            origin,
            relay_endpoint,
            postback_mode: PostbackMode::Relay,
            postback_url: None,
            tracking_debug: false,
            http_timeout_ms: DEFAULT_HTTP_TIMEOUT_MS,
            postback_max_attempts: DEFAULT_POSTBACK_MAX_ATTEMPTS,
            session_file: DEFAULT_SESSION_FILE.to_string(),
        }
    }

    pub fn from_env() -> Self {
        let mut cfg = Self::mvp_v1();
        if let Some(origin) = env_url("FUNNEL_ORIGIN", None) {
            cfg.relay_endpoint = join_or(&origin, DEFAULT_RELAY_PATH);
            cfg.origin = origin;
        }
        if let Some(relay) = env_url("FUNNEL_RELAY_ENDPOINT", Some(&cfg.origin)) {
            cfg.relay_endpoint = relay;
        }
        if let Ok(raw) = env::var("FUNNEL_POSTBACK_MODE") {
            match PostbackMode::parse(&raw) {
                Some(mode) => cfg.postback_mode = mode,
                None => tracing::warn!(value = %raw, "unknown FUNNEL_POSTBACK_MODE, using relay"),
            }
        }
        cfg.postback_url = env_url("FUNNEL_POSTBACK_URL", None);
        cfg.tracking_debug = env::var("FUNNEL_TRACKING_DEBUG")
            .map(|v| parse_bool_flag(&v))
            .unwrap_or(false);
        cfg.http_timeout_ms = env_ranged("FUNNEL_HTTP_TIMEOUT_MS", 100..=60_000)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_MS);
        cfg.postback_max_attempts = env_ranged("FUNNEL_POSTBACK_MAX_ATTEMPTS", 1..=10)
            .map(|v| v as u16)
            .unwrap_or(DEFAULT_POSTBACK_MAX_ATTEMPTS);
        if let Ok(path) = env::var("FUNNEL_SESSION_FILE") {
            if !path.trim().is_empty() {
                cfg.session_file = path.trim().to_string();
            }
        }
        cfg
    }

    /// Affiliate URL for direct-mode postbacks.
    pub fn direct_postback_url(&self) -> Url {
        self.postback_url
            .clone()
            .unwrap_or_else(default_direct_postback_url)
    }
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self::mvp_v1()
    }
}

/// `true`/`1` enable, everything else (including `false`/`0`) disables.
pub fn parse_bool_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "true" | "1")
}

fn env_url(key: &str, base: Option<&Url>) -> Option<Url> {
    let raw = env::var(key).ok()?;
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = match base {
        Some(base) => base.join(raw),
        None => Url::parse(raw),
    };
    match parsed {
        Ok(url) => Some(url),
        Err(err) => {
            tracing::warn!(key, value = raw, error = %err, "invalid url in environment, ignoring");
            None
        }
    }
}

fn env_ranged(key: &str, range: std::ops::RangeInclusive<u64>) -> Option<u64> {
    let raw = env::var(key).ok()?;
    let parsed = raw.trim().parse::<u64>().ok().filter(|v| range.contains(v));
    if parsed.is_none() {
        tracing::warn!(key, value = %raw, "out-of-range value in environment, using default");
    }
    parsed
}

fn default_origin() -> Url {
    Url::parse(DEFAULT_ORIGIN).unwrap_or_else(|_| unreachable!("default origin is a valid url"))
}

fn default_direct_postback_url() -> Url {
    Url::parse(DEFAULT_DIRECT_POSTBACK_URL)
        .unwrap_or_else(|_| unreachable!("default postback url is a valid url"))
}

fn join_or(base: &Url, path: &str) -> Url {
    base.join(path).unwrap_or_else(|_| base.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_config_01_defaults_point_relay_at_origin() {
        let cfg = FunnelConfig::mvp_v1();
        assert_eq!(
            cfg.relay_endpoint.as_str(),
            "http://localhost:8080/api/tracking/mobi-slon-event"
        );
        assert_eq!(cfg.postback_mode, PostbackMode::Relay);
        assert_eq!(cfg.postback_max_attempts, 3);
        assert_eq!(
            cfg.direct_postback_url().as_str(),
            "https://mobi-slon.com/index.php"
        );
    }

    #[test]
    fn at_config_02_bool_flag_parsing() {
        assert!(parse_bool_flag("true"));
        assert!(parse_bool_flag(" 1 "));
        assert!(parse_bool_flag("TRUE"));
        assert!(!parse_bool_flag("0"));
        assert!(!parse_bool_flag("yes"));
        assert!(!parse_bool_flag(""));
    }
}
