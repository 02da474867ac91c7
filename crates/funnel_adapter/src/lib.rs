#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use funnel_contracts::postback::{
    RelayAck, RelayEventPayload, POSTBACK_CONTRACT_VERSION, RELAY_RESERVED_FIELDS,
};
use funnel_engines::config::FunnelConfig;
use funnel_engines::http::{PostbackHttp, UreqPostbackHttp};
use funnel_engines::relay::{RelayError, RelayForwarder, RelayForwarderConfig};
use serde::{Deserialize, Serialize};

pub const RELAY_EVENT_PATH: &str = "/api/tracking/mobi-slon-event";
pub const RELAY_EVENT_ALIAS_PATH: &str = "/api/events/mobi-slon";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEventResponse {
    pub accepted: bool,
    pub forwarded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl RelayEventResponse {
    fn ack(ack: RelayAck) -> Self {
        Self {
            accepted: ack.accepted,
            forwarded: ack.forwarded,
            detail: None,
        }
    }

    fn rejected(detail: String) -> Self {
        Self {
            accepted: false,
            forwarded: false,
            detail: Some(detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayHealthResponse {
    pub status: String,
    pub contract_version: u32,
    pub forwarding_enabled: bool,
}

/// Server half of the same-origin postback relay.
pub struct RelayRuntime {
    forwarder: RelayForwarder,
}

impl RelayRuntime {
    pub fn new(forwarder: RelayForwarder) -> Self {
        Self { forwarder }
    }

    pub fn from_config(config: &FunnelConfig) -> Self {
        let http: Arc<dyn PostbackHttp> = Arc::new(UreqPostbackHttp::new(config.http_timeout_ms));
        Self::new(RelayForwarder::new(
            RelayForwarderConfig::from_funnel_config(config),
            http,
        ))
    }

    pub fn health(&self) -> RelayHealthResponse {
        RelayHealthResponse {
            status: "ok".to_string(),
            contract_version: POSTBACK_CONTRACT_VERSION.0,
            forwarding_enabled: self.forwarder.config().postback_url.is_some(),
        }
    }

    pub fn relay(&self, payload: &RelayEventPayload) -> Result<RelayAck, RelayError> {
        self.forwarder.relay(payload)
    }
}

pub fn router(runtime: Arc<RelayRuntime>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(RELAY_EVENT_PATH, get(relay_event_query).post(relay_event_json))
        .route(RELAY_EVENT_ALIAS_PATH, get(relay_event_query).post(relay_event_json))
        .with_state(runtime)
}

async fn healthz(State(runtime): State<Arc<RelayRuntime>>) -> (StatusCode, Json<RelayHealthResponse>) {
    (StatusCode::OK, Json(runtime.health()))
}

async fn relay_event_json(
    State(runtime): State<Arc<RelayRuntime>>,
    Json(payload): Json<RelayEventPayload>,
) -> (StatusCode, Json<RelayEventResponse>) {
    tracing::info!(
        method = "POST",
        status = %payload.status,
        params = payload.tracking_params.len(),
        "relay http in"
    );
    run_relay(runtime, payload).await
}

/// Pixel fallback: the event arrives flattened into the query string.
async fn relay_event_query(
    State(runtime): State<Arc<RelayRuntime>>,
    Query(mut query): Query<BTreeMap<String, String>>,
) -> (StatusCode, Json<RelayEventResponse>) {
    let (Some(status), Some(clickid)) = (query.remove("status"), query.remove("clickid")) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(RelayEventResponse::rejected(
                "status and clickid are required".to_string(),
            )),
        );
    };
    let session_id = query.remove("session_id");
    let page_path = query.remove("page_path");
    query.retain(|k, _| !RELAY_RESERVED_FIELDS.contains(&k.as_str()));
    let payload = RelayEventPayload {
        status,
        clickid,
        session_id,
        page_path,
        tracking_params: query,
    };
    tracing::info!(
        method = "GET",
        status = %payload.status,
        params = payload.tracking_params.len(),
        "relay http in"
    );
    run_relay(runtime, payload).await
}

async fn run_relay(
    runtime: Arc<RelayRuntime>,
    payload: RelayEventPayload,
) -> (StatusCode, Json<RelayEventResponse>) {
    // The forwarder does blocking HTTP with retries.
    let joined = tokio::task::spawn_blocking(move || runtime.relay(&payload)).await;
    match joined {
        Ok(Ok(ack)) => (StatusCode::OK, Json(RelayEventResponse::ack(ack))),
        Ok(Err(err)) => (
            StatusCode::BAD_REQUEST,
            Json(RelayEventResponse::rejected(err.to_string())),
        ),
        Err(err) => {
            tracing::error!(error = %err, "relay task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RelayEventResponse::rejected("relay task failed".to_string())),
            )
        }
    }
}
