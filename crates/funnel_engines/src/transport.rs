#![forbid(unsafe_code)]

use std::sync::Arc;

use funnel_contracts::postback::{PostbackEvent, TransportKind};
use thiserror::Error;
use url::Url;

use crate::http::PostbackHttp;

/// Browser beacons refuse payloads above this size.
pub const BEACON_MAX_PAYLOAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportFailure {
    #[error("http status {0}")]
    HttpStatus(u16),
    #[error("network: {0}")]
    Network(String),
    #[error("payload encode failed: {0}")]
    Encode(String),
    #[error("rejected: {0}")]
    Rejected(&'static str),
}

/// Where postbacks go: the same-origin relay, or the affiliate URL itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostbackEndpoint {
    Relay(Url),
    Direct(Url),
}

impl PostbackEndpoint {
    fn url(&self) -> &Url {
        match self {
            PostbackEndpoint::Relay(url) | PostbackEndpoint::Direct(url) => url,
        }
    }

    /// Endpoint URL with every event field flattened into the query.
    pub fn flattened_url(&self, event: &PostbackEvent) -> Url {
        let pairs = match self {
            PostbackEndpoint::Relay(_) => event.relay_query_pairs(),
            PostbackEndpoint::Direct(_) => event.direct_query_pairs(),
        };
        let mut url = self.url().clone();
        url.query_pairs_mut().extend_pairs(pairs);
        url
    }
}

/// How fire-and-forget transports hand off their request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireMode {
    /// Issue on the calling thread. Used where the process may exit right
    /// after the call.
    Inline,
    /// Issue on a detached thread and return immediately.
    Detached,
}

/// One delivery mechanism in the cascade.
pub trait PostbackTransport: Send + Sync {
    fn kind(&self) -> TransportKind;
    fn deliver(&self, event: &PostbackEvent) -> Result<(), TransportFailure>;
}

/// JSON POST to the relay; success only on a 2xx reply.
pub struct KeepaliveRelayTransport {
    relay_url: Url,
    http: Arc<dyn PostbackHttp>,
}

impl KeepaliveRelayTransport {
    pub fn new(relay_url: Url, http: Arc<dyn PostbackHttp>) -> Self {
        Self { relay_url, http }
    }
}

impl PostbackTransport for KeepaliveRelayTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::KeepaliveFetch
    }

    fn deliver(&self, event: &PostbackEvent) -> Result<(), TransportFailure> {
        let body = serde_json::to_string(&event.relay_payload())
            .map_err(|err| TransportFailure::Encode(err.to_string()))?;
        let reply = self
            .http
            .post_json(&self.relay_url, &body)
            .map_err(|err| TransportFailure::Network(err.to_string()))?;
        if reply.is_success() {
            Ok(())
        } else {
            Err(TransportFailure::HttpStatus(reply.status))
        }
    }
}

/// Best-effort beacon: success means the request was queued, not delivered.
pub struct BeaconTransport {
    endpoint: PostbackEndpoint,
    http: Arc<dyn PostbackHttp>,
    fire_mode: FireMode,
}

impl BeaconTransport {
    pub fn new(endpoint: PostbackEndpoint, http: Arc<dyn PostbackHttp>, fire_mode: FireMode) -> Self {
        Self {
            endpoint,
            http,
            fire_mode,
        }
    }
}

impl PostbackTransport for BeaconTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Beacon
    }

    fn deliver(&self, event: &PostbackEvent) -> Result<(), TransportFailure> {
        let request = match &self.endpoint {
            PostbackEndpoint::Relay(url) => {
                let body = serde_json::to_string(&event.relay_payload())
                    .map_err(|err| TransportFailure::Encode(err.to_string()))?;
                if body.len() > BEACON_MAX_PAYLOAD_BYTES {
                    return Err(TransportFailure::Rejected("beacon payload too large"));
                }
                BeaconRequest::Json(url.clone(), body)
            }
            PostbackEndpoint::Direct(_) => {
                BeaconRequest::Empty(self.endpoint.flattened_url(event))
            }
        };
        let http = self.http.clone();
        match self.fire_mode {
            FireMode::Inline => request
                .send(http.as_ref())
                .map_err(TransportFailure::Network),
            FireMode::Detached => std::thread::Builder::new()
                .name("postback-beacon".to_string())
                .spawn(move || {
                    if let Err(err) = request.send(http.as_ref()) {
                        tracing::debug!(error = %err, "detached beacon failed");
                    }
                })
                .map(|_| ())
                .map_err(|err| TransportFailure::Network(err.to_string())),
        }
    }
}

enum BeaconRequest {
    Json(Url, String),
    Empty(Url),
}

impl BeaconRequest {
    /// Accepted once the request leaves; the reply status is not inspected.
    fn send(&self, http: &dyn PostbackHttp) -> Result<(), String> {
        let result = match self {
            BeaconRequest::Json(url, body) => http.post_json(url, body),
            BeaconRequest::Empty(url) => http.post_empty(url),
        };
        result.map(|_| ()).map_err(|err| err.to_string())
    }
}

/// One-pixel GET with the payload flattened into the query. Reported as
/// sent as soon as it is issued; nothing about the outcome is observable.
pub struct PixelTransport {
    endpoint: PostbackEndpoint,
    http: Arc<dyn PostbackHttp>,
    fire_mode: FireMode,
}

impl PixelTransport {
    pub fn new(endpoint: PostbackEndpoint, http: Arc<dyn PostbackHttp>, fire_mode: FireMode) -> Self {
        Self {
            endpoint,
            http,
            fire_mode,
        }
    }
}

impl PostbackTransport for PixelTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Pixel
    }

    fn deliver(&self, event: &PostbackEvent) -> Result<(), TransportFailure> {
        let url = self.endpoint.flattened_url(event);
        let http = self.http.clone();
        match self.fire_mode {
            FireMode::Inline => {
                let _ = http.get(&url);
                Ok(())
            }
            FireMode::Detached => std::thread::Builder::new()
                .name("postback-pixel".to_string())
                .spawn(move || {
                    let _ = http.get(&url);
                })
                .map(|_| ())
                .map_err(|err| TransportFailure::Network(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpFailure, HttpReply};
    use funnel_contracts::attribution::{ClickId, TrackingParameterSet};
    use funnel_contracts::postback::{FunnelStage, PostbackMode};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHttp {
        status: u16,
        offline: bool,
        calls: Mutex<Vec<(String, String, String)>>,
    }

    impl RecordingHttp {
        fn replying(status: u16) -> Arc<Self> {
            Arc::new(Self {
                status,
                ..Self::default()
            })
        }

        fn offline() -> Arc<Self> {
            Arc::new(Self {
                offline: true,
                ..Self::default()
            })
        }

        fn record(&self, method: &str, url: &Url, body: &str) -> Result<HttpReply, HttpFailure> {
            self.calls
                .lock()
                .unwrap()
                .push((method.to_string(), url.to_string(), body.to_string()));
            if self.offline {
                return Err(HttpFailure::Network("offline".to_string()));
            }
            Ok(HttpReply {
                status: self.status,
                body_preview: String::new(),
            })
        }

        fn calls(&self) -> Vec<(String, String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PostbackHttp for RecordingHttp {
        fn post_json(&self, url: &Url, body: &str) -> Result<HttpReply, HttpFailure> {
            self.record("POST", url, body)
        }
        fn post_empty(&self, url: &Url) -> Result<HttpReply, HttpFailure> {
            self.record("POST", url, "")
        }
        fn get(&self, url: &Url) -> Result<HttpReply, HttpFailure> {
            self.record("GET", url, "")
        }
    }

    fn event(mode: PostbackMode) -> PostbackEvent {
        PostbackEvent::v1(
            FunnelStage::Block2Completed,
            ClickId::parse("c1").unwrap(),
            Some("s1".to_string()),
            "/block-2",
            &TrackingParameterSet::from_query("utm_source=fb&cnv_id=bad"),
            mode,
        )
        .unwrap()
    }

    fn relay_url() -> Url {
        Url::parse("https://quiz.example/api/tracking/mobi-slon-event").unwrap()
    }

    #[test]
    fn at_transport_01_keepalive_posts_json_and_requires_2xx() {
        let http = RecordingHttp::replying(204);
        let t = KeepaliveRelayTransport::new(relay_url(), http.clone());
        assert_eq!(t.deliver(&event(PostbackMode::Relay)), Ok(()));
        let calls = http.calls();
        assert_eq!(calls[0].0, "POST");
        let body: serde_json::Value = serde_json::from_str(&calls[0].2).unwrap();
        assert_eq!(body["status"], "block2_completed");
        assert_eq!(body["clickid"], "c1");
        assert_eq!(body["session_id"], "s1");
        assert_eq!(body["page_path"], "/block-2");
        assert_eq!(body["tracking_params"]["utm_source"], "fb");

        let t = KeepaliveRelayTransport::new(relay_url(), RecordingHttp::replying(500));
        assert_eq!(
            t.deliver(&event(PostbackMode::Relay)),
            Err(TransportFailure::HttpStatus(500))
        );
    }

    #[test]
    fn at_transport_02_beacon_accepts_regardless_of_status_but_not_offline() {
        let t = BeaconTransport::new(
            PostbackEndpoint::Relay(relay_url()),
            RecordingHttp::replying(500),
            FireMode::Inline,
        );
        assert_eq!(t.deliver(&event(PostbackMode::Relay)), Ok(()));

        let t = BeaconTransport::new(
            PostbackEndpoint::Relay(relay_url()),
            RecordingHttp::offline(),
            FireMode::Inline,
        );
        assert!(matches!(
            t.deliver(&event(PostbackMode::Relay)),
            Err(TransportFailure::Network(_))
        ));
    }

    #[test]
    fn at_transport_03_direct_beacon_uses_affiliate_params() {
        let http = RecordingHttp::replying(200);
        let t = BeaconTransport::new(
            PostbackEndpoint::Direct(Url::parse("https://aff.example/index.php").unwrap()),
            http.clone(),
            FireMode::Inline,
        );
        t.deliver(&event(PostbackMode::Direct)).unwrap();
        let calls = http.calls();
        assert_eq!(
            calls[0].1,
            "https://aff.example/index.php?cnv_id=c1&payout=0&cnv_status=block2_completed&utm_source=fb"
        );
        assert_eq!(calls[0].2, "");
    }

    #[test]
    fn at_transport_04_pixel_reports_sent_even_when_offline() {
        let http = RecordingHttp::offline();
        let t = PixelTransport::new(PostbackEndpoint::Relay(relay_url()), http.clone(), FireMode::Inline);
        assert_eq!(t.deliver(&event(PostbackMode::Relay)), Ok(()));
        let calls = http.calls();
        assert_eq!(calls[0].0, "GET");
        let url = Url::parse(&calls[0].1).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("status".to_string(), "block2_completed".to_string())));
        assert!(pairs.contains(&("clickid".to_string(), "c1".to_string())));
        assert!(pairs.contains(&("utm_source".to_string(), "fb".to_string())));
    }

    #[test]
    fn at_transport_05_oversized_beacon_is_rejected() {
        let big = "x".repeat(BEACON_MAX_PAYLOAD_BYTES);
        let mut tracking = TrackingParameterSet::new();
        tracking.set("blob", big);
        let ev = PostbackEvent::v1(
            FunnelStage::StartQuiz,
            ClickId::parse("c1").unwrap(),
            None,
            "/",
            &tracking,
            PostbackMode::Relay,
        )
        .unwrap();
        let t = BeaconTransport::new(
            PostbackEndpoint::Relay(relay_url()),
            RecordingHttp::replying(200),
            FireMode::Inline,
        );
        assert_eq!(
            t.deliver(&ev),
            Err(TransportFailure::Rejected("beacon payload too large"))
        );
    }
}
