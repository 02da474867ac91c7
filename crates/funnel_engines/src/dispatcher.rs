#![forbid(unsafe_code)]

use std::sync::Arc;

use funnel_contracts::attribution::{query_flag_enabled, FORCE_POSTBACK_PARAM};
use funnel_contracts::postback::{FunnelStage, PostbackEvent, PostbackMode, SendOnceOutcome};
use funnel_storage::AttributionStore;

use crate::attribution::AttributionResolver;
use crate::config::FunnelConfig;
use crate::http::PostbackHttp;
use crate::tracking_log::TrackingLogger;
use crate::transport::{
    BeaconTransport, FireMode, KeepaliveRelayTransport, PixelTransport, PostbackEndpoint,
    PostbackTransport,
};

const LOG_SCOPE: &str = "postback";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOnceOptions {
    pub session_id: Option<String>,
    pub page_path: String,
}

impl SendOnceOptions {
    pub fn page(page_path: impl Into<String>) -> Self {
        Self {
            session_id: None,
            page_path: page_path.into(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Sends each funnel-stage postback at most once per
/// (stage, click id, session) within a browsing session.
pub struct PostbackDispatcher {
    resolver: AttributionResolver,
    mode: PostbackMode,
    transports: Vec<Box<dyn PostbackTransport>>,
    debug_default: bool,
}

impl PostbackDispatcher {
    /// Transports are tried in the given order.
    pub fn new(
        resolver: AttributionResolver,
        mode: PostbackMode,
        transports: Vec<Box<dyn PostbackTransport>>,
        debug_default: bool,
    ) -> Self {
        Self {
            resolver,
            mode,
            transports,
            debug_default,
        }
    }

    /// Keep-alive relay POST, then beacon, then pixel, all against the relay.
    pub fn relay_cascade(
        resolver: AttributionResolver,
        relay_url: url::Url,
        http: Arc<dyn PostbackHttp>,
        fire_mode: FireMode,
        debug_default: bool,
    ) -> Self {
        let endpoint = PostbackEndpoint::Relay(relay_url.clone());
        let transports: Vec<Box<dyn PostbackTransport>> = vec![
            Box::new(KeepaliveRelayTransport::new(relay_url, http.clone())),
            Box::new(BeaconTransport::new(endpoint.clone(), http.clone(), fire_mode)),
            Box::new(PixelTransport::new(endpoint, http, fire_mode)),
        ];
        Self::new(resolver, PostbackMode::Relay, transports, debug_default)
    }

    /// Beacon, then pixel, straight to the affiliate postback URL.
    pub fn direct(
        resolver: AttributionResolver,
        postback_url: url::Url,
        http: Arc<dyn PostbackHttp>,
        fire_mode: FireMode,
        debug_default: bool,
    ) -> Self {
        let endpoint = PostbackEndpoint::Direct(postback_url);
        let transports: Vec<Box<dyn PostbackTransport>> = vec![
            Box::new(BeaconTransport::new(endpoint.clone(), http.clone(), fire_mode)),
            Box::new(PixelTransport::new(endpoint, http, fire_mode)),
        ];
        Self::new(resolver, PostbackMode::Direct, transports, debug_default)
    }

    pub fn from_config(
        config: &FunnelConfig,
        resolver: AttributionResolver,
        http: Arc<dyn PostbackHttp>,
        fire_mode: FireMode,
    ) -> Self {
        match config.postback_mode {
            PostbackMode::Relay => Self::relay_cascade(
                resolver,
                config.relay_endpoint.clone(),
                http,
                fire_mode,
                config.tracking_debug,
            ),
            PostbackMode::Direct => Self::direct(
                resolver,
                config.direct_postback_url(),
                http,
                fire_mode,
                config.tracking_debug,
            ),
        }
    }

    pub fn mode(&self) -> PostbackMode {
        self.mode
    }

    pub fn store(&self) -> &Arc<AttributionStore> {
        self.resolver.store()
    }

    /// Never fails: every outcome, including transport failure, is reported
    /// through `SendOnceOutcome` and the funnel carries on regardless.
    pub fn send_once(
        &self,
        stage: FunnelStage,
        query: &str,
        opts: &SendOnceOptions,
    ) -> SendOnceOutcome {
        let store = self.resolver.store();
        let log = TrackingLogger::from_store(store, self.debug_default);

        let Some(click_id) = self.resolver.resolve(query) else {
            log.info(LOG_SCOPE, "skipped: no click id", stage.as_str());
            return SendOnceOutcome::SkippedNoClickId;
        };

        let event = match PostbackEvent::v1(
            stage,
            click_id,
            opts.session_id.clone(),
            opts.page_path.clone(),
            &store.tracking_params(),
            self.mode,
        ) {
            Ok(event) => event,
            Err(err) => {
                log.warn(LOG_SCOPE, "skipped: invalid event", &err.to_string());
                return SendOnceOutcome::Failed;
            }
        };
        let key = event.dedupe_key();
        let forced = query_flag_enabled(query, FORCE_POSTBACK_PARAM);

        // Direct mode keeps no in-flight markers; the confirmed check is the
        // only guard there.
        let _in_flight = match self.mode {
            PostbackMode::Relay if forced => store.begin_in_flight(&key),
            PostbackMode::Relay => match store.begin_in_flight(&key) {
                Some(guard) => Some(guard),
                None => {
                    log.info(LOG_SCOPE, "skipped: in flight", &key.composite());
                    return SendOnceOutcome::SkippedInFlight;
                }
            },
            PostbackMode::Direct => None,
        };
        if !forced && store.is_confirmed(&key) {
            log.info(LOG_SCOPE, "skipped: already sent", &key.composite());
            return SendOnceOutcome::SkippedConfirmed;
        }

        for transport in &self.transports {
            match transport.deliver(&event) {
                Ok(()) => {
                    store.mark_confirmed(&key);
                    log.info(LOG_SCOPE, "sent", transport.kind().as_str());
                    return SendOnceOutcome::Sent(transport.kind());
                }
                Err(err) => {
                    let details = format!("{}: {}", transport.kind().as_str(), err);
                    log.warn(LOG_SCOPE, "transport failed", &details);
                }
            }
        }
        log.error(LOG_SCOPE, "all transports failed", &key.composite());
        SendOnceOutcome::Failed
    }
}
