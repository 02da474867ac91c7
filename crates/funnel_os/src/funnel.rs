#![forbid(unsafe_code)]

use std::sync::Arc;

use funnel_contracts::attribution::ClickId;
use funnel_contracts::postback::FunnelStage;
use funnel_engines::attribution::AttributionResolver;
use funnel_engines::dispatcher::{PostbackDispatcher, SendOnceOptions};
use funnel_engines::tracking_log::apply_debug_toggle;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequencerError {
    #[error("unknown quiz block {0}")]
    UnknownBlock(u8),
    #[error("quiz block {0} has no questions")]
    NoQuestions(u8),
    #[error("stage is not completed yet")]
    NotCompleted,
}

/// Receives stage completions. Callers never wait on or observe the result.
pub trait StageSink: Send + Sync {
    fn stage_completed(&self, stage: FunnelStage, query: &str, opts: &SendOnceOptions);
}

impl StageSink for PostbackDispatcher {
    fn stage_completed(&self, stage: FunnelStage, query: &str, opts: &SendOnceOptions) {
        let outcome = self.send_once(stage, query, opts);
        tracing::debug!(stage = stage.as_str(), ?outcome, "stage postback");
    }
}

/// Runs each postback on its own thread so the page transition never waits
/// on the network.
pub struct BackgroundDispatch {
    dispatcher: Arc<PostbackDispatcher>,
}

impl BackgroundDispatch {
    pub fn new(dispatcher: Arc<PostbackDispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl StageSink for BackgroundDispatch {
    fn stage_completed(&self, stage: FunnelStage, query: &str, opts: &SendOnceOptions) {
        let dispatcher = self.dispatcher.clone();
        let query = query.to_string();
        let opts = opts.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("postback-{}", stage.as_str()))
            .spawn(move || dispatcher.stage_completed(stage, &query, &opts));
        if let Err(err) = spawned {
            tracing::warn!(stage = stage.as_str(), error = %err, "postback thread spawn failed");
        }
    }
}

/// Shared wiring for every funnel page: where stage completions go and how
/// in-app navigation targets keep the tracking query.
#[derive(Clone)]
pub struct FunnelContext {
    sink: Arc<dyn StageSink>,
    resolver: Arc<AttributionResolver>,
    origin: Url,
    session_id: Option<String>,
}

impl FunnelContext {
    pub fn new(sink: Arc<dyn StageSink>, resolver: Arc<AttributionResolver>, origin: Url) -> Self {
        Self {
            sink,
            resolver,
            origin,
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn resolver(&self) -> &Arc<AttributionResolver> {
        &self.resolver
    }

    /// Entry point for every page render: persists the `mobi_debug` toggle
    /// and merges the query into the stored tracking parameters.
    pub fn page_loaded(&self, query: &str) -> Option<ClickId> {
        apply_debug_toggle(self.resolver.store(), query);
        self.resolver.resolve(query)
    }

    pub fn path_with_tracking(&self, path: &str, query: &str) -> String {
        self.resolver.path_with_tracking(&self.origin, path, query)
    }

    /// Reports `stage` for `page_path` and returns `next_path` with the
    /// tracking query attached.
    pub fn complete_stage(
        &self,
        stage: FunnelStage,
        page_path: &str,
        next_path: &str,
        query: &str,
    ) -> String {
        apply_debug_toggle(self.resolver.store(), query);
        let mut opts = SendOnceOptions::page(page_path);
        opts.session_id = self.session_id.clone();
        self.sink.stage_completed(stage, query, &opts);
        self.path_with_tracking(next_path, query)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::context;
    use super::*;

    #[test]
    fn at_funnel_01_complete_stage_reports_and_keeps_tracking() {
        let (ctx, sink) = context();
        let next = ctx.complete_stage(
            FunnelStage::Block2Completed,
            "/block-2",
            "/block-3",
            "?clickid=c1&utm_source=fb",
        );
        assert_eq!(next, "/block-3?clickid=c1&utm_source=fb");
        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, FunnelStage::Block2Completed);
        assert_eq!(calls[0].2, "/block-2");
    }

    #[test]
    fn at_funnel_02_tracking_survives_query_less_pages() {
        let (ctx, _sink) = context();
        ctx.path_with_tracking("/block-1", "?clickid=c1");
        assert_eq!(ctx.path_with_tracking("/block-2", ""), "/block-2?clickid=c1");
    }

    #[test]
    fn at_funnel_03_inbound_debug_toggle_is_persisted() {
        let (ctx, _sink) = context();
        let store = ctx.resolver().store().clone();
        assert_eq!(
            ctx.page_loaded("?clickid=c1&mobi_debug=1").map(|c| c.to_string()),
            Some("c1".to_string())
        );
        assert_eq!(store.debug_logging(), Some(true));
        ctx.complete_stage(FunnelStage::StartQuiz, "/", "/block-1", "?mobi_debug=0");
        assert_eq!(store.debug_logging(), Some(false));
    }
}
