#![forbid(unsafe_code)]

use std::sync::Arc;

use funnel_contracts::postback::{FunnelStage, SendOnceOutcome};
use funnel_engines::attribution::{AttributionEnvironment, AttributionResolver};
use funnel_engines::config::FunnelConfig;
use funnel_engines::dispatcher::{PostbackDispatcher, SendOnceOptions};
use funnel_engines::http::PostbackHttp;
use funnel_engines::link_rewriter::{InMemoryDocument, LinkRewriter};
use funnel_engines::payment::PaymentApi;
use funnel_engines::tracking_log::apply_debug_toggle;
use funnel_engines::transport::FireMode;
use funnel_os::payment_status::{PaymentStatusPoller, Sleeper};
use funnel_storage::AttributionStore;
use url::Url;

pub const USAGE: &str = "usage: funnel <resolve|params|rewrite|postback|payment-status> ...\n  \
    funnel resolve <query>\n  \
    funnel params <query>\n  \
    funnel rewrite <query> <href>...\n  \
    funnel postback <stage> <query> [page_path] [session_id]\n  \
    funnel payment-status <session_id> [max_polls]";

const DEFAULT_MAX_POLLS: u32 = 20;

/// One browsing session as seen from the command line: a persisted
/// attribution store plus everything wired on top of it.
pub struct FunnelSession {
    origin: Url,
    resolver: AttributionResolver,
    dispatcher: PostbackDispatcher,
    payment: Arc<dyn PaymentApi>,
    sleeper: Arc<dyn Sleeper>,
}

impl FunnelSession {
    pub fn new(
        config: &FunnelConfig,
        store: Arc<AttributionStore>,
        env: Arc<dyn AttributionEnvironment>,
        http: Arc<dyn PostbackHttp>,
        payment: Arc<dyn PaymentApi>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let resolver = AttributionResolver::new(store, env);
        // Inline: the process exits right after the command.
        let dispatcher =
            PostbackDispatcher::from_config(config, resolver.clone(), http, FireMode::Inline);
        Self {
            origin: config.origin.clone(),
            resolver,
            dispatcher,
            payment,
            sleeper,
        }
    }
}

pub fn execute_funnel_command(session: &FunnelSession, args: &[String]) -> Result<String, String> {
    let subcommand = args.first().ok_or_else(|| USAGE.to_string())?.as_str();
    match subcommand {
        "resolve" => {
            let query = arg(args, 1, "query")?;
            apply_debug_toggle(session.resolver.store(), query);
            Ok(session
                .resolver
                .resolve(query)
                .map(|c| c.as_str().to_string())
                .unwrap_or_else(|| "NONE".to_string()))
        }
        "params" => {
            let query = arg(args, 1, "query")?;
            Ok(session.resolver.merge_tracking_params(query).to_query_string())
        }
        "rewrite" => {
            let query = arg(args, 1, "query")?;
            let hrefs = &args[2.min(args.len())..];
            if hrefs.is_empty() {
                return Err(format!("missing href\n{USAGE}"));
            }
            let mut doc = InMemoryDocument::new(hrefs.iter().cloned());
            let click_id = session.resolver.resolve(query);
            LinkRewriter::new(session.origin.clone()).propagate_to_links(&mut doc, click_id.as_ref());
            Ok((0..hrefs.len())
                .map(|i| doc.href(i).unwrap_or_default().to_string())
                .collect::<Vec<_>>()
                .join("\n"))
        }
        "postback" => {
            let raw_stage = arg(args, 1, "stage")?;
            let stage = FunnelStage::parse(raw_stage).ok_or_else(|| {
                let allowed: Vec<&str> = FunnelStage::ALL.iter().map(|s| s.as_str()).collect();
                format!("unknown stage '{raw_stage}'. allowed: {}", allowed.join(", "))
            })?;
            let query = arg(args, 2, "query")?;
            apply_debug_toggle(session.resolver.store(), query);
            let page_path = args.get(3).map(String::as_str).unwrap_or("/");
            let mut opts = SendOnceOptions::page(page_path);
            if let Some(session_id) = args.get(4) {
                opts = opts.with_session(session_id.as_str());
            }
            let outcome = session.dispatcher.send_once(stage, query, &opts);
            Ok(describe_outcome(outcome))
        }
        "payment-status" => {
            let session_id = arg(args, 1, "session_id")?;
            let max_polls = match args.get(2) {
                Some(raw) => raw
                    .parse::<u32>()
                    .ok()
                    .filter(|v| *v > 0)
                    .ok_or_else(|| format!("invalid max_polls '{raw}'"))?,
                None => DEFAULT_MAX_POLLS,
            };
            let poller = PaymentStatusPoller::new(session.payment.clone(), session.sleeper.clone());
            let report = poller
                .poll_until_paid(Some(session_id), max_polls)
                .map_err(|e| e.to_string())?;
            let mut lines = Vec::new();
            match &report.status {
                Some(status) => lines.push(format!(
                    "payment={} fulfillment={} access={}",
                    status.payment_status, status.fulfillment_status, status.access_status
                )),
                None => lines.push("payment=UNKNOWN".to_string()),
            }
            if let Some(link) = report.activation_link() {
                lines.push(format!("activation_link={link}"));
            }
            if let Some(err) = &report.last_error {
                lines.push(format!("last_error={err}"));
            }
            lines.push(format!("polls={}", report.polls));
            Ok(lines.join("\n"))
        }
        _ => Err(format!("unknown subcommand: {subcommand}\n{USAGE}")),
    }
}

fn arg<'a>(args: &'a [String], index: usize, what: &str) -> Result<&'a str, String> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| format!("missing {what}\n{USAGE}"))
}

pub fn describe_outcome(outcome: SendOnceOutcome) -> String {
    match outcome {
        SendOnceOutcome::Sent(kind) => format!("SENT {}", kind.as_str()),
        SendOnceOutcome::SkippedNoClickId => "SKIPPED no_click_id".to_string(),
        SendOnceOutcome::SkippedInFlight => "SKIPPED in_flight".to_string(),
        SendOnceOutcome::SkippedConfirmed => "SKIPPED already_sent".to_string(),
        SendOnceOutcome::Failed => "FAILED".to_string(),
    }
}
