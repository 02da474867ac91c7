#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;

use funnel_contracts::attribution::RuntimeTokens;
use funnel_engines::attribution::StaticEnvironment;
use funnel_engines::config::FunnelConfig;
use funnel_engines::http::UreqPostbackHttp;
use funnel_engines::payment::PaymentApiClient;
use funnel_os::payment_status::ThreadSleeper;
use funnel_storage::{AttributionStore, CookieJar, JsonFileStorage};
use funnel_tools::funnel_cli::{execute_funnel_command, FunnelSession};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().skip(1).collect();
    let config = FunnelConfig::from_env();
    tracing::debug!(session_file = %config.session_file, command = ?args.first(), "funnel cli");

    // Both storage scopes share one file; their keys never overlap.
    let file = Arc::new(JsonFileStorage::open(&config.session_file));
    let store = Arc::new(AttributionStore::new(file.clone(), file));
    let cookies = env::var("FUNNEL_COOKIE").unwrap_or_default();
    let environment = Arc::new(StaticEnvironment::new(
        RuntimeTokens::new(
            env::var("FUNNEL_TOKEN_CLICKID").ok().as_deref(),
            env::var("FUNNEL_TOKEN_BCID").ok().as_deref(),
        ),
        CookieJar::parse(&cookies),
    ));
    let session = FunnelSession::new(
        &config,
        store,
        environment,
        Arc::new(UreqPostbackHttp::new(config.http_timeout_ms)),
        Arc::new(PaymentApiClient::new(config.origin.clone(), config.http_timeout_ms)),
        Arc::new(ThreadSleeper),
    );

    let output = execute_funnel_command(&session, &args)?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
