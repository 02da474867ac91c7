#![forbid(unsafe_code)]

use std::time::Duration;

use thiserror::Error;
use url::Url;

const REPLY_BODY_PREVIEW_LEN: usize = 180;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    /// First bytes of the body, newlines flattened, for logging.
    pub body_preview: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpFailure {
    #[error("network error: {0}")]
    Network(String),
}

/// Outbound HTTP used by postback transports and the relay forwarder.
/// Non-2xx responses are replies, not failures.
pub trait PostbackHttp: Send + Sync {
    fn post_json(&self, url: &Url, body: &str) -> Result<HttpReply, HttpFailure>;
    fn post_empty(&self, url: &Url) -> Result<HttpReply, HttpFailure>;
    fn get(&self, url: &Url) -> Result<HttpReply, HttpFailure>;
}

#[derive(Debug, Clone)]
pub struct UreqPostbackHttp {
    agent: ureq::Agent,
}

impl UreqPostbackHttp {
    pub fn new(timeout_ms: u64) -> Self {
        let timeout = Duration::from_millis(timeout_ms);
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self { agent }
    }
}

impl PostbackHttp for UreqPostbackHttp {
    fn post_json(&self, url: &Url, body: &str) -> Result<HttpReply, HttpFailure> {
        reply_from(
            self.agent
                .post(url.as_str())
                .set("content-type", "application/json")
                .set("connection", "keep-alive")
                .send_string(body),
        )
    }

    fn post_empty(&self, url: &Url) -> Result<HttpReply, HttpFailure> {
        reply_from(self.agent.post(url.as_str()).call())
    }

    fn get(&self, url: &Url) -> Result<HttpReply, HttpFailure> {
        reply_from(self.agent.get(url.as_str()).call())
    }
}

fn reply_from(result: Result<ureq::Response, ureq::Error>) -> Result<HttpReply, HttpFailure> {
    match result {
        Ok(resp) => Ok(into_reply(resp)),
        Err(ureq::Error::Status(_, resp)) => Ok(into_reply(resp)),
        Err(ureq::Error::Transport(err)) => Err(HttpFailure::Network(err.to_string())),
    }
}

fn into_reply(resp: ureq::Response) -> HttpReply {
    let status = resp.status();
    let body = resp.into_string().unwrap_or_default();
    HttpReply {
        status,
        body_preview: preview(&body),
    }
}

fn preview(body: &str) -> String {
    body.chars()
        .take(REPLY_BODY_PREVIEW_LEN)
        .collect::<String>()
        .replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::OneShotServer;

    #[test]
    fn at_http_01_non_2xx_is_a_reply_not_a_failure() {
        let server = OneShotServer::respond(500, "boom");
        let http = UreqPostbackHttp::new(2_000);
        let reply = http
            .post_json(&server.url("/relay"), r#"{"status":"start_quiz"}"#)
            .unwrap();
        assert_eq!(reply.status, 500);
        assert!(!reply.is_success());
        assert_eq!(reply.body_preview, "boom");
        let request = server.join();
        assert!(request.starts_with("POST /relay"));
        assert!(request.contains(r#"{"status":"start_quiz"}"#));
    }

    #[test]
    fn at_http_02_connection_refused_is_a_network_failure() {
        let url = OneShotServer::unused_url();
        let http = UreqPostbackHttp::new(500);
        assert!(matches!(http.get(&url), Err(HttpFailure::Network(_))));
    }
}
