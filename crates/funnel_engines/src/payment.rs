#![forbid(unsafe_code)]

use std::time::Duration;

use funnel_contracts::payment::{
    CheckoutSessionRequest, CheckoutSessionResponse, CustomerPortalRequest,
    CustomerPortalResponse, PaymentSessionStatus,
};
use funnel_contracts::{ContractViolation, Validate};
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

pub const CHECKOUT_SESSION_PATH: &str = "/api/payment/checkout-session";
pub const SESSION_STATUS_PATH: &str = "/api/payment/session-status";
pub const CUSTOMER_PORTAL_PATH: &str = "/api/payment/customer-portal";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentApiError {
    #[error("payment api returned http {0}")]
    Status(u16),
    #[error("payment api transport error: {0}")]
    Transport(String),
    #[error("payment api response decode failed: {0}")]
    Decode(String),
    #[error(transparent)]
    Contract(#[from] ContractViolation),
}

/// Same-origin checkout backend. The provider behind it is opaque.
pub trait PaymentApi: Send + Sync {
    fn create_checkout_session(
        &self,
        req: &CheckoutSessionRequest,
    ) -> Result<CheckoutSessionResponse, PaymentApiError>;

    fn session_status(&self, session_id: &str) -> Result<PaymentSessionStatus, PaymentApiError>;

    fn customer_portal(&self, email: &str) -> Result<CustomerPortalResponse, PaymentApiError>;
}

#[derive(Debug, Clone)]
pub struct PaymentApiClient {
    origin: Url,
    agent: ureq::Agent,
}

impl PaymentApiClient {
    pub fn new(origin: Url, timeout_ms: u64) -> Self {
        let timeout = Duration::from_millis(timeout_ms.max(100));
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self { origin, agent }
    }

    fn endpoint(&self, path: &str) -> Result<Url, PaymentApiError> {
        self.origin
            .join(path)
            .map_err(|e| PaymentApiError::Transport(format!("bad endpoint {path}: {e}")))
    }
}

impl PaymentApi for PaymentApiClient {
    fn create_checkout_session(
        &self,
        req: &CheckoutSessionRequest,
    ) -> Result<CheckoutSessionResponse, PaymentApiError> {
        req.validate()?;
        let url = self.endpoint(CHECKOUT_SESSION_PATH)?;
        let resp: CheckoutSessionResponse = decode(
            self.agent
                .post(url.as_str())
                .set("content-type", "application/json")
                .send_json(req),
        )?;
        resp.validate()?;
        Ok(resp)
    }

    fn session_status(&self, session_id: &str) -> Result<PaymentSessionStatus, PaymentApiError> {
        let mut url = self.endpoint(SESSION_STATUS_PATH)?;
        url.query_pairs_mut().append_pair("session_id", session_id);
        let status: PaymentSessionStatus = decode(self.agent.get(url.as_str()).call())?;
        status.validate()?;
        Ok(status)
    }

    fn customer_portal(&self, email: &str) -> Result<CustomerPortalResponse, PaymentApiError> {
        let url = self.endpoint(CUSTOMER_PORTAL_PATH)?;
        let body = CustomerPortalRequest {
            email: email.to_string(),
        };
        decode(
            self.agent
                .post(url.as_str())
                .set("content-type", "application/json")
                .send_json(&body),
        )
    }
}

fn decode<T: DeserializeOwned>(
    result: Result<ureq::Response, ureq::Error>,
) -> Result<T, PaymentApiError> {
    match result {
        Ok(resp) if (200..=299).contains(&resp.status()) => {
            serde_json::from_reader(resp.into_reader())
                .map_err(|e| PaymentApiError::Decode(e.to_string()))
        }
        Ok(resp) => Err(PaymentApiError::Status(resp.status())),
        Err(ureq::Error::Status(code, _)) => Err(PaymentApiError::Status(code)),
        Err(ureq::Error::Transport(err)) => Err(PaymentApiError::Transport(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::OneShotServer;
    use funnel_contracts::payment::{CheckoutMode, Locale};

    fn client_for(server: &OneShotServer) -> PaymentApiClient {
        PaymentApiClient::new(server.url("/"), 2_000)
    }

    #[test]
    fn at_payment_api_01_checkout_session_round_trip() {
        let server = OneShotServer::respond(
            200,
            r#"{"checkout_url":"https://pay.example/c/1","session_id":"cs_1","order_id":"o_1"}"#,
        );
        let client = client_for(&server);
        let resp = client
            .create_checkout_session(&CheckoutSessionRequest {
                mode: CheckoutMode::Subscription,
                plan: "sub_monthly".to_string(),
                email: "a@b.c".to_string(),
                clickid: "c1".to_string(),
                locale: Some(Locale::Ru),
            })
            .unwrap();
        assert_eq!(resp.session_id, "cs_1");
        let request = server.join();
        assert!(request.starts_with("POST /api/payment/checkout-session"));
        assert!(request.contains(r#""clickid":"c1""#));
        assert!(request.contains(r#""locale":"ru""#));
    }

    #[test]
    fn at_payment_api_02_session_status_encodes_id() {
        let server = OneShotServer::respond(
            200,
            r#"{"payment_status":"unpaid","fulfillment_status":"pending","access_status":"none","activation_link":null}"#,
        );
        let status = client_for(&server).session_status("cs 1").unwrap();
        assert!(!status.is_paid());
        assert!(server
            .join()
            .starts_with("GET /api/payment/session-status?session_id=cs+1"));
    }

    #[test]
    fn at_payment_api_03_non_2xx_is_status_error() {
        let server = OneShotServer::respond(502, "bad gateway");
        let err = client_for(&server).session_status("cs_1").unwrap_err();
        assert_eq!(err, PaymentApiError::Status(502));
        server.join();
    }

    #[test]
    fn at_payment_api_04_garbage_body_is_decode_error() {
        let server = OneShotServer::respond(200, "not json");
        let err = client_for(&server).customer_portal("a@b.c").unwrap_err();
        assert!(matches!(err, PaymentApiError::Decode(_)));
        assert!(server.join().contains(r#"{"email":"a@b.c"}"#));
    }

    #[test]
    fn at_payment_api_05_missing_clickid_never_hits_network() {
        let client = PaymentApiClient::new(OneShotServer::unused_url(), 500);
        let err = client
            .create_checkout_session(&CheckoutSessionRequest {
                mode: CheckoutMode::OneTime,
                plan: "one".to_string(),
                email: "a@b.c".to_string(),
                clickid: String::new(),
                locale: None,
            })
            .unwrap_err();
        assert!(matches!(err, PaymentApiError::Contract(_)));
    }
}
