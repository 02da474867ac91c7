#![forbid(unsafe_code)]

use std::sync::Arc;

use funnel_contracts::payment::{CheckoutMode, CheckoutSessionRequest, CheckoutSessionResponse};
use funnel_engines::attribution::AttributionResolver;
use funnel_engines::payment::{PaymentApi, PaymentApiError};
use thiserror::Error;

/// Every variant is shown to the buyer as the same retry-able message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckoutError {
    #[error("unable to start payment: clickid is missing")]
    MissingClickId,
    #[error("email is required")]
    MissingEmail,
    #[error(transparent)]
    Payment(#[from] PaymentApiError),
}

/// Pay page: starts a checkout session tagged with the visitor's click id
/// and locale, and opens the subscription management portal.
pub struct CheckoutFlow {
    payment: Arc<dyn PaymentApi>,
    resolver: Arc<AttributionResolver>,
}

impl CheckoutFlow {
    pub fn new(payment: Arc<dyn PaymentApi>, resolver: Arc<AttributionResolver>) -> Self {
        Self { payment, resolver }
    }

    pub fn start(
        &self,
        mode: CheckoutMode,
        plan: &str,
        email: &str,
        query: &str,
        browser_language: &str,
    ) -> Result<CheckoutSessionResponse, CheckoutError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(CheckoutError::MissingEmail);
        }
        let click_id = self
            .resolver
            .resolve(query)
            .ok_or(CheckoutError::MissingClickId)?;
        let locale = self.resolver.store().locale_or_detect(browser_language);
        let req = CheckoutSessionRequest {
            mode,
            plan: plan.to_string(),
            email: email.to_string(),
            clickid: click_id.as_str().to_string(),
            locale: Some(locale),
        };
        let resp = self.payment.create_checkout_session(&req).map_err(|err| {
            tracing::warn!(plan, error = %err, "checkout session failed");
            err
        })?;
        tracing::info!(session_id = %resp.session_id, order_id = %resp.order_id, "checkout session created");
        Ok(resp)
    }

    /// Returns the portal URL to redirect to.
    pub fn open_customer_portal(&self, email: &str) -> Result<String, CheckoutError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(CheckoutError::MissingEmail);
        }
        Ok(self.payment.customer_portal(email)?.portal_url)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use funnel_contracts::payment::{CustomerPortalResponse, PaymentSessionStatus};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct StubPaymentApi {
        pub checkout_requests: Mutex<Vec<CheckoutSessionRequest>>,
        pub statuses: Mutex<Vec<Result<PaymentSessionStatus, PaymentApiError>>>,
        pub status_calls: Mutex<u32>,
    }

    pub fn status(payment_status: &str) -> PaymentSessionStatus {
        PaymentSessionStatus {
            payment_status: payment_status.to_string(),
            fulfillment_status: "pending".to_string(),
            access_status: "none".to_string(),
            activation_link: None,
        }
    }

    impl PaymentApi for StubPaymentApi {
        fn create_checkout_session(
            &self,
            req: &CheckoutSessionRequest,
        ) -> Result<CheckoutSessionResponse, PaymentApiError> {
            self.checkout_requests.lock().unwrap().push(req.clone());
            Ok(CheckoutSessionResponse {
                checkout_url: "https://pay.example/c/1".to_string(),
                session_id: "cs_1".to_string(),
                order_id: "o_1".to_string(),
            })
        }

        fn session_status(&self, _session_id: &str) -> Result<PaymentSessionStatus, PaymentApiError> {
            *self.status_calls.lock().unwrap() += 1;
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.is_empty() {
                return Err(PaymentApiError::Status(404));
            }
            statuses.remove(0)
        }

        fn customer_portal(&self, email: &str) -> Result<CustomerPortalResponse, PaymentApiError> {
            Ok(CustomerPortalResponse {
                portal_url: format!("https://portal.example/{email}"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::StubPaymentApi;
    use super::*;
    use funnel_contracts::payment::Locale;
    use funnel_engines::attribution::StaticEnvironment;
    use funnel_storage::AttributionStore;

    fn flow() -> (CheckoutFlow, Arc<StubPaymentApi>, Arc<AttributionStore>) {
        let api = Arc::new(StubPaymentApi::default());
        let store = Arc::new(AttributionStore::in_memory());
        let resolver = Arc::new(AttributionResolver::new(
            store.clone(),
            Arc::new(StaticEnvironment::empty()),
        ));
        (CheckoutFlow::new(api.clone(), resolver), api, store)
    }

    #[test]
    fn at_checkout_01_carries_click_id_and_locale() {
        let (flow, api, store) = flow();
        store.set_locale(Locale::En);
        let resp = flow
            .start(CheckoutMode::Subscription, "sub_monthly", " a@b.c ", "?clickid=c1", "ru-RU")
            .unwrap();
        assert_eq!(resp.session_id, "cs_1");
        let req = api.checkout_requests.lock().unwrap()[0].clone();
        assert_eq!(req.clickid, "c1");
        assert_eq!(req.email, "a@b.c");
        assert_eq!(req.locale, Some(Locale::En));
    }

    #[test]
    fn at_checkout_02_locale_falls_back_to_browser_language() {
        let (flow, api, _store) = flow();
        flow.start(CheckoutMode::OneTime, "one", "a@b.c", "?clickid=c1", "de-DE")
            .unwrap();
        assert_eq!(api.checkout_requests.lock().unwrap()[0].locale, Some(Locale::Ru));
    }

    #[test]
    fn at_checkout_03_missing_click_id_or_email() {
        let (flow, api, _store) = flow();
        assert_eq!(
            flow.start(CheckoutMode::OneTime, "one", "a@b.c", "", "en"),
            Err(CheckoutError::MissingClickId)
        );
        assert_eq!(
            flow.start(CheckoutMode::OneTime, "one", "  ", "?clickid=c1", "en"),
            Err(CheckoutError::MissingEmail)
        );
        assert!(api.checkout_requests.lock().unwrap().is_empty());
    }

    #[test]
    fn at_checkout_04_customer_portal() {
        let (flow, _api, _store) = flow();
        assert_eq!(
            flow.open_customer_portal(" a@b.c ").unwrap(),
            "https://portal.example/a@b.c"
        );
        assert_eq!(flow.open_customer_portal(""), Err(CheckoutError::MissingEmail));
    }
}
