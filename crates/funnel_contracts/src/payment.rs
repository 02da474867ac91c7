#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::attribution::CLICK_ID_MAX_LEN;
use crate::common::{validate_opt_token, validate_token};
use crate::{ContractViolation, Validate};

pub const PAYMENT_STATUS_PAID: &str = "paid";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutMode {
    OneTime,
    Subscription,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locale {
    En,
    Ru,
}

impl Locale {
    pub fn as_str(self) -> &'static str {
        match self {
            Locale::En => "en",
            Locale::Ru => "ru",
        }
    }

    /// Exact stored values only.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "en" => Some(Locale::En),
            "ru" => Some(Locale::Ru),
            _ => None,
        }
    }

    /// Browser language tags starting with `en` map to English, anything
    /// else to Russian.
    pub fn from_browser_language(tag: &str) -> Self {
        if tag.trim().to_ascii_lowercase().starts_with("en") {
            Locale::En
        } else {
            Locale::Ru
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSessionRequest {
    pub mode: CheckoutMode,
    pub plan: String,
    pub email: String,
    pub clickid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<Locale>,
}

impl Validate for CheckoutSessionRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token("checkout_session.plan", &self.plan, 64)?;
        validate_token("checkout_session.email", &self.email, 320)?;
        if !self.email.contains('@') {
            return Err(ContractViolation::InvalidValue {
                field: "checkout_session.email",
                reason: "must contain @",
            });
        }
        validate_token("checkout_session.clickid", &self.clickid, CLICK_ID_MAX_LEN)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSessionResponse {
    pub checkout_url: String,
    pub session_id: String,
    pub order_id: String,
}

impl Validate for CheckoutSessionResponse {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token("checkout_session_response.checkout_url", &self.checkout_url, 2048)?;
        validate_token("checkout_session_response.session_id", &self.session_id, 256)?;
        validate_token("checkout_session_response.order_id", &self.order_id, 256)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSessionStatus {
    pub payment_status: String,
    pub fulfillment_status: String,
    pub access_status: String,
    #[serde(default)]
    pub activation_link: Option<String>,
}

impl PaymentSessionStatus {
    pub fn is_paid(&self) -> bool {
        self.payment_status == PAYMENT_STATUS_PAID
    }
}

impl Validate for PaymentSessionStatus {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token("payment_session_status.payment_status", &self.payment_status, 64)?;
        validate_opt_token("payment_session_status.activation_link", &self.activation_link, 2048)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerPortalRequest {
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerPortalResponse {
    pub portal_url: String,
}
