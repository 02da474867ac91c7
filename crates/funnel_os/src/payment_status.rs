#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use funnel_contracts::payment::PaymentSessionStatus;
use funnel_engines::payment::{PaymentApi, PaymentApiError};
use thiserror::Error;

pub const UNPAID_REPOLL_DELAY: Duration = Duration::from_millis(3_000);
pub const ERROR_REPOLL_DELAY: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("missing payment session id")]
    MissingSessionId,
}

pub trait Sleeper: Send + Sync {
    fn sleep(&self, delay: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// Last observed state of a payment session poll loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub status: Option<PaymentSessionStatus>,
    /// Cleared by the next successful poll.
    pub last_error: Option<PaymentApiError>,
    pub polls: u32,
}

impl PollReport {
    pub fn is_paid(&self) -> bool {
        self.status.as_ref().is_some_and(PaymentSessionStatus::is_paid)
    }

    pub fn activation_link(&self) -> Option<&str> {
        self.status.as_ref()?.activation_link.as_deref()
    }
}

/// Pay-success page: polls the session until it reports `paid`.
pub struct PaymentStatusPoller {
    api: Arc<dyn PaymentApi>,
    sleeper: Arc<dyn Sleeper>,
}

impl PaymentStatusPoller {
    pub fn new(api: Arc<dyn PaymentApi>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { api, sleeper }
    }

    /// Stops on `paid` or after `max_polls` requests. No sleep follows the
    /// final poll.
    pub fn poll_until_paid(
        &self,
        session_id: Option<&str>,
        max_polls: u32,
    ) -> Result<PollReport, PollError> {
        let session_id = session_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(PollError::MissingSessionId)?;

        let mut report = PollReport::default();
        while report.polls < max_polls {
            report.polls += 1;
            let delay = match self.api.session_status(session_id) {
                Ok(status) => {
                    let paid = status.is_paid();
                    tracing::debug!(
                        session_id,
                        payment_status = %status.payment_status,
                        poll = report.polls,
                        "payment status"
                    );
                    report.status = Some(status);
                    report.last_error = None;
                    if paid {
                        break;
                    }
                    UNPAID_REPOLL_DELAY
                }
                Err(err) => {
                    tracing::warn!(session_id, poll = report.polls, error = %err, "payment status failed");
                    report.last_error = Some(err);
                    ERROR_REPOLL_DELAY
                }
            };
            if report.polls < max_polls {
                self.sleeper.sleep(delay);
            }
        }
        Ok(report)
    }
}
