#![forbid(unsafe_code)]

pub mod attribution;
pub mod config;
pub mod dispatcher;
pub mod http;
pub mod link_rewriter;
pub mod payment;
pub mod relay;
pub mod tracking_log;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;
