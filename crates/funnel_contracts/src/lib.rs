#![forbid(unsafe_code)]

pub mod attribution;
pub mod common;
pub mod payment;
pub mod postback;

pub use common::{ContractViolation, SchemaVersion, Validate};
