#![forbid(unsafe_code)]

pub mod checkout;
pub mod funnel;
pub mod landing;
pub mod offer;
pub mod payment_status;
pub mod quiz;
pub mod reveal;

pub use funnel::{BackgroundDispatch, FunnelContext, SequencerError, StageSink};
