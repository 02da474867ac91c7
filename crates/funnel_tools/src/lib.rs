#![forbid(unsafe_code)]

pub mod funnel_cli;
