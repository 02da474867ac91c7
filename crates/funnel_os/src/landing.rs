#![forbid(unsafe_code)]

use funnel_contracts::postback::FunnelStage;

use crate::funnel::FunnelContext;

pub const LANDING_PATH: &str = "/";
pub const FIRST_BLOCK_PATH: &str = "/block-1";

/// Hero CTA: reports `start_quiz` and returns the first quiz block path.
pub fn start_quiz(ctx: &FunnelContext, query: &str) -> String {
    ctx.complete_stage(FunnelStage::StartQuiz, LANDING_PATH, FIRST_BLOCK_PATH, query)
}
