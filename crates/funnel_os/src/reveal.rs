#![forbid(unsafe_code)]

use funnel_contracts::postback::FunnelStage;

use crate::funnel::{FunnelContext, SequencerError};

pub const REVEAL_PAGE_PATH: &str = "/block-6";
pub const REVEAL_NEXT_PATH: &str = "/block-7";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealScreen {
    First,
    Second,
}

/// Two-screen reveal after the quiz blocks.
#[derive(Debug, Clone)]
pub struct RevealSequencer {
    screen: RevealScreen,
}

impl Default for RevealSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl RevealSequencer {
    pub fn new() -> Self {
        Self {
            screen: RevealScreen::First,
        }
    }

    pub fn screen(&self) -> RevealScreen {
        self.screen
    }

    pub fn next(&mut self) -> RevealScreen {
        self.screen = RevealScreen::Second;
        self.screen
    }

    /// Only reachable from the second screen.
    pub fn finish(&self, ctx: &FunnelContext, query: &str) -> Result<String, SequencerError> {
        if self.screen != RevealScreen::Second {
            return Err(SequencerError::NotCompleted);
        }
        Ok(ctx.complete_stage(
            FunnelStage::Block6Completed,
            REVEAL_PAGE_PATH,
            REVEAL_NEXT_PATH,
            query,
        ))
    }
}
