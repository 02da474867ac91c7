#![forbid(unsafe_code)]

use funnel_contracts::postback::FunnelStage;

use crate::funnel::FunnelContext;

pub const OFFER_PAGE_PATH: &str = "/block-7";
pub const PAY_PATH: &str = "/pay";

const WIDE_VIEWPORT_PX: u32 = 1080;
const MEDIUM_VIEWPORT_PX: u32 = 720;

/// Pay button on the offer page.
pub fn go_to_payment(ctx: &FunnelContext, query: &str) -> String {
    ctx.complete_stage(FunnelStage::TransitionToPayment, OFFER_PAGE_PATH, PAY_PATH, query)
}

pub fn visible_cards(viewport_width_px: u32) -> usize {
    if viewport_width_px >= WIDE_VIEWPORT_PX {
        3
    } else if viewport_width_px >= MEDIUM_VIEWPORT_PX {
        2
    } else {
        1
    }
}

/// Paged customer-cases strip. A page is one track width of cards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasesSlider {
    case_count: usize,
    visible: usize,
    active: usize,
}

impl CasesSlider {
    pub fn new(case_count: usize, viewport_width_px: u32) -> Self {
        Self {
            case_count,
            visible: visible_cards(viewport_width_px),
            active: 0,
        }
    }

    pub fn pages(&self) -> usize {
        self.case_count.div_ceil(self.visible).max(1)
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn resize(&mut self, viewport_width_px: u32) {
        self.visible = visible_cards(viewport_width_px);
        self.active = self.active.min(self.pages() - 1);
    }

    /// Active page from the track's scroll position.
    pub fn on_scroll(&mut self, scroll_left: f64, track_width: f64) -> usize {
        if track_width > 0.0 && scroll_left.is_finite() {
            let page = (scroll_left / track_width).round().max(0.0) as usize;
            self.active = page.min(self.pages() - 1);
        }
        self.active
    }

    /// Scroll offset that brings `page` into view.
    pub fn select(&self, page: usize, track_width: f64) -> f64 {
        track_width * page.min(self.pages() - 1) as f64
    }
}
