#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use funnel_contracts::attribution::{ClickId, CLICK_ID_PARAM};
use url::{Position, Url};

use crate::attribution::AttributionResolver;
use crate::tracking_log::apply_debug_toggle;

const NON_NAVIGABLE_PREFIXES: [&str; 3] = ["mailto:", "tel:", "javascript:"];

/// Hyperlinks of a rendered page, addressed by position.
pub trait LinkDocument {
    fn hrefs(&self) -> Vec<Option<String>>;
    fn set_href(&mut self, index: usize, href: String);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryDocument {
    hrefs: Vec<Option<String>>,
    writes: usize,
}

impl InMemoryDocument {
    pub fn new<I, S>(hrefs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hrefs: hrefs.into_iter().map(|h| Some(h.into())).collect(),
            writes: 0,
        }
    }

    pub fn push_anchor_without_href(&mut self) {
        self.hrefs.push(None);
    }

    pub fn href(&self, index: usize) -> Option<&str> {
        self.hrefs.get(index).and_then(|h| h.as_deref())
    }

    /// Number of `set_href` calls so far.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl LinkDocument for InMemoryDocument {
    fn hrefs(&self) -> Vec<Option<String>> {
        self.hrefs.clone()
    }

    fn set_href(&mut self, index: usize, href: String) {
        if let Some(slot) = self.hrefs.get_mut(index) {
            *slot = Some(href);
            self.writes += 1;
        }
    }
}

/// `mailto:`, `tel:`, `javascript:` (any case) and bare `#fragment` targets
/// are not navigations.
pub fn is_navigable(href: &str) -> bool {
    let trimmed = href.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return false;
    }
    let lower = trimmed.get(..11).unwrap_or(trimmed).to_ascii_lowercase();
    !NON_NAVIGABLE_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

/// Sets `clickid` on the target, keeping every other query pair in place.
/// Relative targets stay relative. `None` means leave the href untouched.
pub fn with_click_id(href: &str, base: &Url, click_id: &ClickId) -> Option<String> {
    if !is_navigable(href) {
        return None;
    }
    let (mut url, relative) = match Url::parse(href) {
        Ok(url) => (url, false),
        Err(url::ParseError::RelativeUrlWithoutBase) => (base.join(href).ok()?, true),
        Err(_) => return None,
    };
    if url.cannot_be_a_base() {
        return None;
    }

    let mut replaced = false;
    let mut pairs: Vec<(String, String)> = Vec::new();
    for (k, v) in url.query_pairs() {
        if k == CLICK_ID_PARAM {
            if !replaced {
                pairs.push((k.into_owned(), click_id.as_str().to_string()));
                replaced = true;
            }
            continue;
        }
        pairs.push((k.into_owned(), v.into_owned()));
    }
    if !replaced {
        pairs.push((CLICK_ID_PARAM.to_string(), click_id.as_str().to_string()));
    }
    url.query_pairs_mut().clear().extend_pairs(pairs);

    let rewritten = if relative && url.origin() == base.origin() {
        url[Position::BeforePath..].to_string()
    } else {
        url.to_string()
    };
    Some(rewritten)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRewriter {
    base: Url,
}

impl LinkRewriter {
    pub fn new(base: Url) -> Self {
        Self { base }
    }

    /// Rewrites navigable links to carry `click_id`. No-op without a click
    /// id. Returns how many hrefs actually changed; a second run with the
    /// same click id changes nothing.
    pub fn propagate_to_links<D>(&self, doc: &mut D, click_id: Option<&ClickId>) -> usize
    where
        D: LinkDocument + ?Sized,
    {
        let Some(click_id) = click_id else {
            return 0;
        };
        let mut changed = 0;
        for (index, href) in doc.hrefs().into_iter().enumerate() {
            let Some(href) = href else {
                continue;
            };
            let Some(rewritten) = with_click_id(&href, &self.base, click_id) else {
                continue;
            };
            if rewritten != href {
                doc.set_href(index, rewritten);
                changed += 1;
            }
        }
        changed
    }
}

/// Callback registration offered by the runtime attribution-token library.
pub trait TokensReadySource {
    fn on_tokens_ready(&self, callback: Box<dyn Fn() + Send + Sync>);
}

/// Rewrites links once now and again each time the token library reports
/// fresh tokens. Returns the number of links changed by the first pass.
///
/// Also applies an inbound `mobi_debug` toggle, since this runs on every
/// page load.
pub fn install_link_propagation<D>(
    resolver: Arc<AttributionResolver>,
    rewriter: Arc<LinkRewriter>,
    document: Arc<Mutex<D>>,
    query: &str,
    tokens: &dyn TokensReadySource,
) -> usize
where
    D: LinkDocument + Send + 'static,
{
    apply_debug_toggle(resolver.store(), query);
    let first_pass = propagate_now(&resolver, &rewriter, &document, query);
    let query = query.to_string();
    tokens.on_tokens_ready(Box::new(move || {
        let changed = propagate_now(&resolver, &rewriter, &document, &query);
        tracing::debug!(changed, "links refreshed after token update");
    }));
    first_pass
}

fn propagate_now<D: LinkDocument>(
    resolver: &AttributionResolver,
    rewriter: &LinkRewriter,
    document: &Mutex<D>,
    query: &str,
) -> usize {
    let click_id = resolver.resolve(query);
    match document.lock() {
        Ok(mut doc) => rewriter.propagate_to_links(&mut *doc, click_id.as_ref()),
        Err(_) => 0,
    }
}
