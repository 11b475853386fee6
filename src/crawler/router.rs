//! Smart routing between plain HTTP and the headless renderer

use regex::Regex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};

/// Inline state-hydration markers of client-rendered frameworks
static SPA_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<script[^>]*>[^<]*window\.__INITIAL_STATE__|__NEXT_DATA__|__NUXT__|data-reactroot")
        .expect("hardcoded regex pattern is valid")
});

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript)[^>]*>.*?</(script|style|noscript)>")
        .expect("hardcoded regex pattern is valid")
});

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("hardcoded regex pattern is valid"));

/// Bodies shorter than this (after trimming) are app-shell candidates
const MIN_STATIC_BODY_CHARS: usize = 200;

/// Decides whether a page needs rendering and whether the renderer is
/// currently overloaded
#[derive(Debug, Clone)]
pub struct SmartRouter {
    chrome_depth: Arc<AtomicUsize>,
    backpressure_threshold: usize,
}

impl SmartRouter {
    /// # Arguments
    ///
    /// * `chrome_depth` - Live depth gauge of the renderer work queue
    /// * `backpressure_threshold` - Depth at which escalation is suppressed
    pub fn new(chrome_depth: Arc<AtomicUsize>, backpressure_threshold: usize) -> Self {
        Self {
            chrome_depth,
            backpressure_threshold,
        }
    }

    /// Returns true when an HTTP body looks like it needs a browser
    ///
    /// Empty bodies, fragments without an `<html` tag and pages carrying SPA
    /// hydration markers need rendering. A body under 200 characters needs
    /// rendering unless it still has visible text outside scripts and styles.
    ///
    /// # Examples
    ///
    /// ```
    /// use kumo_crawl::crawler::SmartRouter;
    ///
    /// let page = format!("<html><body><h1>Static</h1><p>{}</p></body></html>", "text ".repeat(60));
    /// assert!(!SmartRouter::should_render(&page));
    /// assert!(!SmartRouter::should_render("<html><body><h1>Static</h1></body></html>"));
    /// assert!(SmartRouter::should_render("<div id=app></div>"));
    /// ```
    pub fn should_render(html: &str) -> bool {
        let trimmed = html.trim();
        if trimmed.is_empty() {
            return true;
        }

        if !trimmed.to_ascii_lowercase().contains("<html") {
            return true;
        }

        if SPA_MARKERS.is_match(trimmed) {
            return true;
        }

        trimmed.chars().count() < MIN_STATIC_BODY_CHARS && !has_visible_text(trimmed)
    }

    /// True when the renderer queue is at or over the configured depth
    pub fn chrome_backpressure(&self) -> bool {
        self.chrome_depth.load(Ordering::Acquire) >= self.backpressure_threshold
    }

    /// Only HTML-like responses are candidates for escalation
    pub fn is_renderable_content_type(content_type: &str) -> bool {
        let ct = content_type.to_ascii_lowercase();
        ct.is_empty() || ct.contains("text/html") || ct.contains("application/xhtml")
    }
}

fn has_visible_text(html: &str) -> bool {
    let without_scripts = SCRIPT_OR_STYLE.replace_all(html, " ");
    let text = TAG.replace_all(&without_scripts, " ");
    text.chars().any(|c| !c.is_whitespace())
}
