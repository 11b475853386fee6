use regex::Regex;

/// Allow/deny regular-expression filter applied to discovered links
///
/// Deny patterns take precedence. When at least one allow pattern is
/// configured a link must match one of them. Patterns that fail to compile
/// never match anything.
#[derive(Debug, Clone, Default)]
pub struct PatternFilter {
    allow: Vec<Option<Regex>>,
    deny: Vec<Option<Regex>>,
}

impl PatternFilter {
    /// Compiles the allow and deny lists
    ///
    /// # Arguments
    ///
    /// * `allow` - Patterns a link must match (if non-empty)
    /// * `deny` - Patterns that reject a link outright
    ///
    /// # Examples
    ///
    /// ```
    /// use kumo_crawl::url::PatternFilter;
    ///
    /// let filter = PatternFilter::new(&["/docs/".to_string()], &["\\.pdf$".to_string()]);
    /// assert!(filter.permits("https://example.com/docs/a"));
    /// assert!(!filter.permits("https://example.com/docs/a.pdf"));
    /// assert!(!filter.permits("https://example.com/blog/"));
    /// ```
    pub fn new(allow: &[String], deny: &[String]) -> Self {
        let compile = |patterns: &[String]| {
            patterns
                .iter()
                .map(|p| match Regex::new(p) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        tracing::warn!("Ignoring invalid link pattern {:?}: {}", p, e);
                        None
                    }
                })
                .collect::<Vec<_>>()
        };

        Self {
            allow: compile(allow),
            deny: compile(deny),
        }
    }

    /// Returns true if the URL survives both pattern lists
    pub fn permits(&self, url: &str) -> bool {
        let matches = |re: &Option<Regex>| re.as_ref().is_some_and(|re| re.is_match(url));

        if self.deny.iter().any(matches) {
            return false;
        }

        self.allow.is_empty() || self.allow.iter().any(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_filter_permits_everything() {
        let filter = PatternFilter::default();
        assert!(filter.permits("https://example.com/anything"));
    }

    #[test]
    fn test_deny_wins_over_allow() {
        let filter = PatternFilter::new(&patterns(&["example"]), &patterns(&["private"]));
        assert!(filter.permits("https://example.com/public"));
        assert!(!filter.permits("https://example.com/private"));
    }

    #[test]
    fn test_allow_list_must_match() {
        let filter = PatternFilter::new(&patterns(&["^https://example\\.com/blog/"]), &[]);
        assert!(filter.permits("https://example.com/blog/post"));
        assert!(!filter.permits("https://example.com/shop"));
    }

    #[test]
    fn test_invalid_patterns_never_match() {
        // An invalid deny pattern rejects nothing
        let filter = PatternFilter::new(&[], &patterns(&["(unclosed"]));
        assert!(filter.permits("https://example.com/(unclosed"));

        // An invalid-only allow list admits nothing
        let filter = PatternFilter::new(&patterns(&["[bad"]), &[]);
        assert!(!filter.permits("https://example.com/"));
    }
}
