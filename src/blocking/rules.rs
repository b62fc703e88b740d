//! Compiled request-blocking rules and the per-request verdict.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use adblock::lists::{FilterSet, ParseOptions};
use adblock::request::Request;
use adblock::Engine;
use regex::RegexSet;
use url::Url;

use crate::request::ResourceType;

/// Why a request was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    ResourceType,
    Pattern,
    FilterList,
}

/// Decision for one outgoing network request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestVerdict {
    Continue,
    Abort(BlockReason),
}

impl RequestVerdict {
    #[must_use]
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Abort(_))
    }
}

/// Wildcard URL patterns compiled into a single matcher.
///
/// `*` matches any run of characters (slashes included). Every other
/// character is literal and matching is case-sensitive over the whole URL.
#[derive(Debug, Clone)]
pub struct WildcardMatcher {
    set: RegexSet,
}

impl WildcardMatcher {
    /// Compile `patterns`. Returns `Ok(None)` when there is nothing to match.
    ///
    /// # Errors
    ///
    /// Returns an error if the combined patterns exceed the regex size limit.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Option<Self>, regex::Error> {
        if patterns.is_empty() {
            return Ok(None);
        }
        let translated: Vec<String> = patterns
            .iter()
            .map(|p| wildcard_to_regex(p.as_ref()))
            .collect();
        let set = RegexSet::new(translated)?;
        Ok(Some(Self { set }))
    }

    #[must_use]
    pub fn is_match(&self, url: &str) -> bool {
        self.set.is_match(url)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.set.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

fn wildcard_to_regex(pattern: &str) -> String {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    format!("^{body}$")
}

/// Every rule that applies to one render.
///
/// Recomputed per render; only the downloaded list text is shared between
/// renders (see [`super::BlockListCache`]).
pub struct BlockRuleSet {
    resources: BTreeSet<ResourceType>,
    patterns: Option<WildcardMatcher>,
    lists: Option<Engine>,
    list_rule_count: usize,
}

impl BlockRuleSet {
    /// A rule set that lets every request through.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            resources: BTreeSet::new(),
            patterns: None,
            lists: None,
            list_rule_count: 0,
        }
    }

    /// Build from already-downloaded filter lists.
    ///
    /// Compiling large lists is CPU-bound; async callers should run this on
    /// the blocking pool.
    #[must_use]
    pub fn new(
        resources: BTreeSet<ResourceType>,
        patterns: Option<WildcardMatcher>,
        lists: &[Arc<Vec<String>>],
    ) -> Self {
        let list_rule_count = lists.iter().map(|list| list.len()).sum();
        let lists = if list_rule_count == 0 {
            None
        } else {
            let mut filter_set = FilterSet::new(false);
            for list in lists {
                filter_set.add_filters(list.as_slice(), ParseOptions::default());
            }
            Some(Engine::from_filter_set(filter_set, true))
        };

        Self {
            resources,
            patterns,
            lists,
            list_rule_count,
        }
    }

    /// Whether interception needs to be installed at all.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.resources.is_empty() || self.patterns.is_some() || self.lists.is_some()
    }

    /// Evaluate one outgoing request made while rendering `page_url`.
    ///
    /// Resource type is checked first, then the explicit patterns, then the
    /// subscribed filter lists.
    #[must_use]
    pub fn verdict(
        &self,
        url: &str,
        page_url: &str,
        resource: Option<ResourceType>,
    ) -> RequestVerdict {
        if resource.is_some_and(|r| self.resources.contains(&r)) {
            return RequestVerdict::Abort(BlockReason::ResourceType);
        }

        if self.patterns.as_ref().is_some_and(|m| m.is_match(url)) {
            return RequestVerdict::Abort(BlockReason::Pattern);
        }

        if let Some(engine) = &self.lists {
            // The page itself is never subject to list rules.
            if resource != Some(ResourceType::Document) || !same_document(url, page_url) {
                let request_type = adblock_request_type(resource);
                if let Ok(request) = Request::new(url, page_url, request_type) {
                    if engine.check_network_request(&request).matched {
                        return RequestVerdict::Abort(BlockReason::FilterList);
                    }
                }
            }
        }

        RequestVerdict::Continue
    }
}

impl fmt::Debug for BlockRuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockRuleSet")
            .field("resources", &self.resources)
            .field("patterns", &self.patterns.as_ref().map_or(0, WildcardMatcher::len))
            .field("list_rules", &self.list_rule_count)
            .finish()
    }
}

/// Whether `url` loads the same document as `page_url`.
///
/// Both sides are parsed so that `https://example.com` and the browser's
/// `https://example.com/` compare equal. Fragments never reach the network.
fn same_document(url: &str, page_url: &str) -> bool {
    match (Url::parse(url), Url::parse(page_url)) {
        (Ok(mut a), Ok(mut b)) => {
            a.set_fragment(None);
            b.set_fragment(None);
            a == b
        }
        _ => url == page_url,
    }
}

/// Map a browser resource type onto the request type names filter lists use.
fn adblock_request_type(resource: Option<ResourceType>) -> &'static str {
    match resource {
        Some(ResourceType::Document) => "document",
        Some(ResourceType::Stylesheet) => "stylesheet",
        Some(ResourceType::Image) => "image",
        Some(ResourceType::Media) => "media",
        Some(ResourceType::Font) => "font",
        Some(ResourceType::Script) => "script",
        Some(ResourceType::Xhr | ResourceType::Fetch | ResourceType::Eventsource) => {
            "xmlhttprequest"
        }
        Some(ResourceType::Websocket) => "websocket",
        Some(ResourceType::Ping | ResourceType::Cspviolationreport) => "ping",
        Some(ResourceType::Manifest) => "web_manifest",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_anchored_and_case_sensitive() {
        let m = WildcardMatcher::new(&["*.doubleclick.net/*", "https://cdn.example.com/*.js"])
            .unwrap()
            .unwrap();
        assert!(m.is_match("https://ad.doubleclick.net/pixel?x=1"));
        assert!(m.is_match("https://cdn.example.com/a/b/c.js"));
        assert!(!m.is_match("https://cdn.example.com/a/b/c.css"));
        assert!(!m.is_match("https://CDN.EXAMPLE.COM/app.js"));
        // Anchored: a pattern without wildcards only matches the exact URL.
        let exact = WildcardMatcher::new(&["https://example.com/a"]).unwrap().unwrap();
        assert!(exact.is_match("https://example.com/a"));
        assert!(!exact.is_match("https://example.com/ab"));
    }

    #[test]
    fn test_wildcard_escapes_regex_metacharacters() {
        let m = WildcardMatcher::new(&["https://example.com/?q=(a|b)*"])
            .unwrap()
            .unwrap();
        assert!(m.is_match("https://example.com/?q=(a|b)&page=2"));
        assert!(!m.is_match("https://example.com/?q=a"));
    }

    #[test]
    fn test_empty_patterns() {
        let none: [&str; 0] = [];
        assert!(WildcardMatcher::new(&none).unwrap().is_none());
        let rules = BlockRuleSet::empty();
        assert!(!rules.is_active());
        assert_eq!(
            rules.verdict("https://example.com/x.png", "https://example.com", Some(ResourceType::Image)),
            RequestVerdict::Continue
        );
    }

    #[test]
    fn test_resource_type_checked_first() {
        let rules = BlockRuleSet::new(
            BTreeSet::from([ResourceType::Image]),
            WildcardMatcher::new(&["*tracker*"]).unwrap(),
            &[],
        );
        assert!(rules.is_active());
        assert_eq!(
            rules.verdict("https://tracker.example/p.gif", "https://example.com", Some(ResourceType::Image)),
            RequestVerdict::Abort(BlockReason::ResourceType)
        );
        assert_eq!(
            rules.verdict("https://tracker.example/p.js", "https://example.com", Some(ResourceType::Script)),
            RequestVerdict::Abort(BlockReason::Pattern)
        );
        assert_eq!(
            rules.verdict("https://example.com/app.js", "https://example.com", Some(ResourceType::Script)),
            RequestVerdict::Continue
        );
    }

    #[test]
    fn test_page_document_exempt_from_lists() {
        let list = vec!["||example.com^".to_string()];
        let rules = BlockRuleSet::new(BTreeSet::new(), None, &[Arc::new(list)]);

        // The browser reports a bare origin with a trailing slash.
        assert_eq!(
            rules.verdict("https://example.com/", "https://example.com", Some(ResourceType::Document)),
            RequestVerdict::Continue
        );
        assert_eq!(
            rules.verdict(
                "https://example.com/#top",
                "https://example.com/",
                Some(ResourceType::Document)
            ),
            RequestVerdict::Continue
        );
        assert_eq!(
            rules.verdict(
                "https://example.com/embed.js",
                "https://example.com",
                Some(ResourceType::Script)
            ),
            RequestVerdict::Abort(BlockReason::FilterList)
        );
    }

    #[test]
    fn test_same_document() {
        assert!(same_document("https://example.com/", "https://example.com"));
        assert!(same_document("https://EXAMPLE.com/a#x", "https://example.com/a"));
        assert!(!same_document("https://example.com/a", "https://example.com/b"));
        assert!(!same_document("http://example.com/", "https://example.com/"));
    }

    #[test]
    fn test_filter_list_rules() {
        let list = vec![
            "! comment line".to_string(),
            "||ads.example.net^".to_string(),
        ];
        let rules = BlockRuleSet::new(BTreeSet::new(), None, &[Arc::new(list)]);
        assert!(rules.is_active());
        assert_eq!(
            rules.verdict(
                "https://ads.example.net/banner.js",
                "https://example.com/",
                Some(ResourceType::Script)
            ),
            RequestVerdict::Abort(BlockReason::FilterList)
        );
        assert_eq!(
            rules.verdict(
                "https://static.example.com/app.js",
                "https://example.com/",
                Some(ResourceType::Script)
            ),
            RequestVerdict::Continue
        );
    }
}
