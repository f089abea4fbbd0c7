use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{trace, warn};

// Markup attributes that carry navigable references.
static ATTRIBUTE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:href|src|action)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>"']+))"#)
        .expect("attribute pattern is a valid regex")
});

/// Capability of producing candidate link strings from page markup.
///
/// A caller may supply any number of implementations; the crawler runs all
/// of them over each fetched page, concatenates their outputs in
/// registration order, and deduplicates while preserving first-seen order.
/// An extractor returning `Err` contributes zero links for that page and
/// never aborts the fetch or the crawl.
pub trait LinkExtractor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Produces candidate link strings from markup, in document order.
    /// Candidates may be relative, malformed, or out of scope; the
    /// resolution and scope stages downstream take care of filtering.
    fn extract(&self, markup: &str) -> Result<Vec<String>>;
}

/// The built-in default extractor: scans `href`/`src`/`action`-style
/// attributes with a regex, tolerating markup too broken for a DOM parse.
#[derive(Debug, Default)]
pub struct AttributeExtractor;

impl LinkExtractor for AttributeExtractor {
    fn name(&self) -> &str {
        "attributes"
    }

    fn extract(&self, markup: &str) -> Result<Vec<String>> {
        let mut links = Vec::new();
        for captures in ATTRIBUTE_PATTERN.captures_iter(markup) {
            let value = captures
                .get(1)
                .or_else(|| captures.get(2))
                .or_else(|| captures.get(3))
                .map(|m| m.as_str());
            if let Some(value) = value {
                if !value.trim().is_empty() {
                    links.push(value.to_string());
                }
            }
        }
        Ok(links)
    }
}

/// Structural extractor: parses the markup as an HTML document and walks
/// navigation-bearing elements (anchors, areas, forms, frames).
pub struct DomExtractor {
    selector: Selector,
}

impl DomExtractor {
    pub fn new() -> Self {
        Self {
            // Static selector list, cannot fail to parse.
            selector: Selector::parse("a[href], area[href], form[action], frame[src], iframe[src]")
                .expect("link selector is valid"),
        }
    }
}

impl Default for DomExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkExtractor for DomExtractor {
    fn name(&self) -> &str {
        "dom"
    }

    fn extract(&self, markup: &str) -> Result<Vec<String>> {
        let document = Html::parse_document(markup);
        let mut links = Vec::new();

        for element in document.select(&self.selector) {
            let value = element
                .value()
                .attr("href")
                .or_else(|| element.value().attr("action"))
                .or_else(|| element.value().attr("src"));
            if let Some(value) = value {
                if !value.trim().is_empty() {
                    links.push(value.to_string());
                }
            }
        }

        Ok(links)
    }
}

/// Runs every configured extractor over the markup, merging outputs in
/// registration order and deduplicating while preserving first-seen order.
/// A failing extractor is logged and skipped; the rest still contribute.
pub fn collect_links(extractors: &[Arc<dyn LinkExtractor>], markup: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for extractor in extractors {
        match extractor.extract(markup) {
            Ok(candidates) => {
                trace!(
                    "Extractor '{}' produced {} candidates",
                    extractor.name(),
                    candidates.len()
                );
                for candidate in candidates {
                    if seen.insert(candidate.clone()) {
                        merged.push(candidate);
                    }
                }
            }
            Err(e) => {
                warn!("Extractor '{}' failed, contributing no links: {}", extractor.name(), e);
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    const PAGE: &str = r#"
        <html><body>
            <a href="/a">A</a>
            <a href='/b'>B</a>
            <img src=/logo.png>
            <form action="/login" method="post"></form>
            <a href="javascript:void(0)">JS</a>
            <a href="">empty</a>
        </body></html>
    "#;

    struct AlwaysFails;

    impl LinkExtractor for AlwaysFails {
        fn name(&self) -> &str {
            "always-fails"
        }

        fn extract(&self, _markup: &str) -> Result<Vec<String>> {
            bail!("synthetic extractor failure")
        }
    }

    #[test]
    fn test_attribute_extractor_finds_all_quoting_styles() {
        let links = AttributeExtractor.extract(PAGE).expect("extraction");
        assert_eq!(
            links,
            vec!["/a", "/b", "/logo.png", "/login", "javascript:void(0)"]
        );
    }

    #[test]
    fn test_dom_extractor_walks_elements() {
        let links = DomExtractor::new().extract(PAGE).expect("extraction");
        assert!(links.contains(&"/a".to_string()));
        assert!(links.contains(&"/b".to_string()));
        assert!(links.contains(&"/login".to_string()));
        // img src is attribute-extractor territory, not a navigation element
        assert!(!links.contains(&"/logo.png".to_string()));
    }

    #[test]
    fn test_dom_extractor_tolerates_broken_markup() {
        let links = DomExtractor::new()
            .extract("<a href='/x'><div><<<not closed")
            .expect("extraction");
        assert_eq!(links, vec!["/x"]);
    }

    #[test]
    fn test_collect_links_merges_in_registration_order() {
        let extractors: Vec<Arc<dyn LinkExtractor>> =
            vec![Arc::new(DomExtractor::new()), Arc::new(AttributeExtractor)];
        let links = collect_links(&extractors, PAGE);

        // DOM extractor runs first, so its ordering wins for shared links;
        // the attribute extractor appends what only it sees.
        let a_pos = links.iter().position(|l| l == "/a").expect("/a present");
        let logo_pos = links
            .iter()
            .position(|l| l == "/logo.png")
            .expect("/logo.png present");
        assert!(a_pos < logo_pos);

        // Dedup preserves single occurrences.
        assert_eq!(links.iter().filter(|l| *l == "/a").count(), 1);
    }

    #[test]
    fn test_failing_extractor_is_isolated() {
        let extractors: Vec<Arc<dyn LinkExtractor>> =
            vec![Arc::new(AlwaysFails), Arc::new(AttributeExtractor)];
        let links = collect_links(&extractors, PAGE);
        assert!(links.contains(&"/a".to_string()));
    }

    #[test]
    fn test_no_extractors_no_links() {
        assert!(collect_links(&[], PAGE).is_empty());
    }
}
