//! HTML extraction: one fetched body in, one `PageRecord` out.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use searchlight_core::error::{CrawlError, CrawlResult};
use searchlight_core::{canonicalize_url, resolve_href, Link, PageRecord};

use crate::fetcher::FetchedPage;

/// Elements whose text never belongs to the main content.
const IGNORED_ANCESTORS: &[&str] = &[
    "nav", "footer", "aside", "script", "style", "noscript", "header",
];

const HEADING_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];

/// Walks a parsed document and produces a [`PageRecord`].
pub struct Extractor {
    title: Selector,
    meta: Selector,
    link_rel: Selector,
    anchors: Selector,
    images: Selector,
    headings: Vec<(String, Selector)>,
    whitespace: Regex,
    control_chars: Regex,
}

impl Extractor {
    pub fn new() -> Self {
        Self {
            title: Selector::parse("title").unwrap(),
            meta: Selector::parse("meta").unwrap(),
            link_rel: Selector::parse("link[rel]").unwrap(),
            anchors: Selector::parse("a[href]").unwrap(),
            images: Selector::parse("img[alt]").unwrap(),
            headings: HEADING_TAGS
                .iter()
                .map(|tag| (tag.to_string(), Selector::parse(tag).unwrap()))
                .collect(),
            whitespace: Regex::new(r"\s+").unwrap(),
            control_chars: Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F\u{80}-\u{9F}\u{FFFD}]")
                .unwrap(),
        }
    }

    /// Extract a page record from a fetched body.
    ///
    /// Outbound links are canonicalised but not filtered by host; enqueue
    /// decisions belong to the orchestrator.
    pub fn extract(&self, page_url: &str, fetched: &FetchedPage) -> CrawlResult<PageRecord> {
        let parsed = Url::parse(page_url).map_err(|_| CrawlError::InvalidUrl {
            url: page_url.to_string(),
        })?;
        let scheme = parsed.scheme().to_string();
        let host = parsed
            .host_str()
            .ok_or_else(|| CrawlError::InvalidUrl {
                url: page_url.to_string(),
            })?
            .to_string();

        let document = Html::parse_document(&fetched.body);

        let mut page = PageRecord::new(page_url);
        page.status_code = fetched.status_code;
        page.content_type = fetched.content_type.clone();
        page.response_time_ms = fetched.response_time_ms;
        page.last_modified = fetched.last_modified;

        page.title = self.extract_title(&document);
        self.extract_meta(&document, &mut page);
        self.extract_link_elements(&document, &mut page, &scheme, &host);
        self.extract_headings(&document, &mut page);
        self.extract_image_alt(&document, &mut page);
        self.extract_anchors(&document, &mut page, &scheme, &host);

        let raw_content = self.extract_main_content(&document);
        page.word_count = raw_content.split_whitespace().count();
        page.main_content = self.clean_content(&raw_content);

        Ok(page)
    }

    fn extract_title(&self, document: &Html) -> String {
        document
            .select(&self.title)
            .map(|el| element_text(el))
            .find(|text| !text.is_empty())
            .unwrap_or_default()
    }

    fn extract_meta(&self, document: &Html, page: &mut PageRecord) {
        for el in document.select(&self.meta) {
            let name = el.value().attr("name").unwrap_or_default();
            let property = el.value().attr("property").unwrap_or_default();
            let content = el.value().attr("content").unwrap_or_default();

            if (name == "description" || property == "og:description")
                && page.meta_description.is_empty()
            {
                page.meta_description = content.to_string();
            } else if name == "keywords" {
                page.meta_keywords = content.to_string();
            } else if name == "language" || property == "og:locale" {
                page.language = content.to_string();
            } else if property == "og:title" && page.title.is_empty() {
                page.title = content.to_string();
            }
        }
    }

    fn extract_link_elements(
        &self,
        document: &Html,
        page: &mut PageRecord,
        scheme: &str,
        host: &str,
    ) {
        for el in document.select(&self.link_rel) {
            let rel = el.value().attr("rel").unwrap_or_default();
            let href = el.value().attr("href").unwrap_or_default();

            if rel == "canonical" {
                page.canonical = href.to_string();
            } else if rel.contains("icon") && !href.is_empty() && page.favicon.is_empty() {
                page.favicon = resolve_href(href, scheme, host);
                tracing::debug!(url = %page.url, favicon = %page.favicon, "favicon found");
            }
        }
    }

    fn extract_headings(&self, document: &Html, page: &mut PageRecord) {
        for (tag, selector) in &self.headings {
            for el in document.select(selector) {
                let text = element_text(el);
                if !text.is_empty() {
                    page.headings.entry(tag.clone()).or_default().push(text);
                }
            }
        }
    }

    fn extract_image_alt(&self, document: &Html, page: &mut PageRecord) {
        for el in document.select(&self.images) {
            if let Some(alt) = el.value().attr("alt") {
                if !alt.is_empty() {
                    page.image_alt.push(alt.to_string());
                }
            }
        }
    }

    fn extract_anchors(&self, document: &Html, page: &mut PageRecord, scheme: &str, host: &str) {
        for el in document.select(&self.anchors) {
            if el
                .value()
                .attr("rel")
                .map(|rel| rel.contains("nofollow"))
                .unwrap_or(false)
            {
                continue;
            }

            let href = el.value().attr("href").unwrap_or_default();
            if href.is_empty()
                || href.starts_with('#')
                || href.starts_with("mailto:")
                || href.starts_with("tel:")
            {
                continue;
            }

            let full_url = resolve_href(href, scheme, host);
            let clean_url = match canonicalize_url(&full_url) {
                Ok(url) => url,
                Err(_) => {
                    tracing::debug!(href = %href, "unresolvable href, skipping");
                    continue;
                }
            };

            page.outbound_links.push(Link::new(element_text(el), clean_url));
        }
    }

    /// Text nodes outside navigation chrome, joined by single spaces.
    /// Fragments of three characters or fewer are noise.
    fn extract_main_content(&self, document: &Html) -> String {
        let mut content = String::new();

        for node in document.root_element().descendants() {
            let Some(text) = node.value().as_text() else {
                continue;
            };

            let in_ignored = node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .map(|el| IGNORED_ANCESTORS.contains(&el.name()))
                    .unwrap_or(false)
            });
            if in_ignored {
                continue;
            }

            let trimmed = text.trim();
            if trimmed.len() > 3 {
                if !content.is_empty() {
                    content.push(' ');
                }
                content.push_str(trimmed);
            }
        }

        content
    }

    fn clean_content(&self, content: &str) -> String {
        let cleaned = content.replace("JavaScript", "").replace("document.write", "");
        let cleaned = self.control_chars.replace_all(&cleaned, "");
        let cleaned = self.whitespace.replace_all(&cleaned, " ");
        cleaned.trim().to_string()
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Descendant text of an element, trimmed and space-joined.
fn element_text(el: ElementRef) -> String {
    let mut out = String::new();
    for piece in el.text() {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(piece);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetched(body: &str) -> FetchedPage {
        FetchedPage {
            body: body.to_string(),
            status_code: 200,
            content_type: "text/html".to_string(),
            response_time_ms: 12,
            last_modified: None,
        }
    }

    fn extract(body: &str) -> PageRecord {
        Extractor::new()
            .extract("https://site.test/page", &fetched(body))
            .unwrap()
    }

    #[test]
    fn title_first_non_empty_wins() {
        let page = extract("<html><head><title></title><title>Real Title</title></head></html>");
        assert_eq!(page.title, "Real Title");
    }

    #[test]
    fn og_title_is_a_fallback_only() {
        let page = extract(
            r#"<head><meta property="og:title" content="OG"><title>Tag</title></head>"#,
        );
        assert_eq!(page.title, "Tag");

        let page = extract(r#"<head><meta property="og:title" content="OG"></head>"#);
        assert_eq!(page.title, "OG");
    }

    #[test]
    fn meta_fields_first_wins() {
        let page = extract(
            r#"<head>
                <meta name="description" content="first">
                <meta property="og:description" content="second">
                <meta name="keywords" content="a,b,c">
                <meta property="og:locale" content="en_US">
            </head>"#,
        );
        assert_eq!(page.meta_description, "first");
        assert_eq!(page.meta_keywords, "a,b,c");
        assert_eq!(page.language, "en_US");
    }

    #[test]
    fn canonical_and_favicon() {
        let page = extract(
            r#"<head>
                <link rel="canonical" href="https://site.test/canon">
                <link rel="shortcut icon" href="/favicon.ico">
                <link rel="icon" href="/second.ico">
            </head>"#,
        );
        assert_eq!(page.canonical, "https://site.test/canon");
        assert_eq!(page.favicon, "https://site.test/favicon.ico");
    }

    #[test]
    fn headings_in_document_order() {
        let page = extract("<body><h1>One</h1><h2>Sub A</h2><h1>Two</h1><h2>Sub B</h2></body>");
        assert_eq!(page.headings["h1"], vec!["One", "Two"]);
        assert_eq!(page.headings["h2"], vec!["Sub A", "Sub B"]);
        assert!(!page.headings.contains_key("h3"));
    }

    #[test]
    fn anchors_resolved_and_canonicalised() {
        let page = extract(
            r#"<body>
                <a href="/about?utm=x#top">About</a>
                <a href="https://other.test/page">Other</a>
                <a href="//cdn.test/asset">CDN</a>
                <a href="contact">Contact</a>
            </body>"#,
        );
        let urls: Vec<&str> = page.outbound_links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://site.test/about",
                "https://other.test/page",
                "https://cdn.test/asset",
                "https://site.test/contact",
            ]
        );
        assert_eq!(page.outbound_links[0].text, "About");
    }

    #[test]
    fn nofollow_and_pseudo_links_skipped() {
        let page = extract(
            r##"<body>
                <a href="/ok">Fine</a>
                <a rel="nofollow" href="/no">Nofollow</a>
                <a href="#section">Anchor</a>
                <a href="mailto:a@b.test">Mail</a>
                <a href="tel:+123">Phone</a>
                <a href="">Empty</a>
            </body>"##,
        );
        assert_eq!(page.outbound_links.len(), 1);
        assert_eq!(page.outbound_links[0].url, "https://site.test/ok");
    }

    #[test]
    fn main_content_skips_chrome() {
        let page = extract(
            r#"<body>
                <nav>Navigation menu items</nav>
                <header>Header banner text</header>
                <p>Actual article body text.</p>
                <aside>Sidebar junk content</aside>
                <script>var tracking = true;</script>
                <footer>Footer copyright line</footer>
            </body>"#,
        );
        assert_eq!(page.main_content, "Actual article body text.");
        assert_eq!(page.word_count, 4);
    }

    #[test]
    fn short_text_fragments_are_noise() {
        let page = extract("<body><p>ok</p><p>Long enough text</p></body>");
        assert_eq!(page.main_content, "Long enough text");
    }

    #[test]
    fn content_cleaning_removes_junk() {
        let extractor = Extractor::new();
        let cleaned =
            extractor.clean_content("Use  JavaScript \u{0007}here document.write now\t \n done");
        assert_eq!(cleaned, "Use here now done");
    }

    #[test]
    fn image_alt_collected() {
        let page = extract(r#"<body><img alt="A chart"><img alt=""><img src="x.png"></body>"#);
        assert_eq!(page.image_alt, vec!["A chart"]);
    }

    #[test]
    fn response_facts_carried_through() {
        let page = extract("<body><p>Some body text here</p></body>");
        assert_eq!(page.status_code, 200);
        assert_eq!(page.content_type, "text/html");
        assert_eq!(page.response_time_ms, 12);
    }
}
