use std::cmp::Reverse;
use std::sync::{Arc, OnceLock};

use feed_rs::parser;
use scraper::{Html, Selector};

use crate::error::{AppError, Result};
use crate::models::{DiscoveredFeed, FeedEntry};
use crate::services::PageSource;

/// Only the most recent entries of a feed are considered per poll.
pub const MAX_ENTRIES: usize = 20;

const SNIPPET_CHARS: usize = 500;

pub struct FeedFetcher {
    pages: Arc<dyn PageSource>,
}

impl FeedFetcher {
    pub fn new(pages: Arc<dyn PageSource>) -> Self {
        Self { pages }
    }

    /// Fetches a feed and returns its newest entries.
    ///
    /// Transport and status errors propagate so the caller can retry. A
    /// document that does not parse as RSS/Atom yields an empty list.
    pub async fn fetch_entries(&self, url: &str) -> Result<Vec<FeedEntry>> {
        let page = self.pages.fetch(url).await?;
        let entries = parse_entries(&page.body);
        tracing::debug!("Fetched {} entries from {}", entries.len(), url);
        Ok(entries)
    }

    /// Resolve a user-supplied URL to a feed.
    /// If the URL is a direct RSS/Atom feed, parse it directly.
    /// If it's an HTML page, look for feed links in <link> tags.
    pub async fn discover_feed(&self, url: &str) -> Result<DiscoveredFeed> {
        let page = self.pages.fetch(url).await?;

        if let Ok(feed) = parser::parse(&page.body[..]) {
            return Ok(discovered(feed, page.final_url));
        }

        if page.looks_like_html() {
            let html = page.text();
            if let Some(feed_url) = find_feed_link(&html, &page.final_url) {
                let feed_page = self.pages.fetch(&feed_url).await?;
                if let Ok(feed) = parser::parse(&feed_page.body[..]) {
                    return Ok(discovered(feed, feed_url));
                }
            }
        }

        Err(AppError::NotFound(format!("no RSS/Atom feed at {url}")))
    }
}

fn discovered(feed: feed_rs::model::Feed, url: String) -> DiscoveredFeed {
    DiscoveredFeed {
        title: feed
            .title
            .map(|t| t.content)
            .unwrap_or_else(|| "Untitled Feed".to_string()),
        url,
        site_url: feed.links.first().map(|l| l.href.clone()),
        description: feed.description.map(|d| d.content),
    }
}

/// Parses an RSS/Atom document into at most [`MAX_ENTRIES`] entries, newest
/// first. Unparseable input is logged and treated as an empty feed.
pub fn parse_entries(bytes: &[u8]) -> Vec<FeedEntry> {
    let feed = match parser::parse(bytes) {
        Ok(feed) => feed,
        Err(e) => {
            tracing::warn!("Feed did not parse, treating as empty: {}", e);
            return Vec::new();
        }
    };

    let source_name = feed
        .title
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Unknown Source".to_string());

    let mut entries: Vec<FeedEntry> = feed
        .entries
        .into_iter()
        .map(|entry| {
            // Try content first, then fall back to summary
            let html = entry
                .content
                .as_ref()
                .and_then(|c| c.body.as_ref())
                .or_else(|| entry.summary.as_ref().map(|s| &s.content));

            let snippet = html
                .and_then(|html| html2text::from_read(html.as_bytes(), 80).ok())
                .map(|text| snippet_from(&text))
                .unwrap_or_default();

            FeedEntry {
                title: entry
                    .title
                    .map(|t| t.content.trim().to_string())
                    .unwrap_or_else(|| "Untitled".to_string()),
                link: entry
                    .links
                    .first()
                    .map(|l| l.href.clone())
                    .unwrap_or_default(),
                snippet,
                source_name: source_name.clone(),
                published_at: entry.published.or(entry.updated),
            }
        })
        .collect();

    // Undated entries keep document order after the dated ones.
    entries.sort_by_key(|e| Reverse(e.published_at));
    entries.truncate(MAX_ENTRIES);
    entries
}

fn snippet_from(text: &str) -> String {
    let joined = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    joined.chars().take(SNIPPET_CHARS).collect()
}

fn feed_link_selector() -> Option<&'static Selector> {
    static SELECTOR: OnceLock<Option<Selector>> = OnceLock::new();
    SELECTOR
        .get_or_init(|| Selector::parse(r#"link[rel~="alternate"][href]"#).ok())
        .as_ref()
}

/// First `<link rel=alternate>` advertising an RSS or Atom feed, in any
/// attribute order.
fn find_feed_link(html: &str, base_url: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let href = document
        .select(feed_link_selector()?)
        .find(|link| {
            link.value().attr("type").is_some_and(|t| {
                let t = t.trim().to_ascii_lowercase();
                t == "application/rss+xml" || t == "application/atom+xml"
            })
        })?
        .value()
        .attr("href")?
        .trim();

    (!href.is_empty()).then(|| resolve_url(href, base_url))
}

/// Resolve a potentially relative URL against a base URL
fn resolve_url(href: &str, base_url: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }

    if let Ok(base) = url::Url::parse(base_url) {
        if let Ok(resolved) = base.join(href) {
            return resolved.to_string();
        }
    }

    href.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::FetchedPage;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct StaticPages(HashMap<String, (String, String)>);

    #[async_trait]
    impl PageSource for StaticPages {
        async fn fetch(&self, url: &str) -> Result<FetchedPage> {
            let (content_type, body) = self.0.get(url).cloned().ok_or(AppError::HttpStatus {
                status: 404,
                url: url.to_string(),
            })?;
            Ok(FetchedPage {
                final_url: url.to_string(),
                content_type,
                body: body.into_bytes(),
            })
        }
    }

    fn rss_with_items(count: usize) -> String {
        let items: String = (0..count)
            .map(|i| {
                format!(
                    "<item><title>Post {i}</title><link>https://blog.example.com/{i}</link>\
                     <description>&lt;p&gt;Body of post {i}&lt;/p&gt;</description>\
                     <pubDate>{:02} Sep 2025 09:00:00 GMT</pubDate></item>",
                    i + 1
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Example Blog</title>
               <link>https://blog.example.com</link>{items}</channel></rss>"#
        )
    }

    #[test]
    fn entries_are_newest_first_and_capped() {
        let entries = parse_entries(rss_with_items(25).as_bytes());
        assert_eq!(entries.len(), MAX_ENTRIES);
        assert_eq!(entries[0].title, "Post 24");
        assert_eq!(entries[0].source_name, "Example Blog");
        assert_eq!(entries[0].snippet, "Body of post 24");
    }

    #[test]
    fn garbage_feed_is_empty_not_an_error() {
        assert!(parse_entries(b"definitely not xml").is_empty());
    }

    #[test]
    fn feed_link_is_resolved_against_page_url() {
        let html = r#"<html><head><link rel="alternate" type="application/rss+xml" href="/feed.xml"></head></html>"#;
        assert_eq!(
            find_feed_link(html, "https://blog.example.com/about").as_deref(),
            Some("https://blog.example.com/feed.xml")
        );
    }

    #[test]
    fn feed_link_found_in_any_attribute_order() {
        let html = r#"<html><head>
            <link rel="stylesheet" href="/site.css">
            <link rel="alternate" type="text/html" href="/en/">
            <link rel=alternate href="https://cdn.example.com/atom.xml" type="application/atom+xml">
        </head><body></body></html>"#;
        assert_eq!(
            find_feed_link(html, "https://blog.example.com/").as_deref(),
            Some("https://cdn.example.com/atom.xml")
        );
        assert_eq!(find_feed_link("<html><body>no feeds</body></html>", "https://x.example/"), None);
    }

    #[tokio::test]
    async fn discovery_follows_html_link_to_feed() {
        let mut pages = HashMap::new();
        pages.insert(
            "https://blog.example.com/".to_string(),
            (
                "text/html".to_string(),
                r#"<html><head><link rel="alternate" type="application/rss+xml" href="/feed.xml"></head><body></body></html>"#.to_string(),
            ),
        );
        pages.insert(
            "https://blog.example.com/feed.xml".to_string(),
            ("application/rss+xml".to_string(), rss_with_items(2)),
        );
        let fetcher = FeedFetcher::new(Arc::new(StaticPages(pages)));

        let feed = fetcher.discover_feed("https://blog.example.com/").await.unwrap();
        assert_eq!(feed.title, "Example Blog");
        assert_eq!(feed.url, "https://blog.example.com/feed.xml");

        let err = fetcher.discover_feed("https://missing.example.com/").await.unwrap_err();
        assert!(matches!(err, AppError::HttpStatus { status: 404, .. }));
    }
}
