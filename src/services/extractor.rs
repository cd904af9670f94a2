//! Readable-article extraction from raw HTML.
//!
//! Candidates are tried in order: `<article>`, `<main>`, `[role="main"]`,
//! the container holding the most paragraph text, then `<body>`. Navigation,
//! page chrome, forms, scripts and ad containers are skipped while walking
//! each candidate.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// A candidate with at least this many characters is taken as the article.
const SUBSTANTIAL_CHARS: usize = 200;
/// Below this nothing readable is considered left.
const MIN_USABLE_CHARS: usize = 50;

const NOISE_TAGS: &[&str] = &[
    "nav", "header", "footer", "aside", "script", "style", "noscript", "form", "iframe", "svg",
    "button", "template",
];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "h1", "h2", "h3", "h4", "h5", "h6", "li", "ul",
    "ol", "blockquote", "pre", "br", "tr", "table", "figure", "figcaption", "dd", "dt",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub title: Option<String>,
    pub text: String,
}

fn ad_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(^|[\s_-])(ads?|advert\w*|sponsor\w*|promo\w*|banner|sidebar|cookie\w*|newsletter|social|share\w*|related)([\s_-]|$)",
        )
        .ok()
    })
    .as_ref()
}

/// Extracts the main readable text and a title from an HTML page.
///
/// Fails with [`AppError::Extraction`] when no substantial text remains
/// after boilerplate removal.
pub fn extract_article(html: &str) -> Result<Article> {
    let document = Html::parse_document(html);
    let title = extract_title(&document);

    let mut best = String::new();
    for candidate in candidates(&document) {
        let text = readable_text(candidate);
        let len = text.chars().count();
        if len >= SUBSTANTIAL_CHARS {
            best = text;
            break;
        }
        if len > best.chars().count() {
            best = text;
        }
    }

    if best.chars().count() < MIN_USABLE_CHARS {
        // Pages without block structure still render to something via html2text.
        if let Ok(text) = html2text::from_read(html.as_bytes(), 80) {
            let cleaned = clean_lines(&text);
            if cleaned.chars().count() > best.chars().count() {
                best = cleaned;
            }
        }
    }

    if best.chars().count() < MIN_USABLE_CHARS {
        return Err(AppError::Extraction(format!(
            "no readable text found ({} chars)",
            best.chars().count()
        )));
    }

    Ok(Article { title, text: best })
}

fn extract_title(document: &Html) -> Option<String> {
    if let Ok(selector) = Selector::parse(r#"meta[property="og:title"]"#) {
        if let Some(content) = document
            .select(&selector)
            .filter_map(|el| el.value().attr("content"))
            .map(str::trim)
            .find(|s| !s.is_empty())
        {
            return Some(content.to_string());
        }
    }

    for selector_str in ["title", "h1"] {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(el) = document.select(&selector).next() {
                let text = collapse_whitespace(&el.text().collect::<String>());
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }
    }

    None
}

fn candidates(document: &Html) -> Vec<ElementRef<'_>> {
    let mut found = Vec::new();

    for selector_str in ["article", "main", "[role='main']"] {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(el) = document.select(&selector).next() {
                found.push(el);
            }
        }
    }

    if let Some(el) = densest_container(document) {
        found.push(el);
    }

    if let Ok(selector) = Selector::parse("body") {
        if let Some(el) = document.select(&selector).next() {
            found.push(el);
        }
    }

    found
}

/// The element whose direct `<p>` children carry the most text.
fn densest_container(document: &Html) -> Option<ElementRef<'_>> {
    let selector = Selector::parse("p").ok()?;
    let mut scores = HashMap::new();

    for paragraph in document.select(&selector) {
        let Some(parent) = paragraph.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        if is_noise(&parent) {
            continue;
        }
        let len = paragraph.text().map(|t| t.trim().chars().count()).sum::<usize>();
        let entry = scores.entry(parent.id()).or_insert((parent, 0usize));
        entry.1 += len;
    }

    scores
        .into_values()
        .max_by_key(|(_, score)| *score)
        .map(|(el, _)| el)
}

fn is_noise(element: &ElementRef) -> bool {
    let value = element.value();
    if NOISE_TAGS.contains(&value.name()) {
        return true;
    }
    let Some(pattern) = ad_pattern() else {
        return false;
    };
    value.id().is_some_and(|id| pattern.is_match(id))
        || value.attr("class").is_some_and(|c| pattern.is_match(c))
}

fn readable_text(root: ElementRef) -> String {
    let mut raw = String::new();
    collect_text(root, &mut raw);
    clean_lines(&raw)
}

fn collect_text(element: ElementRef, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                let Some(el) = ElementRef::wrap(child) else {
                    continue;
                };
                if is_noise(&el) {
                    continue;
                }
                let block = BLOCK_TAGS.contains(&el.value().name());
                if block {
                    out.push('\n');
                }
                collect_text(el, out);
                if block {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clean_lines(text: &str) -> String {
    text.lines()
        .map(collapse_whitespace)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
