use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use encoding_rs::{Encoding, UTF_8};
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use crate::config::FetchConfig;
use crate::error::{AppError, Result};

/// How far into a document to look for a `<meta charset>` declaration.
const META_SNIFF_BYTES: usize = 2048;

/// Raw response for one URL. Feeds are parsed from `body` directly; HTML
/// goes through [`FetchedPage::text`].
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

fn meta_charset_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?([a-z0-9_:.\-]+)"#).ok())
        .as_ref()
}

impl FetchedPage {
    /// Decodes the body using the declared charset: the `Content-Type`
    /// header first, then a `<meta>` tag, then UTF-8. A BOM wins over both.
    pub fn text(&self) -> String {
        let (text, encoding, had_errors) = self.encoding().decode(&self.body);
        if had_errors {
            tracing::debug!(
                "Undecodable bytes in {} as {}",
                self.final_url,
                encoding.name()
            );
        }
        text.into_owned()
    }

    fn encoding(&self) -> &'static Encoding {
        header_charset(&self.content_type)
            .and_then(|label| Encoding::for_label(label.as_bytes()))
            .or_else(|| self.meta_encoding())
            .unwrap_or(UTF_8)
    }

    fn meta_encoding(&self) -> Option<&'static Encoding> {
        let head = String::from_utf8_lossy(&self.body[..self.body.len().min(META_SNIFF_BYTES)]);
        let label = meta_charset_pattern()?.captures(&head)?.get(1)?.as_str();
        Encoding::for_label(label.as_bytes())
    }

    pub fn looks_like_html(&self) -> bool {
        self.content_type.contains("html")
            || self.body.starts_with(b"<!")
            || self.body.starts_with(b"<html")
    }
}

fn header_charset(content_type: &str) -> Option<&str> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("charset"))
        .map(|(_, value)| value.trim().trim_matches('"'))
}

/// Anything that can hand back the bytes behind a URL.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;
}

/// HTTP page source with a fixed user agent. No caching between calls.
pub struct ContentFetcher {
    client: Client,
}

impl ContentFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageSource for ContentFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            tracing::debug!("Failed to fetch {}: {}", url, response.status());
            return Err(AppError::HttpStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();
        let body = response.bytes().await?.to_vec();

        Ok(FetchedPage {
            final_url,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(content_type: &str, body: &[u8]) -> FetchedPage {
        FetchedPage {
            final_url: "https://example.com/".into(),
            content_type: content_type.into(),
            body: body.to_vec(),
        }
    }

    #[test]
    fn html_detection_uses_header_or_prefix() {
        assert!(page("text/html; charset=utf-8", b"hello").looks_like_html());
        assert!(page("", b"<!DOCTYPE html><p>x</p>").looks_like_html());
        assert!(!page("application/rss+xml", b"<?xml version=\"1.0\"?>").looks_like_html());
    }

    #[test]
    fn header_charset_decodes_legacy_encodings() {
        assert_eq!(page("text/html; charset=iso-8859-1", b"caf\xE9").text(), "caf\u{e9}");
        assert_eq!(
            page("text/html; charset=GBK", &[0xD6, 0xD0, 0xCE, 0xC4]).text(),
            "\u{4e2d}\u{6587}"
        );
    }

    #[test]
    fn meta_charset_is_used_without_header() {
        let mut body = b"<html><head><meta charset=\"gb2312\"></head><body>".to_vec();
        body.extend_from_slice(&[0xD6, 0xD0, 0xCE, 0xC4]);
        let text = page("text/html", &body).text();
        assert!(text.ends_with("<body>\u{4e2d}\u{6587}"));

        let mut body =
            b"<meta http-equiv=\"Content-Type\" content=\"text/html; charset=windows-1252\">".to_vec();
        body.extend_from_slice(b"na\xEFve");
        assert!(page("", &body).text().ends_with("na\u{ef}ve"));
    }

    #[test]
    fn undeclared_bodies_default_to_utf8() {
        assert_eq!(page("text/html", "caf\u{e9}".as_bytes()).text(), "caf\u{e9}");
        assert_eq!(page("text/html; charset=bogus", b"plain").text(), "plain");
    }

    #[test]
    fn client_builds_from_config() {
        assert!(ContentFetcher::new(&FetchConfig::default()).is_ok());
    }
}
