use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry pulled out of an RSS/Atom document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub snippet: String,
    pub source_name: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// A feed located at (or linked from) a user-supplied URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredFeed {
    pub title: String,
    pub url: String,
    pub site_url: Option<String>,
    pub description: Option<String>,
}
