use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Narrative synthesis over everything an owner has captured.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KnowledgeDigest {
    pub focus_areas: Vec<String>,
    pub thoughts: Vec<String>,
    pub viewpoints: Vec<String>,
    pub preferences: Vec<String>,
    pub overview: String,
    pub cover_prompt: String,
    pub owner_name: String,
    pub item_count: usize,
}

/// Last generated digest for an owner, keyed by the item count it was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestCache {
    pub owner_id: String,
    pub digest: KnowledgeDigest,
    pub image_url: Option<String>,
    pub item_count: usize,
    pub degraded: bool,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DigestResult {
    NotEnoughContent { available: usize, required: usize },
    Cached(DigestCache),
    Generated(DigestCache),
}

impl DigestResult {
    pub fn digest(&self) -> Option<&DigestCache> {
        match self {
            DigestResult::Cached(c) | DigestResult::Generated(c) => Some(c),
            DigestResult::NotEnoughContent { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Insight,
    Rss,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Insight => "insight",
            ReportKind::Rss => "rss",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "rss" {
            ReportKind::Rss
        } else {
            ReportKind::Insight
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ReportKind::Insight => "Weekly Insight Briefing",
            ReportKind::Rss => "Weekly RSS Intelligence",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyReport {
    pub id: i64,
    pub owner_id: String,
    pub kind: ReportKind,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWeeklyReport {
    pub owner_id: String,
    pub kind: ReportKind,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub content: String,
}
