use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AnalysisStatus, Category};

/// Lifecycle of a captured item. Only ever moves forward:
/// `Pending -> Processing -> Done | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Done => "done",
            ItemStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Done | ItemStatus::Failed)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ItemStatus::Pending),
            "processing" => Ok(ItemStatus::Processing),
            "done" => Ok(ItemStatus::Done),
            "failed" => Ok(ItemStatus::Failed),
            other => Err(format!("unknown item status: {other}")),
        }
    }
}

/// Where a submission came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    ManualUrl,
    ManualText,
    Api,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::ManualUrl => "manual_url",
            SourceType::ManualText => "manual_text",
            SourceType::Api => "api",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "manual_text" => SourceType::ManualText,
            "api" => SourceType::Api,
            _ => SourceType::ManualUrl,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub owner_id: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub content_raw: Option<String>,
    pub summary: Option<String>,
    pub takeaways: Vec<String>,
    pub tags: Vec<String>,
    pub category: Category,
    pub emotion: Option<String>,
    pub reading_time: Option<u32>,
    pub status: ItemStatus,
    pub analysis_status: Option<AnalysisStatus>,
    pub source_type: SourceType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewItem {
    pub owner_id: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub content_raw: Option<String>,
    pub source_type: SourceType,
}

impl NewItem {
    pub fn from_url(owner_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            url: Some(url.into()),
            title: None,
            content_raw: None,
            source_type: SourceType::ManualUrl,
        }
    }

    pub fn from_text(owner_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            url: None,
            title: None,
            content_raw: Some(content.into()),
            source_type: SourceType::ManualText,
        }
    }
}

/// Fields written back once analysis for an item has succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemAnalysisUpdate {
    pub title: String,
    pub content_raw: String,
    pub summary: String,
    pub takeaways: Vec<String>,
    pub tags: Vec<String>,
    pub category: Category,
    pub emotion: String,
    pub reading_time: u32,
    pub analysis_status: AnalysisStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!ItemStatus::Pending.is_terminal());
        assert!(!ItemStatus::Processing.is_terminal());
        assert!(ItemStatus::Done.is_terminal());
        assert!(ItemStatus::Failed.is_terminal());
    }

    #[test]
    fn status_parses_its_own_labels() {
        for status in [
            ItemStatus::Pending,
            ItemStatus::Processing,
            ItemStatus::Done,
            ItemStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ItemStatus>(), Ok(status));
        }
        assert!("archived".parse::<ItemStatus>().is_err());
    }
}
