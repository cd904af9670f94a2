use serde::{Deserialize, Serialize};

use super::{DigestResult, Item, ReportKind};

/// A unit of orchestrated work, as carried on the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data")]
pub enum Job {
    #[serde(rename = "feed/process.url")]
    IngestUrl { item_id: i64, owner_id: String },

    #[serde(rename = "feed/process.text")]
    IngestText { item_id: i64, owner_id: String },

    #[serde(rename = "feed/reanalyze")]
    Reanalyze { item_id: i64, owner_id: String },

    #[serde(rename = "sub/poll.rss")]
    PollSubscription {
        subscription_id: i64,
        owner_id: String,
        url: String,
    },

    #[serde(rename = "digest/generate")]
    GenerateDigest {
        owner_id: String,
        force: bool,
        with_image: bool,
    },

    #[serde(rename = "report/generate.insight")]
    InsightReport { owner_id: String },

    #[serde(rename = "report/generate.rss")]
    RssReport { owner_id: String },

    #[serde(rename = "discovery/cleanup")]
    CleanupDiscovery,
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::IngestUrl { .. } => "feed/process.url",
            Job::IngestText { .. } => "feed/process.text",
            Job::Reanalyze { .. } => "feed/reanalyze",
            Job::PollSubscription { .. } => "sub/poll.rss",
            Job::GenerateDigest { .. } => "digest/generate",
            Job::InsightReport { .. } => "report/generate.insight",
            Job::RssReport { .. } => "report/generate.rss",
            Job::CleanupDiscovery => "discovery/cleanup",
        }
    }

    pub fn owner_id(&self) -> Option<&str> {
        match self {
            Job::IngestUrl { owner_id, .. }
            | Job::IngestText { owner_id, .. }
            | Job::Reanalyze { owner_id, .. }
            | Job::PollSubscription { owner_id, .. }
            | Job::GenerateDigest { owner_id, .. }
            | Job::InsightReport { owner_id }
            | Job::RssReport { owner_id } => Some(owner_id),
            Job::CleanupDiscovery => None,
        }
    }

    /// The ingest job for a stored item: a URL wins over pasted content.
    pub fn ingest_for(item: &Item) -> Self {
        let item_id = item.id;
        let owner_id = item.owner_id.clone();
        if item.url.is_some() {
            Job::IngestUrl { item_id, owner_id }
        } else {
            Job::IngestText { item_id, owner_id }
        }
    }

    pub fn report(owner_id: impl Into<String>, kind: ReportKind) -> Self {
        let owner_id = owner_id.into();
        match kind {
            ReportKind::Insight => Job::InsightReport { owner_id },
            ReportKind::Rss => Job::RssReport { owner_id },
        }
    }
}

/// What a successful job produced.
#[derive(Debug, Clone, PartialEq)]
pub enum JobReport {
    Ingested { item_id: i64, degraded: bool },
    Polled { source_name: String, stored: usize, degraded: bool },
    Digest(DigestResult),
    Report { report_id: i64, emailed: bool },
    Cleaned { removed: usize },
}

/// Terminal status of one job run.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded(JobReport),
    Skipped(String),
    Failed { step: String, error: String },
}

impl JobOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, JobOutcome::Failed { .. })
    }
}
