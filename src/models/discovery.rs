use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Topic/method/result breakdown shown for a discovered entry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DiscoverySummary {
    pub topic: String,
    pub method: String,
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryItem {
    pub id: i64,
    pub owner_id: String,
    pub title: String,
    pub url: String,
    pub summary: DiscoverySummary,
    pub reason: String,
    pub source_name: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDiscoveryItem {
    pub title: String,
    pub url: String,
    pub summary: DiscoverySummary,
    pub reason: String,
    pub category: String,
}
