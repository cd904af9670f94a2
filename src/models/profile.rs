use serde::{Deserialize, Serialize};

/// How often a user's subscriptions are polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollCadence {
    #[default]
    Daily,
    Weekly,
}

/// Weekdays (0 = Sunday) and local `HH:MM` at which a report is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSchedule {
    #[serde(default = "default_report_days")]
    pub days: Vec<u32>,
    #[serde(default = "default_report_time")]
    pub time: String,
}

fn default_report_days() -> Vec<u32> {
    vec![1]
}

fn default_report_time() -> String {
    "09:00".to_string()
}

impl Default for ReportSchedule {
    fn default() -> Self {
        Self {
            days: default_report_days(),
            time: default_report_time(),
        }
    }
}

impl ReportSchedule {
    pub fn minutes_of_day(&self) -> Option<u32> {
        let (h, m) = self.time.trim().split_once(':')?;
        let h: u32 = h.parse().ok()?;
        let m: u32 = m.parse().ok()?;
        (h < 24 && m < 60).then_some(h * 60 + m)
    }
}

/// Per-user overrides. Read-only input to every job.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub prompt: Option<String>,
    pub insight_prompt: Option<String>,
    pub rss_prompt: Option<String>,
    pub notification_email: Option<String>,
    pub poll_cadence: PollCadence,
    pub insight_report: ReportSchedule,
    pub rss_report: ReportSchedule,
    pub utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub api_key: Option<String>,
    pub ai_config: Option<AiConfig>,
}

impl Profile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            email: None,
            api_key: None,
            ai_config: None,
        }
    }

    /// Name used when addressing the owner in generated digests.
    pub fn owner_name(&self) -> String {
        self.display_name
            .clone()
            .or_else(|| {
                self.email
                    .as_deref()
                    .and_then(|e| e.split('@').next())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "NeoFeed user".to_string())
    }
}
