use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Tech,
    Life,
    Idea,
    Art,
    #[default]
    Other,
}

impl Category {
    /// Trimmed, case-insensitive match against the closed set; anything
    /// unrecognised collapses to `Other`.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "tech" => Category::Tech,
            "life" => Category::Life,
            "idea" => Category::Idea,
            "art" => Category::Art,
            _ => Category::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Tech => "tech",
            Category::Life => "life",
            Category::Idea => "idea",
            Category::Art => "art",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Positive,
    #[default]
    Neutral,
    Negative,
    Excited,
    Calm,
    Anxious,
    Curious,
}

impl Emotion {
    pub const ALL: [Emotion; 7] = [
        Emotion::Positive,
        Emotion::Neutral,
        Emotion::Negative,
        Emotion::Excited,
        Emotion::Calm,
        Emotion::Anxious,
        Emotion::Curious,
    ];

    pub fn normalize(raw: &str) -> Self {
        let needle = raw.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|e| e.as_str() == needle)
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Positive => "positive",
            Emotion::Neutral => "neutral",
            Emotion::Negative => "negative",
            Emotion::Excited => "excited",
            Emotion::Calm => "calm",
            Emotion::Anxious => "anxious",
            Emotion::Curious => "curious",
        }
    }
}

/// Whether an analysis came from the model or from the deterministic fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Parsed,
    Fallback,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Parsed => "parsed",
            AnalysisStatus::Fallback => "fallback",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "parsed" => Some(AnalysisStatus::Parsed),
            "fallback" => Some(AnalysisStatus::Fallback),
            _ => None,
        }
    }
}

/// Output of the completion service after the parse-or-fallback boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Analyzed<T> {
    Parsed(T),
    Fallback(T),
}

impl<T> Analyzed<T> {
    pub fn status(&self) -> AnalysisStatus {
        match self {
            Analyzed::Parsed(_) => AnalysisStatus::Parsed,
            Analyzed::Fallback(_) => AnalysisStatus::Fallback,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Analyzed::Fallback(_))
    }

    pub fn value(&self) -> &T {
        match self {
            Analyzed::Parsed(v) | Analyzed::Fallback(v) => v,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Analyzed::Parsed(v) | Analyzed::Fallback(v) => v,
        }
    }
}

/// Structured analysis of a single piece of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub title: String,
    pub summary: String,
    pub takeaways: Vec<String>,
    pub tags: Vec<String>,
    pub category: Category,
    pub emotion: Emotion,
    pub reading_time: u32,
}

/// What was learned about one feed entry in a batch call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub index: usize,
    pub topic: String,
    pub method: String,
    pub result: String,
    pub reason: String,
    pub category: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub entries: Vec<EntrySummary>,
    pub tags: Vec<String>,
}

impl BatchSummary {
    /// Batch-level tags followed by per-entry tags, first occurrence wins.
    pub fn all_tags(&self) -> Vec<String> {
        let mut seen = Vec::new();
        let candidates = self
            .tags
            .iter()
            .chain(self.entries.iter().flat_map(|e| e.tags.iter()));
        for tag in candidates {
            let tag = tag.trim();
            if !tag.is_empty() && !seen.iter().any(|s: &String| s.eq_ignore_ascii_case(tag)) {
                seen.push(tag.to_string());
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_normalization_is_case_insensitive_and_trimmed() {
        assert_eq!(Category::normalize("  TECH "), Category::Tech);
        assert_eq!(Category::normalize("Life"), Category::Life);
        assert_eq!(Category::normalize("idea\n"), Category::Idea);
        assert_eq!(Category::normalize("ART"), Category::Art);
    }

    #[test]
    fn unknown_categories_collapse_to_other() {
        for raw in ["", "science", "technology", "tech/life", "other", "情报拦截"] {
            assert_eq!(Category::normalize(raw), Category::Other, "input {raw:?}");
        }
    }

    #[test]
    fn unknown_emotion_is_neutral() {
        assert_eq!(Emotion::normalize("Curious"), Emotion::Curious);
        assert_eq!(Emotion::normalize("melancholic"), Emotion::Neutral);
    }

    #[test]
    fn batch_tags_are_deduplicated_in_order() {
        let batch = BatchSummary {
            entries: vec![EntrySummary {
                index: 0,
                topic: "t".into(),
                method: "m".into(),
                result: "r".into(),
                reason: "why".into(),
                category: "tech".into(),
                tags: vec!["Rust".into(), "compilers".into()],
            }],
            tags: vec!["rust".into(), " ".into(), "systems".into()],
        };
        assert_eq!(batch.all_tags(), vec!["rust", "systems", "compilers"]);
    }
}
