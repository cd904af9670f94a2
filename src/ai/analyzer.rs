use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{
    Analysis, Analyzed, BatchSummary, Category, DiscoveryItem, Emotion, EntrySummary, FeedEntry,
    Item, KnowledgeDigest, ReportKind,
};

use super::client::{CompletionService, ModelConfig};

/// Summaries longer than this are cut.
pub const MAX_SUMMARY_CHARS: usize = 300;
/// Entries kept by the degraded batch result.
pub const FALLBACK_BATCH_SIZE: usize = 3;

const FALLBACK_SUMMARY_CHARS: usize = 200;
const FALLBACK_TITLE_CHARS: usize = 60;
const MAX_CONTENT_CHARS: usize = 12_000;
const MAX_DIGEST_ITEMS: usize = 60;
const CHARS_PER_MINUTE: usize = 500;

const DEFAULT_ANALYSIS_PROMPT: &str =
    "You are a careful reading assistant. Analyze the article the user provides.";

const ANALYSIS_CONTRACT: &str = r#"Respond with a single JSON object and nothing else:
{
  "title": "concise title",
  "summary": "core summary in the article's own language, at most 300 characters",
  "takeaways": ["key point", "key point", "key point"],
  "tags": ["tag", "tag"],
  "category": "tech | life | idea | art | other",
  "emotion": "positive | neutral | negative | excited | calm | anxious | curious",
  "reading_time": 5
}
reading_time is an integer number of minutes. Do not reproduce the full text."#;

const BATCH_CONTRACT: &str = r#"Pick the entries worth the reader's attention and respond with a single JSON object:
{
  "items": [
    {"index": 0, "topic": "what it is about", "method": "how it approaches it", "result": "what it concludes", "reason": "one line on why it matters to this reader", "category": "tech | life | idea | art | other", "tags": ["tag"]}
  ],
  "tags": ["theme of this source", "theme"]
}
index refers to the numbered entries below. Omit entries that are not worth reading."#;

const DIGEST_CONTRACT: &str = r#"You write a personal knowledge portrait from the items a reader has saved.
Respond with a single JSON object:
{
  "focus_areas": ["area"],
  "thoughts": ["recurring thought"],
  "viewpoints": ["stance the reader seems to hold"],
  "preferences": ["content preference"],
  "overview": "one paragraph addressed to the reader",
  "cover_prompt": "an image prompt that captures these interests"
}"#;

const DEFAULT_INSIGHT_PROMPT: &str = "You are a personal research editor. From the items the reader saved this week, write a weekly insight briefing in Markdown: the main threads, how they connect, and two or three questions worth pursuing next week.";

const DEFAULT_RSS_PROMPT: &str = "You are an intelligence analyst. From the entries discovered in the reader's subscriptions, write a weekly briefing in Markdown: notable developments grouped by theme, each with a one-line why-it-matters and its link.";

/// Prompt assembly and response parsing around a [`CompletionService`].
///
/// Every structured call goes through the parse-or-fallback boundary: a
/// response that does not contain the expected JSON produces a deterministic
/// [`Analyzed::Fallback`] instead of an error. Transport and status errors
/// from the service still propagate so the caller can retry them.
pub struct Analyzer {
    service: Arc<dyn CompletionService>,
}

impl Analyzer {
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        Self { service }
    }

    pub async fn analyze(
        &self,
        content: &str,
        url: Option<&str>,
        title: Option<&str>,
        prompt: Option<&str>,
        model: &ModelConfig,
    ) -> Result<Analyzed<Analysis>> {
        let system = format!(
            "{}\n\n{}",
            prompt.filter(|p| !p.trim().is_empty()).unwrap_or(DEFAULT_ANALYSIS_PROMPT),
            ANALYSIS_CONTRACT
        );

        let mut user = String::from("Analyze the following content.\n\n");
        if let Some(title) = title {
            user.push_str(&format!("Title: {title}\n"));
        }
        if let Some(url) = url {
            user.push_str(&format!("URL: {url}\n"));
        }
        user.push_str("Content:\n");
        user.push_str(&truncate_chars(content, MAX_CONTENT_CHARS));

        let raw = self.service.complete(&system, &user, model).await?;

        match extract_json(&raw).and_then(|v| analysis_from_value(&v, content, title)) {
            Some(analysis) => Ok(Analyzed::Parsed(analysis)),
            None => {
                tracing::warn!(
                    "Analysis response was not usable JSON ({} chars), using fallback",
                    raw.len()
                );
                Ok(Analyzed::Fallback(fallback_analysis(content, title)))
            }
        }
    }

    pub async fn summarize_batch(
        &self,
        entries: &[FeedEntry],
        themes: &[String],
        prompt: Option<&str>,
        model: &ModelConfig,
    ) -> Result<Analyzed<BatchSummary>> {
        if entries.is_empty() {
            return Ok(Analyzed::Parsed(BatchSummary::default()));
        }

        let mut system = String::new();
        if let Some(prompt) = prompt.filter(|p| !p.trim().is_empty()) {
            system.push_str(&format!("Reader profile:\n{prompt}\n\n"));
        }
        if !themes.is_empty() {
            system.push_str(&format!(
                "Themes this source has covered before: {}\n\n",
                themes.join(", ")
            ));
        }
        system.push_str(BATCH_CONTRACT);

        let user = entries
            .iter()
            .enumerate()
            .map(|(i, e)| format!("[{i}] {}\n{}\n{}", e.title, e.link, e.snippet))
            .collect::<Vec<_>>()
            .join("\n\n");

        let raw = self.service.complete(&system, &user, model).await?;

        match extract_json(&raw).and_then(|v| batch_from_value(&v, entries.len())) {
            Some(batch) => Ok(Analyzed::Parsed(batch)),
            None => {
                tracing::warn!("Batch response was not usable JSON, keeping the first entries");
                Ok(Analyzed::Fallback(fallback_batch(entries)))
            }
        }
    }

    pub async fn knowledge_digest(
        &self,
        items: &[Item],
        owner_name: &str,
        model: &ModelConfig,
    ) -> Result<Analyzed<KnowledgeDigest>> {
        let listing = items
            .iter()
            .take(MAX_DIGEST_ITEMS)
            .map(|item| {
                format!(
                    "- [{}] {}: {} (tags: {})",
                    item.category,
                    item.title.as_deref().unwrap_or("Untitled"),
                    item.summary.as_deref().unwrap_or(""),
                    item.tags.join(", ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let user = format!(
            "Reader: {owner_name}\nSaved items ({} total):\n{listing}",
            items.len()
        );

        let raw = self.service.complete(DIGEST_CONTRACT, &user, model).await?;

        let digest = match extract_json(&raw).and_then(|v| digest_from_value(&v)) {
            Some(digest) => Analyzed::Parsed(digest),
            None => {
                tracing::warn!("Digest response was not usable JSON, building from tags");
                Analyzed::Fallback(fallback_digest(items))
            }
        };

        Ok(match digest {
            Analyzed::Parsed(d) => Analyzed::Parsed(stamp_digest(d, owner_name, items.len())),
            Analyzed::Fallback(d) => Analyzed::Fallback(stamp_digest(d, owner_name, items.len())),
        })
    }

    /// Markdown body of a weekly report.
    pub async fn weekly_report(
        &self,
        kind: ReportKind,
        prompt: Option<&str>,
        material: &str,
        model: &ModelConfig,
    ) -> Result<String> {
        let default_prompt = match kind {
            ReportKind::Insight => DEFAULT_INSIGHT_PROMPT,
            ReportKind::Rss => DEFAULT_RSS_PROMPT,
        };
        let system = prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(default_prompt);

        let raw = self.service.complete(system, material, model).await?;
        let markdown = strip_code_fence(&raw);
        if markdown.is_empty() {
            return Err(AppError::Completion("empty report from model".to_string()));
        }
        Ok(markdown)
    }

    pub async fn cover_image(&self, prompt: &str, model: &ModelConfig) -> Result<Option<String>> {
        if prompt.trim().is_empty() {
            return Ok(None);
        }
        self.service.generate_image(prompt, model).await
    }
}

/// Report material for the owner's recent items.
pub fn insight_material(items: &[Item]) -> String {
    items
        .iter()
        .map(|item| {
            let mut block = format!("## {}\n", item.title.as_deref().unwrap_or("Untitled"));
            if let Some(url) = &item.url {
                block.push_str(&format!("Link: {url}\n"));
            }
            block.push_str(&format!("Category: {}\n", item.category));
            if let Some(summary) = &item.summary {
                block.push_str(&format!("Summary: {summary}\n"));
            }
            for takeaway in &item.takeaways {
                block.push_str(&format!("- {takeaway}\n"));
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Report material for the owner's current discovery items.
pub fn rss_material(items: &[DiscoveryItem]) -> String {
    items
        .iter()
        .map(|d| {
            format!(
                "## {} ({})\nLink: {}\nTopic: {}\nMethod: {}\nResult: {}\nWhy: {}\n",
                d.title,
                d.source_name,
                d.url,
                d.summary.topic,
                d.summary.method,
                d.summary.result,
                d.reason
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn code_block_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").ok())
        .as_ref()
}

/// Pulls the first JSON object out of a model response: a fenced block if
/// present, otherwise the outermost `{ ... }` span.
pub fn extract_json(raw: &str) -> Option<Value> {
    let fenced = code_block_pattern()
        .and_then(|re| re.captures(raw))
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().trim());

    let candidate = match fenced {
        Some(body) if body.starts_with('{') => body,
        _ => {
            let start = raw.find('{')?;
            let end = raw.rfind('}')?;
            if end <= start {
                return None;
            }
            &raw[start..=end]
        }
    };

    serde_json::from_str::<Value>(candidate)
        .ok()
        .filter(Value::is_object)
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    match value.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split([',', '\n'])
            .map(|p| p.trim().trim_start_matches('-').trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn uint_field(value: &Value, key: &str) -> Option<u64> {
    match value.get(key)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.ceil() as u64)),
        Value::String(s) => s
            .trim()
            .trim_end_matches(|c: char| !c.is_ascii_digit())
            .parse()
            .ok(),
        _ => None,
    }
}

fn analysis_from_value(value: &Value, content: &str, title: Option<&str>) -> Option<Analysis> {
    // A response without a summary carries no analysis worth keeping.
    let summary = string_field(value, "summary")?;

    let title = string_field(value, "title")
        .or_else(|| title.map(str::to_string).filter(|t| !t.trim().is_empty()))
        .unwrap_or_else(|| fallback_title(content));

    let reading_time = uint_field(value, "reading_time")
        .filter(|m| *m > 0)
        .map(|m| m.min(u32::MAX as u64) as u32)
        .unwrap_or_else(|| estimate_reading_time(content));

    Some(Analysis {
        title,
        summary: truncate_chars(&summary, MAX_SUMMARY_CHARS),
        takeaways: string_list(value, "takeaways"),
        tags: string_list(value, "tags"),
        category: Category::normalize(&string_field(value, "category").unwrap_or_default()),
        emotion: Emotion::normalize(&string_field(value, "emotion").unwrap_or_default()),
        reading_time,
    })
}

/// Deterministic result used when the model output cannot be parsed.
pub fn fallback_analysis(content: &str, title: Option<&str>) -> Analysis {
    let title = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| fallback_title(content));

    Analysis {
        title,
        summary: truncate_chars(content.trim(), FALLBACK_SUMMARY_CHARS),
        takeaways: Vec::new(),
        tags: Vec::new(),
        category: Category::Other,
        emotion: Emotion::Neutral,
        reading_time: estimate_reading_time(content),
    }
}

fn fallback_title(content: &str) -> String {
    let first_line = content.lines().map(str::trim).find(|l| !l.is_empty());
    match first_line {
        Some(line) => truncate_chars(line, FALLBACK_TITLE_CHARS),
        None => "Untitled".to_string(),
    }
}

/// `ceil(chars / 500)`, never below one minute.
pub fn estimate_reading_time(content: &str) -> u32 {
    let chars = content.chars().count();
    chars.div_ceil(CHARS_PER_MINUTE).max(1) as u32
}

fn batch_from_value(value: &Value, entry_count: usize) -> Option<BatchSummary> {
    let items = value
        .get("items")
        .or_else(|| value.get("entries"))?
        .as_array()?;

    let mut entries: Vec<EntrySummary> = Vec::new();
    for item in items {
        let Some(index) = uint_field(item, "index").map(|i| i as usize) else {
            continue;
        };
        if index >= entry_count || entries.iter().any(|e| e.index == index) {
            continue;
        }
        entries.push(EntrySummary {
            index,
            topic: string_field(item, "topic").unwrap_or_default(),
            method: string_field(item, "method").unwrap_or_default(),
            result: string_field(item, "result").unwrap_or_default(),
            reason: string_field(item, "reason").unwrap_or_default(),
            category: Category::normalize(&string_field(item, "category").unwrap_or_default())
                .as_str()
                .to_string(),
            tags: string_list(item, "tags"),
        });
    }

    Some(BatchSummary {
        entries,
        tags: string_list(value, "tags"),
    })
}

/// Degraded batch: the newest few entries with their snippets.
pub fn fallback_batch(entries: &[FeedEntry]) -> BatchSummary {
    let entries = entries
        .iter()
        .take(FALLBACK_BATCH_SIZE)
        .enumerate()
        .map(|(index, entry)| EntrySummary {
            index,
            topic: entry.title.clone(),
            method: String::new(),
            result: truncate_chars(&entry.snippet, 120),
            reason: format!("Latest from {}", entry.source_name),
            category: Category::Other.as_str().to_string(),
            tags: Vec::new(),
        })
        .collect();

    BatchSummary {
        entries,
        tags: Vec::new(),
    }
}

fn digest_from_value(value: &Value) -> Option<KnowledgeDigest> {
    let overview = string_field(value, "overview")?;
    Some(KnowledgeDigest {
        focus_areas: string_list(value, "focus_areas"),
        thoughts: string_list(value, "thoughts"),
        viewpoints: string_list(value, "viewpoints"),
        preferences: string_list(value, "preferences"),
        overview,
        cover_prompt: string_field(value, "cover_prompt").unwrap_or_default(),
        owner_name: String::new(),
        item_count: 0,
    })
}

fn fallback_digest(items: &[Item]) -> KnowledgeDigest {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for tag in items.iter().flat_map(|i| i.tags.iter()) {
        *counts.entry(tag.to_lowercase()).or_default() += 1;
    }
    let mut tags: Vec<(String, usize)> = counts.into_iter().collect();
    tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let focus_areas: Vec<String> = tags.into_iter().take(5).map(|(t, _)| t).collect();

    let overview = if focus_areas.is_empty() {
        format!("{} saved items so far.", items.len())
    } else {
        format!(
            "{} saved items so far, mostly about {}.",
            items.len(),
            focus_areas.join(", ")
        )
    };

    KnowledgeDigest {
        focus_areas,
        overview,
        ..KnowledgeDigest::default()
    }
}

fn stamp_digest(mut digest: KnowledgeDigest, owner_name: &str, item_count: usize) -> KnowledgeDigest {
    digest.owner_name = owner_name.to_string();
    digest.item_count = item_count;
    digest
}

fn strip_code_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let body = rest
        .split_once('\n')
        .map(|(_, body)| body)
        .unwrap_or("");
    body.trim_end().trim_end_matches("```").trim().to_string()
}

pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Canned(String);

    #[async_trait]
    impl CompletionService for Canned {
        async fn complete(&self, _system: &str, _user: &str, _model: &ModelConfig) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    fn model() -> ModelConfig {
        ModelConfig {
            base_url: "http://localhost".into(),
            model: "test".into(),
            api_key: "k".into(),
            image_model: None,
        }
    }

    fn analyzer(response: &str) -> Analyzer {
        Analyzer::new(Arc::new(Canned(response.to_string())))
    }

    fn entry(i: usize) -> FeedEntry {
        FeedEntry {
            title: format!("Post {i}"),
            link: format!("https://blog.example.com/{i}"),
            snippet: format!("Snippet {i}"),
            source_name: "Example Blog".into(),
            published_at: None,
        }
    }

    #[tokio::test]
    async fn fenced_json_is_parsed() {
        let response = r#"Here you go:
```json
{"title":"Ownership","summary":"Rust tracks who owns memory.","takeaways":["one owner"],"tags":["rust"],"category":" Tech ","emotion":"Curious","reading_time":4}
```"#;
        let result = analyzer(response)
            .analyze("body", None, None, None, &model())
            .await
            .unwrap();
        assert!(!result.is_fallback());
        let analysis = result.into_inner();
        assert_eq!(analysis.category, Category::Tech);
        assert_eq!(analysis.emotion, Emotion::Curious);
        assert_eq!(analysis.reading_time, 4);
        assert_eq!(analysis.takeaways, vec!["one owner"]);
    }

    #[tokio::test]
    async fn malformed_response_degrades_to_fallback() {
        let content = "x".repeat(1200);
        let result = analyzer("I could not do that, sorry.")
            .analyze(&content, Some("https://example.com"), Some("Given Title"), None, &model())
            .await
            .unwrap();
        assert!(result.is_fallback());
        let analysis = result.into_inner();
        assert_eq!(analysis.title, "Given Title");
        assert_eq!(analysis.summary.chars().count(), 200);
        assert_eq!(analysis.category, Category::Other);
        assert_eq!(analysis.emotion, Emotion::Neutral);
        assert_eq!(analysis.reading_time, 3);
    }

    #[tokio::test]
    async fn unknown_category_and_long_summary_are_normalized() {
        let long = "s".repeat(500);
        let response = format!(
            r#"{{"title":"T","summary":"{long}","category":"science","emotion":"melancholic"}}"#
        );
        let analysis = analyzer(&response)
            .analyze("short", None, None, None, &model())
            .await
            .unwrap()
            .into_inner();
        assert_eq!(analysis.category, Category::Other);
        assert_eq!(analysis.emotion, Emotion::Neutral);
        assert_eq!(analysis.summary.chars().count(), MAX_SUMMARY_CHARS);
        assert_eq!(analysis.reading_time, 1);
    }

    #[tokio::test]
    async fn batch_drops_out_of_range_and_duplicate_indices() {
        let response = r#"{"items":[
            {"index":1,"topic":"a","method":"b","result":"c","reason":"d","category":"ART","tags":["x"]},
            {"index":9,"topic":"ghost"},
            {"index":1,"topic":"again"},
            {"topic":"no index"}
        ],"tags":["design"]}"#;
        let batch = analyzer(response)
            .summarize_batch(&[entry(0), entry(1)], &[], None, &model())
            .await
            .unwrap();
        assert!(!batch.is_fallback());
        let batch = batch.into_inner();
        assert_eq!(batch.entries.len(), 1);
        assert_eq!(batch.entries[0].index, 1);
        assert_eq!(batch.entries[0].category, "art");
        assert_eq!(batch.all_tags(), vec!["design", "x"]);
    }

    #[tokio::test]
    async fn unparseable_batch_keeps_first_three() {
        let entries: Vec<_> = (0..5).map(entry).collect();
        let batch = analyzer("nope")
            .summarize_batch(&entries, &[], None, &model())
            .await
            .unwrap();
        assert!(batch.is_fallback());
        let indices: Vec<_> = batch.value().entries.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn bare_object_is_found_inside_prose() {
        let value = extract_json(r#"Sure! {"summary": "ok"} Hope that helps."#).unwrap();
        assert_eq!(value["summary"], "ok");
        assert!(extract_json("[1, 2, 3]").is_none());
    }

    #[test]
    fn reading_time_rounds_up() {
        assert_eq!(estimate_reading_time(""), 1);
        assert_eq!(estimate_reading_time(&"a".repeat(500)), 1);
        assert_eq!(estimate_reading_time(&"a".repeat(501)), 2);
    }

    #[test]
    fn fence_is_stripped_from_reports() {
        assert_eq!(strip_code_fence("```markdown\n# Week\n- a\n```"), "# Week\n- a");
        assert_eq!(strip_code_fence("  # Plain  "), "# Plain");
    }
}
