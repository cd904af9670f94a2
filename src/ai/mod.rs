mod analyzer;
mod client;

pub use analyzer::{fallback_batch, insight_material, rss_material, Analyzer};
pub use client::{CompletionService, ModelConfig, OpenAiClient};
