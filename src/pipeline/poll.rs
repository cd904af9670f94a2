use chrono::Utc;

use crate::ai::fallback_batch;
use crate::models::{
    Analyzed, BatchSummary, DiscoverySummary, FeedEntry, JobOutcome, JobReport, NewDiscoveryItem,
};

use super::{failed, Pipeline, StepError, StepFailure, StepRunner};

/// Theme tags kept per subscription.
pub const MAX_THEMES: usize = 5;

impl Pipeline {
    /// `sub/poll.rss`: fetch → settings → summarize → replace-by-source.
    ///
    /// Failures are only logged; nothing user-visible changes state.
    pub(super) async fn poll(&self, owner_id: &str, subscription_id: i64, url: &str) -> JobOutcome {
        let mut runner = StepRunner::new("sub/poll.rss", self.policy.clone());
        let feeds = &self.feeds;
        let repo = &*self.repo;
        let analyzer = &self.analyzer;

        let result = async {
            let entries: Vec<FeedEntry> = runner
                .run("fetch-rss", move || async move {
                    Ok::<_, StepError>(feeds.fetch_entries(url).await?)
                })
                .await?;
            if entries.is_empty() {
                return Ok(None);
            }

            let settings = runner
                .run("load-config", move || self.load_settings(owner_id))
                .await?;

            let themes: Vec<String> = runner
                .run("load-themes", move || async move {
                    let sub = repo.get_subscription(owner_id, subscription_id).await?;
                    Ok::<_, StepError>(sub.map(|s| s.themes).unwrap_or_default())
                })
                .await?;

            let batch: Analyzed<BatchSummary> = runner
                .run("summarize", || {
                    let entries = &entries;
                    let themes = &themes;
                    let settings = &settings;
                    async move {
                        Ok::<_, StepError>(
                            analyzer
                                .summarize_batch(
                                    entries,
                                    themes,
                                    settings.user.prompt.as_deref(),
                                    &settings.model,
                                )
                                .await?,
                        )
                    }
                })
                .await?;

            let degraded = batch.is_fallback();
            let selection = selected_entries(batch.value(), &entries);
            let source_name = entries[0].source_name.clone();
            let themes = merged_themes(batch.value(), &themes);

            let stored = runner
                .run("persist", || {
                    let items = selection.clone();
                    let source_name = source_name.clone();
                    let themes = themes.clone();
                    async move {
                        let stored = repo
                            .replace_discovery_for_source(owner_id, &source_name, items, Utc::now())
                            .await?;
                        if !repo
                            .update_subscription_themes(owner_id, subscription_id, themes)
                            .await?
                        {
                            tracing::debug!(
                                "Subscription {} was removed while its poll ran",
                                subscription_id
                            );
                        }
                        Ok::<_, StepError>(stored)
                    }
                })
                .await?;

            Ok::<_, StepFailure>(Some(JobReport::Polled {
                source_name,
                stored,
                degraded,
            }))
        }
        .await;

        match result {
            Ok(Some(report)) => JobOutcome::Succeeded(report),
            Ok(None) => JobOutcome::Skipped(format!("no entries in {url}")),
            Err(failure) => {
                tracing::warn!("Poll of {} for {} failed: {}", url, owner_id, failure);
                failed(failure)
            }
        }
    }
}

/// Discovery rows for the entries the batch picked. A model that picked
/// nothing still leaves the newest entries in place.
fn selected_entries(batch: &BatchSummary, entries: &[FeedEntry]) -> Vec<NewDiscoveryItem> {
    let fallback;
    let batch = if batch.entries.is_empty() {
        fallback = fallback_batch(entries);
        &fallback
    } else {
        batch
    };

    batch
        .entries
        .iter()
        .filter_map(|pick| {
            let entry = entries.get(pick.index)?;
            Some(NewDiscoveryItem {
                title: entry.title.clone(),
                url: entry.link.clone(),
                summary: DiscoverySummary {
                    topic: pick.topic.clone(),
                    method: pick.method.clone(),
                    result: pick.result.clone(),
                },
                reason: pick.reason.clone(),
                category: pick.category.clone(),
            })
        })
        .collect()
}

/// Batch tags first, capped; keeps the previous themes when the batch had none.
fn merged_themes(batch: &BatchSummary, previous: &[String]) -> Vec<String> {
    let tags = batch.all_tags();
    if tags.is_empty() {
        return previous.to_vec();
    }
    tags.into_iter().take(MAX_THEMES).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::testing::*;
    use super::*;
    use crate::models::Job;

    fn feed(count: usize) -> String {
        let items: String = (0..count)
            .map(|i| {
                format!(
                    "<item><title>Entry {i}</title><link>https://blog.example.com/{i}</link>\
                     <description>Text {i}</description></item>"
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Example Blog</title>{items}</channel></rss>"#
        )
    }

    const BATCH_JSON: &str = r#"{"items":[
        {"index":0,"topic":"t0","method":"m0","result":"r0","reason":"why0","category":"tech","tags":["rust"]},
        {"index":2,"topic":"t2","method":"m2","result":"r2","reason":"why2","category":"idea","tags":["wasm"]}
    ],"tags":["systems","compilers","rust","tooling","perf","extra"]}"#;

    fn poll_job(subscription_id: i64) -> Job {
        Job::PollSubscription {
            subscription_id,
            owner_id: "u1".into(),
            url: "https://blog.example.com/feed.xml".into(),
        }
    }

    #[tokio::test]
    async fn duplicate_polls_leave_one_discovery_set() {
        let pages = StubPages::new().with_page(
            "https://blog.example.com/feed.xml",
            "application/rss+xml",
            &feed(4),
        );
        let (pipeline, repo) = pipeline(pages, Arc::new(StubCompletion::new(BATCH_JSON))).await;
        let sub = repo
            .insert_subscription("u1", "https://blog.example.com/feed.xml")
            .await
            .unwrap();

        let (first, second) =
            tokio::join!(pipeline.run(poll_job(sub.id)), pipeline.run(poll_job(sub.id)));
        assert!(!first.is_failed() && !second.is_failed());
        let third = pipeline.run(poll_job(sub.id)).await;
        assert!(!third.is_failed());

        let items = repo.discovery_for_owner("u1").await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|d| d.source_name == "Example Blog"));

        let sub = repo.get_subscription("u1", sub.id).await.unwrap().unwrap();
        assert_eq!(sub.themes, vec!["systems", "compilers", "rust", "tooling", "perf"]);
    }

    #[tokio::test]
    async fn unparseable_batch_keeps_first_three_entries() {
        let pages = StubPages::new().with_page(
            "https://blog.example.com/feed.xml",
            "application/rss+xml",
            &feed(6),
        );
        let (pipeline, repo) = pipeline(pages, Arc::new(StubCompletion::new("no idea"))).await;
        let sub = repo
            .insert_subscription("u1", "https://blog.example.com/feed.xml")
            .await
            .unwrap();

        match pipeline.run(poll_job(sub.id)).await {
            JobOutcome::Succeeded(JobReport::Polled { stored, degraded, .. }) => {
                assert_eq!(stored, 3);
                assert!(degraded);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreadable_feed_is_skipped_without_ai_call() {
        let pages = StubPages::new().with_page(
            "https://blog.example.com/feed.xml",
            "text/html",
            "<html>moved</html>",
        );
        let completion = Arc::new(StubCompletion::new(BATCH_JSON));
        let (pipeline, repo) = pipeline(pages, completion.clone()).await;

        let outcome = pipeline.run(poll_job(1)).await;
        assert!(matches!(outcome, JobOutcome::Skipped(_)));
        assert_eq!(completion.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(repo.discovery_for_owner("u1").await.unwrap().is_empty());
    }

    #[test]
    fn empty_pick_falls_back_to_newest() {
        let entries: Vec<FeedEntry> = (0..5)
            .map(|i| FeedEntry {
                title: format!("Entry {i}"),
                link: format!("https://blog.example.com/{i}"),
                snippet: String::new(),
                source_name: "Example Blog".into(),
                published_at: None,
            })
            .collect();
        let rows = selected_entries(&BatchSummary::default(), &entries);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].title, "Entry 0");
        assert_eq!(rows[2].reason, "Latest from Example Blog");
    }
}
