use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{Analysis, Analyzed, Item, ItemAnalysisUpdate, JobOutcome, JobReport};
use crate::services::extractor::{self, Article};

use super::{failed, not_found, JobSettings, Pipeline, StepError, StepFailure, StepRunner};

/// Raw page as handed from the fetch step to the extract step.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FetchedDocument {
    body: String,
    is_html: bool,
}

impl Pipeline {
    /// `feed/process.url`: load → mark processing → settings → fetch →
    /// extract → analyze → persist.
    pub(super) async fn ingest_url(&self, owner_id: &str, item_id: i64) -> JobOutcome {
        let mut runner = StepRunner::new("feed/process.url", self.policy.clone());

        let item = match self.begin(&mut runner, owner_id, item_id).await {
            Ok(Some(item)) => item,
            Ok(None) => return JobOutcome::Skipped(format!("item {item_id} is not pending")),
            Err(failure) => return self.abort(owner_id, item_id, failure).await,
        };

        let result = async {
            let settings = self.settings_step(&mut runner, owner_id).await?;
            let url = item
                .url
                .clone()
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| StepFailure {
                    step: "fetch-page",
                    attempts: 1,
                    error: AppError::InvalidInput(format!("item {item_id} has no URL")),
                })?;
            let article = self.fetch_article(&mut runner, &url).await?;
            let title = item.title.clone().or(article.title.clone());
            let analyzed = self
                .analyze_step(&mut runner, &settings, &article.text, Some(&url), title.as_deref())
                .await?;
            self.persist_step(&mut runner, owner_id, item_id, &article.text, &analyzed, false)
                .await
        }
        .await;

        self.finish(owner_id, item_id, result).await
    }

    /// `feed/process.text`: as above without fetch/extract.
    pub(super) async fn ingest_text(&self, owner_id: &str, item_id: i64) -> JobOutcome {
        let mut runner = StepRunner::new("feed/process.text", self.policy.clone());

        let item = match self.begin(&mut runner, owner_id, item_id).await {
            Ok(Some(item)) => item,
            Ok(None) => return JobOutcome::Skipped(format!("item {item_id} is not pending")),
            Err(failure) => return self.abort(owner_id, item_id, failure).await,
        };

        let result = async {
            let content = item
                .content_raw
                .clone()
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| StepFailure {
                    step: "load-item",
                    attempts: 1,
                    error: AppError::InvalidInput(format!("item {item_id} has no content")),
                })?;
            let settings = self.settings_step(&mut runner, owner_id).await?;
            let analyzed = self
                .analyze_step(
                    &mut runner,
                    &settings,
                    &content,
                    item.url.as_deref(),
                    item.title.as_deref(),
                )
                .await?;
            self.persist_step(&mut runner, owner_id, item_id, &content, &analyzed, false)
                .await
        }
        .await;

        self.finish(owner_id, item_id, result).await
    }

    /// `feed/reanalyze`: re-runs analysis on a terminal item from its stored
    /// content, fetching the page again only when nothing is stored. The item
    /// stays terminal throughout; a failed re-analysis leaves it untouched.
    pub(super) async fn reanalyze(&self, owner_id: &str, item_id: i64) -> JobOutcome {
        let mut runner = StepRunner::new("feed/reanalyze", self.policy.clone());
        let repo = &*self.repo;

        let result = async {
            let item: Item = runner
                .run("load-item", move || async move {
                    repo.get_item(owner_id, item_id)
                        .await?
                        .ok_or_else(|| not_found(format!("item {item_id}")))
                })
                .await?;
            if !item.status.is_terminal() {
                return Ok(None);
            }

            let settings = self.settings_step(&mut runner, owner_id).await?;

            let stored = item.content_raw.clone().filter(|c| !c.trim().is_empty());
            let (content, title) = match (stored, item.url.clone()) {
                (Some(content), _) => (content, item.title.clone()),
                (None, Some(url)) => {
                    let article = self.fetch_article(&mut runner, &url).await?;
                    (article.text, item.title.clone().or(article.title))
                }
                (None, None) => {
                    return Err(StepFailure {
                        step: "load-item",
                        attempts: 1,
                        error: AppError::InvalidInput(format!(
                            "item {item_id} has neither content nor URL"
                        )),
                    })
                }
            };

            let analyzed = self
                .analyze_step(&mut runner, &settings, &content, item.url.as_deref(), title.as_deref())
                .await?;
            self.persist_step(&mut runner, owner_id, item_id, &content, &analyzed, true)
                .await
                .map(Some)
        }
        .await;

        match result {
            Ok(Some(report)) => JobOutcome::Succeeded(report),
            Ok(None) => JobOutcome::Skipped(format!("item {item_id} is still in flight")),
            Err(failure) => failed(failure),
        }
    }

    /// Loads the item and claims it (`pending -> processing`). `Ok(None)` when
    /// another run already claimed or finished it.
    async fn begin(
        &self,
        runner: &mut StepRunner,
        owner_id: &str,
        item_id: i64,
    ) -> Result<Option<Item>, StepFailure> {
        let repo = &*self.repo;
        let item: Item = runner
            .run("load-item", move || async move {
                repo.get_item(owner_id, item_id)
                    .await?
                    .ok_or_else(|| not_found(format!("item {item_id}")))
            })
            .await?;

        if item.status.is_terminal() {
            return Ok(None);
        }

        let claimed = runner
            .run("mark-processing", move || async move {
                Ok::<_, StepError>(repo.mark_processing(owner_id, item_id).await?)
            })
            .await?;

        Ok(claimed.then_some(item))
    }

    async fn settings_step(
        &self,
        runner: &mut StepRunner,
        owner_id: &str,
    ) -> Result<JobSettings, StepFailure> {
        runner
            .run("load-config", move || self.load_settings(owner_id))
            .await
    }

    async fn fetch_article(&self, runner: &mut StepRunner, url: &str) -> Result<Article, StepFailure> {
        let pages = &*self.pages;
        let document: FetchedDocument = runner
            .run("fetch-page", move || async move {
                let page = pages.fetch(url).await?;
                Ok::<_, StepError>(FetchedDocument {
                    is_html: page.looks_like_html() || page.content_type.is_empty(),
                    body: page.text(),
                })
            })
            .await?;

        runner
            .run("extract-article", || {
                let document = document.clone();
                async move {
                    if document.is_html {
                        Ok(extractor::extract_article(&document.body)?)
                    } else if document.body.trim().is_empty() {
                        Err(StepError::Fatal(AppError::Extraction(
                            "document is empty".to_string(),
                        )))
                    } else {
                        Ok(Article {
                            title: None,
                            text: document.body.trim().to_string(),
                        })
                    }
                }
            })
            .await
    }

    async fn analyze_step(
        &self,
        runner: &mut StepRunner,
        settings: &JobSettings,
        content: &str,
        url: Option<&str>,
        title: Option<&str>,
    ) -> Result<Analyzed<Analysis>, StepFailure> {
        let analyzer = &self.analyzer;
        let prompt = settings.user.prompt.as_deref();
        let model = &settings.model;
        let analyzed = runner
            .run("analyze", move || async move {
                Ok::<_, StepError>(analyzer.analyze(content, url, title, prompt, model).await?)
            })
            .await?;

        if analyzed.is_fallback() {
            tracing::warn!("Analysis degraded to fallback for {:?}", url.or(title));
        }
        Ok(analyzed)
    }

    async fn persist_step(
        &self,
        runner: &mut StepRunner,
        owner_id: &str,
        item_id: i64,
        content: &str,
        analyzed: &Analyzed<Analysis>,
        reanalysis: bool,
    ) -> Result<JobReport, StepFailure> {
        let analysis = analyzed.value();
        let update = ItemAnalysisUpdate {
            title: analysis.title.clone(),
            content_raw: content.to_string(),
            summary: analysis.summary.clone(),
            takeaways: analysis.takeaways.clone(),
            tags: analysis.tags.clone(),
            category: analysis.category,
            emotion: analysis.emotion.as_str().to_string(),
            reading_time: analysis.reading_time,
            analysis_status: analyzed.status(),
        };
        let repo = &*self.repo;

        let written = runner
            .run("persist", || {
                let update = update.clone();
                async move {
                    let written = if reanalysis {
                        repo.apply_reanalysis(owner_id, item_id, update).await?
                    } else {
                        repo.complete_item(owner_id, item_id, update).await?
                    };
                    Ok::<_, StepError>(written)
                }
            })
            .await?;

        if !written {
            tracing::warn!("Item {} changed state before its analysis was saved", item_id);
        }

        Ok(JobReport::Ingested {
            item_id,
            degraded: analyzed.is_fallback(),
        })
    }

    async fn finish(
        &self,
        owner_id: &str,
        item_id: i64,
        result: Result<JobReport, StepFailure>,
    ) -> JobOutcome {
        match result {
            Ok(report) => JobOutcome::Succeeded(report),
            Err(failure) => self.abort(owner_id, item_id, failure).await,
        }
    }

    /// Marks the item failed (if it is still in flight) and reports the failure.
    async fn abort(&self, owner_id: &str, item_id: i64, failure: StepFailure) -> JobOutcome {
        match self
            .repo
            .fail_item(owner_id, item_id, &failure.error.to_string())
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::debug!("Item {} was not in flight when its job failed", item_id),
            Err(e) => tracing::error!("Could not mark item {} as failed: {}", item_id, e),
        }
        failed(failure)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::super::testing::*;
    use crate::models::{
        AnalysisStatus, Category, ItemStatus, Job, JobOutcome, JobReport, NewItem,
    };

    const ARTICLE: &str = r#"<html><head><title>Borrowing</title></head><body>
        <nav>menu menu menu</nav>
        <article><p>Borrowing lets code use a value without taking ownership of it. The borrow
        checker makes sure references never outlive the data they point to, which removes a whole
        class of memory bugs at compile time without a garbage collector.</p></article>
        </body></html>"#;

    #[tokio::test]
    async fn url_submission_reaches_done() {
        let pages = StubPages::new().with_page("https://example.com/a", "text/html", ARTICLE);
        let (pipeline, repo) = pipeline(pages, Arc::new(StubCompletion::new(ANALYSIS_JSON))).await;
        let item = repo
            .insert_item(NewItem::from_url("u1", "https://example.com/a"))
            .await
            .unwrap();

        let outcome = pipeline
            .run(Job::IngestUrl {
                item_id: item.id,
                owner_id: "u1".into(),
            })
            .await;
        assert_eq!(
            outcome,
            JobOutcome::Succeeded(JobReport::Ingested {
                item_id: item.id,
                degraded: false
            })
        );

        let stored = repo.get_item("u1", item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ItemStatus::Done);
        assert_eq!(stored.title.as_deref(), Some("Parsed Title"));
        assert_eq!(stored.category, Category::Tech);
        assert!(stored.content_raw.unwrap().contains("borrow"));
        assert!(!stored.summary.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn malformed_completion_still_reaches_done() {
        let (pipeline, repo) = pipeline(
            StubPages::new(),
            Arc::new(StubCompletion::new("```\nnot json at all\n```")),
        )
        .await;
        let item = repo
            .insert_item(NewItem::from_text("u1", "A pasted note about sourdough starters."))
            .await
            .unwrap();

        let outcome = pipeline
            .run(Job::IngestText {
                item_id: item.id,
                owner_id: "u1".into(),
            })
            .await;
        assert!(!outcome.is_failed());

        let stored = repo.get_item("u1", item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ItemStatus::Done);
        assert_eq!(stored.analysis_status, Some(AnalysisStatus::Fallback));
        assert_eq!(stored.category, Category::Other);
        assert_eq!(stored.emotion.as_deref(), Some("neutral"));
    }

    #[tokio::test]
    async fn server_errors_exhaust_retries_then_fail() {
        let pages = Arc::new(StubPages::failing_with(500));
        let repo = Arc::new(crate::db::Repository::in_memory().await.unwrap());
        let pipeline = super::Pipeline::new(
            repo.clone(),
            pages.clone(),
            Arc::new(StubCompletion::new(ANALYSIS_JSON)),
            defaults(),
            super::super::fast_policy(),
        );
        let item = repo
            .insert_item(NewItem::from_url("u1", "https://down.example.com/"))
            .await
            .unwrap();

        let outcome = pipeline
            .run(Job::IngestUrl {
                item_id: item.id,
                owner_id: "u1".into(),
            })
            .await;

        match outcome {
            JobOutcome::Failed { step, .. } => assert_eq!(step, "fetch-page"),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(pages.hits.load(Ordering::SeqCst), 3);

        let stored = repo.get_item("u1", item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ItemStatus::Failed);
        assert!(stored.summary.unwrap().starts_with("Processing failed"));
        assert!(repo
            .items_for_owner("u1")
            .await
            .unwrap()
            .iter()
            .all(|i| i.status != ItemStatus::Processing));
    }

    #[tokio::test]
    async fn terminal_items_are_not_reprocessed() {
        let completion = Arc::new(StubCompletion::new(ANALYSIS_JSON));
        let (pipeline, repo) = pipeline(StubPages::new(), completion.clone()).await;
        let item = repo
            .insert_item(NewItem::from_text("u1", "Some text worth keeping around."))
            .await
            .unwrap();
        let job = Job::IngestText {
            item_id: item.id,
            owner_id: "u1".into(),
        };

        assert!(!pipeline.run(job.clone()).await.is_failed());
        let second = pipeline.run(job).await;
        assert!(matches!(second, JobOutcome::Skipped(_)));
        assert_eq!(completion.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            repo.get_item("u1", item.id).await.unwrap().unwrap().status,
            ItemStatus::Done
        );
    }

    #[tokio::test]
    async fn missing_credentials_fail_without_retry() {
        let repo = Arc::new(crate::db::Repository::in_memory().await.unwrap());
        let completion = Arc::new(StubCompletion::new(ANALYSIS_JSON));
        let pipeline = super::Pipeline::new(
            repo.clone(),
            Arc::new(StubPages::new()),
            completion.clone(),
            crate::config::AiDefaults::default(),
            super::super::fast_policy(),
        );
        let item = repo
            .insert_item(NewItem::from_text("u1", "text"))
            .await
            .unwrap();

        let outcome = pipeline
            .run(Job::IngestText {
                item_id: item.id,
                owner_id: "u1".into(),
            })
            .await;
        assert!(matches!(outcome, JobOutcome::Failed { ref step, .. } if step == "load-config"));
        assert_eq!(completion.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            repo.get_item("u1", item.id).await.unwrap().unwrap().status,
            ItemStatus::Failed
        );
    }

    #[tokio::test]
    async fn concurrent_ingests_produce_independent_records() {
        let pages = StubPages::new()
            .with_page("https://example.com/a", "text/html", ARTICLE)
            .with_page("https://example.com/b", "text/html", ARTICLE);
        let (pipeline, repo) = pipeline(pages, Arc::new(StubCompletion::new(ANALYSIS_JSON))).await;
        let a = repo
            .insert_item(NewItem::from_url("u1", "https://example.com/a"))
            .await
            .unwrap();
        let b = repo
            .insert_item(NewItem::from_url("u1", "https://example.com/b"))
            .await
            .unwrap();

        let (ra, rb) = tokio::join!(
            pipeline.run(Job::IngestUrl {
                item_id: a.id,
                owner_id: "u1".into()
            }),
            pipeline.run(Job::IngestUrl {
                item_id: b.id,
                owner_id: "u1".into()
            })
        );
        assert!(!ra.is_failed() && !rb.is_failed());

        let items = repo.items_for_owner("u1").await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.status == ItemStatus::Done));
        assert_ne!(items[0].url, items[1].url);
    }

    #[tokio::test]
    async fn reanalysis_keeps_item_terminal() {
        let (pipeline, repo) =
            pipeline(StubPages::new(), Arc::new(StubCompletion::new(ANALYSIS_JSON))).await;
        let item = repo
            .insert_item(NewItem::from_text("u1", "Notes on a failed first attempt."))
            .await
            .unwrap();
        repo.fail_item("u1", item.id, "model offline").await.unwrap();

        let outcome = pipeline
            .run(Job::Reanalyze {
                item_id: item.id,
                owner_id: "u1".into(),
            })
            .await;
        assert!(matches!(outcome, JobOutcome::Succeeded(_)));
        let stored = repo.get_item("u1", item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ItemStatus::Done);
        assert_eq!(stored.title.as_deref(), Some("Parsed Title"));

        let pending = repo
            .insert_item(NewItem::from_text("u1", "still queued"))
            .await
            .unwrap();
        let skipped = pipeline
            .run(Job::Reanalyze {
                item_id: pending.id,
                owner_id: "u1".into(),
            })
            .await;
        assert!(matches!(skipped, JobOutcome::Skipped(_)));
    }
}
