//! Job orchestration.
//!
//! Every [`Job`] runs as an ordered list of named steps through a
//! [`StepRunner`]. A failing job only ever touches its own record and always
//! resolves to a [`JobOutcome`]; nothing escapes to sibling jobs.

mod digest;
mod email;
mod ingest;
mod poll;
mod report;
mod step;
mod worker;

use std::sync::Arc;

use crate::ai::{Analyzer, CompletionService, ModelConfig};
use crate::config::AiDefaults;
use crate::db::Repository;
use crate::error::AppError;
use crate::feed::FeedFetcher;
use crate::models::{AiConfig, Job, JobOutcome, JobReport};
use crate::services::{Mailer, PageSource};

pub use step::{RetryPolicy, StepError, StepFailure, StepRunner};
pub use worker::Worker;

#[cfg(test)]
pub(crate) use step::fast_policy;

pub struct Pipeline {
    repo: Arc<Repository>,
    pages: Arc<dyn PageSource>,
    feeds: FeedFetcher,
    analyzer: Analyzer,
    mailer: Option<Arc<dyn Mailer>>,
    ai_defaults: AiDefaults,
    policy: RetryPolicy,
}

/// Per-user settings resolved once at the start of a job.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct JobSettings {
    model: ModelConfig,
    user: AiConfig,
}

impl Pipeline {
    pub fn new(
        repo: Arc<Repository>,
        pages: Arc<dyn PageSource>,
        completion: Arc<dyn CompletionService>,
        ai_defaults: AiDefaults,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            repo,
            feeds: FeedFetcher::new(pages.clone()),
            pages,
            analyzer: Analyzer::new(completion),
            mailer: None,
            ai_defaults,
            policy,
        }
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repo
    }

    pub fn feeds(&self) -> &FeedFetcher {
        &self.feeds
    }

    /// Runs one job to its terminal outcome.
    pub async fn run(&self, job: Job) -> JobOutcome {
        let name = job.name();
        tracing::debug!("Starting {} for {:?}", name, job.owner_id());

        let outcome = match job {
            Job::IngestUrl { item_id, owner_id } => self.ingest_url(&owner_id, item_id).await,
            Job::IngestText { item_id, owner_id } => self.ingest_text(&owner_id, item_id).await,
            Job::Reanalyze { item_id, owner_id } => self.reanalyze(&owner_id, item_id).await,
            Job::PollSubscription {
                subscription_id,
                owner_id,
                url,
            } => self.poll(&owner_id, subscription_id, &url).await,
            Job::GenerateDigest {
                owner_id,
                force,
                with_image,
            } => self.digest(&owner_id, force, with_image).await,
            Job::InsightReport { owner_id } => {
                self.report(&owner_id, crate::models::ReportKind::Insight).await
            }
            Job::RssReport { owner_id } => {
                self.report(&owner_id, crate::models::ReportKind::Rss).await
            }
            Job::CleanupDiscovery => self.cleanup().await,
        };

        match &outcome {
            JobOutcome::Succeeded(report) => tracing::info!("{} finished: {:?}", name, report),
            JobOutcome::Skipped(reason) => tracing::info!("{} skipped: {}", name, reason),
            JobOutcome::Failed { step, error } => {
                tracing::error!("{} failed at {}: {}", name, step, error)
            }
        }
        outcome
    }

    async fn load_settings(&self, owner_id: &str) -> Result<JobSettings, StepError> {
        let user = self.repo.get_ai_config(owner_id).await?.unwrap_or_default();
        let model = ModelConfig::resolve(&self.ai_defaults, Some(&user))?;
        Ok(JobSettings { model, user })
    }

    async fn cleanup(&self) -> JobOutcome {
        let mut runner = StepRunner::new("discovery/cleanup", self.policy.clone());
        let repo = &*self.repo;
        match runner
            .run("clear-discovery", move || async move {
                Ok::<_, StepError>(repo.clear_discovery().await?)
            })
            .await
        {
            Ok(removed) => JobOutcome::Succeeded(JobReport::Cleaned { removed }),
            Err(failure) => failed(failure),
        }
    }
}

fn failed(failure: StepFailure) -> JobOutcome {
    JobOutcome::Failed {
        step: failure.step.to_string(),
        error: failure.error.to_string(),
    }
}

fn not_found(what: String) -> StepError {
    StepError::Fatal(AppError::NotFound(what))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Stub collaborators shared by the pipeline tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::error::Result;
    use crate::models::{
        AnalysisStatus, Category, ItemAnalysisUpdate, NewItem, PollCadence, Profile,
    };
    use crate::services::{FetchedPage, OutgoingMail};

    /// Serves canned pages; anything unknown answers with the configured status.
    pub struct StubPages {
        pages: HashMap<String, (String, String)>,
        missing_status: u16,
        pub hits: AtomicUsize,
    }

    impl StubPages {
        pub fn new() -> Self {
            Self {
                pages: HashMap::new(),
                missing_status: 404,
                hits: AtomicUsize::new(0),
            }
        }

        pub fn failing_with(status: u16) -> Self {
            Self {
                missing_status: status,
                ..Self::new()
            }
        }

        pub fn with_page(mut self, url: &str, content_type: &str, body: &str) -> Self {
            self.pages
                .insert(url.to_string(), (content_type.to_string(), body.to_string()));
            self
        }
    }

    #[async_trait]
    impl PageSource for StubPages {
        async fn fetch(&self, url: &str) -> Result<FetchedPage> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            match self.pages.get(url) {
                Some((content_type, body)) => Ok(FetchedPage {
                    final_url: url.to_string(),
                    content_type: content_type.clone(),
                    body: body.clone().into_bytes(),
                }),
                None => Err(AppError::HttpStatus {
                    status: self.missing_status,
                    url: url.to_string(),
                }),
            }
        }
    }

    /// Answers every completion with the same text and counts calls.
    pub struct StubCompletion {
        response: String,
        image: Option<String>,
        pub calls: AtomicUsize,
    }

    impl StubCompletion {
        pub fn new(response: impl Into<String>) -> Self {
            Self {
                response: response.into(),
                image: None,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn with_image(mut self, url: &str) -> Self {
            self.image = Some(url.to_string());
            self
        }
    }

    #[async_trait]
    impl CompletionService for StubCompletion {
        async fn complete(&self, _system: &str, _user: &str, _model: &ModelConfig) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }

        async fn generate_image(&self, _prompt: &str, _model: &ModelConfig) -> Result<Option<String>> {
            Ok(self.image.clone())
        }
    }

    #[derive(Default)]
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<OutgoingMail>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, mail: &OutgoingMail) -> Result<()> {
            if let Ok(mut sent) = self.sent.lock() {
                sent.push(mail.clone());
            }
            Ok(())
        }
    }

    pub const ANALYSIS_JSON: &str = r#"{"title":"Parsed Title","summary":"A short summary.","takeaways":["a","b"],"tags":["rust"],"category":"tech","emotion":"curious","reading_time":2}"#;

    pub fn defaults() -> AiDefaults {
        AiDefaults {
            api_key: Some("test-key".into()),
            ..AiDefaults::default()
        }
    }

    pub async fn pipeline(
        pages: StubPages,
        completion: Arc<StubCompletion>,
    ) -> (Pipeline, Arc<Repository>) {
        let repo = Arc::new(Repository::in_memory().await.unwrap());
        let pipeline = Pipeline::new(
            repo.clone(),
            Arc::new(pages),
            completion,
            defaults(),
            fast_policy(),
        );
        (pipeline, repo)
    }

    /// Inserts `count` analyzed items for `owner_id`, created `age` ago.
    pub async fn seed_done_items(
        repo: &Repository,
        owner_id: &str,
        count: usize,
        age: chrono::Duration,
    ) {
        for i in 0..count {
            let item = repo
                .insert_item_at(
                    NewItem::from_text(owner_id, format!("note {i}")),
                    chrono::Utc::now() - age,
                )
                .await
                .unwrap();
            assert!(repo.mark_processing(owner_id, item.id).await.unwrap());
            let update = ItemAnalysisUpdate {
                title: format!("Note {i}"),
                content_raw: format!("note {i}"),
                summary: format!("Summary of note {i}"),
                takeaways: vec![],
                tags: vec!["rust".into()],
                category: Category::Tech,
                emotion: "neutral".into(),
                reading_time: 1,
                analysis_status: AnalysisStatus::Parsed,
            };
            assert!(repo.complete_item(owner_id, item.id, update).await.unwrap());
        }
    }

    pub async fn seed_profile(repo: &Repository, owner_id: &str, email: Option<&str>) {
        let mut profile = Profile::new(owner_id);
        profile.display_name = Some("Ada".into());
        profile.ai_config = Some(AiConfig {
            notification_email: email.map(str::to_string),
            poll_cadence: PollCadence::Daily,
            ..AiConfig::default()
        });
        repo.upsert_profile(profile).await.unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::models::{DiscoverySummary, NewDiscoveryItem};
    use chrono::Utc;

    #[tokio::test]
    async fn cleanup_wipes_every_owner() {
        let (pipeline, repo) = pipeline(StubPages::new(), Arc::new(StubCompletion::new(""))).await;
        for owner in ["u1", "u2"] {
            repo.replace_discovery_for_source(
                owner,
                "Blog",
                vec![NewDiscoveryItem {
                    title: "t".into(),
                    url: "https://example.com/t".into(),
                    summary: DiscoverySummary::default(),
                    reason: "r".into(),
                    category: "other".into(),
                }],
                Utc::now(),
            )
            .await
            .unwrap();
        }

        let outcome = pipeline.run(Job::CleanupDiscovery).await;
        assert_eq!(outcome, JobOutcome::Succeeded(JobReport::Cleaned { removed: 2 }));
        assert!(repo.discovery_for_owner("u1").await.unwrap().is_empty());
    }
}
