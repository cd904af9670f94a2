use chrono::Utc;

use crate::models::{
    Analyzed, DigestCache, DigestResult, Item, JobOutcome, JobReport, KnowledgeDigest, Profile,
};

use super::{failed, Pipeline, StepError, StepFailure, StepRunner};

/// Done items needed before a digest is worth generating.
pub const MIN_DIGEST_ITEMS: usize = 3;
/// New done items since the cached digest that trigger a rebuild.
pub const REGEN_THRESHOLD: usize = 10;

/// Whether a digest built from `cached_count` items is stale at `current_count`.
pub fn needs_regeneration(cached_count: Option<usize>, current_count: usize, force: bool) -> bool {
    if force {
        return true;
    }
    match cached_count {
        Some(cached) => current_count.saturating_sub(cached) >= REGEN_THRESHOLD,
        None => true,
    }
}

impl Pipeline {
    pub(super) async fn digest(&self, owner_id: &str, force: bool, with_image: bool) -> JobOutcome {
        let mut runner = StepRunner::new("digest/generate", self.policy.clone());
        let repo = &*self.repo;
        let analyzer = &self.analyzer;

        let result = async {
            let available: usize = runner
                .run("count-items", move || async move {
                    Ok::<_, StepError>(repo.count_done_items(owner_id).await?)
                })
                .await?;
            if available < MIN_DIGEST_ITEMS {
                return Ok(DigestResult::NotEnoughContent {
                    available,
                    required: MIN_DIGEST_ITEMS,
                });
            }

            let cached: Option<DigestCache> = runner
                .run("load-cache", move || async move {
                    Ok::<_, StepError>(repo.get_digest_cache(owner_id).await?)
                })
                .await?;
            if let Some(cache) = &cached {
                if !needs_regeneration(Some(cache.item_count), available, force) {
                    return Ok(DigestResult::Cached(cache.clone()));
                }
            }

            let settings = runner
                .run("load-config", move || self.load_settings(owner_id))
                .await?;

            let items: Vec<Item> = runner
                .run("load-items", move || async move {
                    Ok::<_, StepError>(repo.done_items(owner_id, None).await?)
                })
                .await?;

            let owner_name: String = runner
                .run("load-profile", move || async move {
                    let profile = repo
                        .get_profile(owner_id)
                        .await?
                        .unwrap_or_else(|| Profile::new(owner_id));
                    Ok::<_, StepError>(profile.owner_name())
                })
                .await?;

            let digest: Analyzed<KnowledgeDigest> = runner
                .run("synthesize", || {
                    let items = &items;
                    let owner_name = &owner_name;
                    let model = &settings.model;
                    async move {
                        Ok::<_, StepError>(
                            analyzer.knowledge_digest(items, owner_name, model).await?,
                        )
                    }
                })
                .await?;
            let degraded = digest.is_fallback();
            let digest = digest.into_inner();

            let previous_image = cached.and_then(|c| c.image_url);
            let image_url = if with_image {
                let cover = runner
                    .run("cover-image", || {
                        let prompt = &digest.cover_prompt;
                        let model = &settings.model;
                        async move { Ok::<_, StepError>(analyzer.cover_image(prompt, model).await?) }
                    })
                    .await;
                match cover {
                    Ok(Some(url)) => Some(url),
                    Ok(None) => previous_image,
                    Err(failure) => {
                        tracing::warn!("Cover image for {} skipped: {}", owner_id, failure);
                        previous_image
                    }
                }
            } else {
                previous_image
            };

            let cache = DigestCache {
                owner_id: owner_id.to_string(),
                item_count: items.len(),
                digest,
                image_url,
                degraded,
                generated_at: Utc::now(),
            };
            runner
                .run("save-cache", || {
                    let cache = cache.clone();
                    async move {
                        repo.save_digest_cache(cache).await?;
                        Ok::<_, StepError>(())
                    }
                })
                .await?;

            Ok::<_, StepFailure>(DigestResult::Generated(cache))
        }
        .await;

        match result {
            Ok(digest) => JobOutcome::Succeeded(JobReport::Digest(digest)),
            Err(failure) => failed(failure),
        }
    }
}
