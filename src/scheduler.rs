//! Cron-style sweep that turns wall-clock time into jobs.
//!
//! The sweep runs every `sweep_interval_minutes`, aligned to multiples of
//! that interval. Every decision is made on the owner's local clock, a fixed
//! UTC offset per user with a global default.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc, Weekday};

use crate::config::SchedulerConfig;
use crate::db::Repository;
use crate::error::Result;
use crate::events::EventBus;
use crate::models::{AiConfig, Job, PollCadence, ReportKind, ReportSchedule};

/// Local hour in which subscriptions are polled.
pub const POLL_HOUR: u32 = 9;
/// A report fires when the sweep lands within this many minutes of its time.
pub const REPORT_WINDOW_MINUTES: i64 = 15;

/// What a single sweep emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub polls: usize,
    pub reports: usize,
    pub cleanup: bool,
}

/// `now` on a clock `offset_minutes` east of UTC. Out-of-range offsets fall
/// back to UTC.
pub fn local_time(now: DateTime<Utc>, offset_minutes: i32) -> DateTime<FixedOffset> {
    match FixedOffset::east_opt(offset_minutes * 60) {
        Some(offset) => now.with_timezone(&offset),
        None => now.fixed_offset(),
    }
}

/// Whether a subscription with `cadence` should be polled at `now`.
///
/// `daily` matches the 09:00 local hour, `weekly` the same hour on Mondays.
/// A poll already dispatched inside the current window suppresses another.
pub fn is_due(
    now: DateTime<FixedOffset>,
    cadence: PollCadence,
    last_fired: Option<DateTime<Utc>>,
) -> bool {
    if now.hour() != POLL_HOUR {
        return false;
    }
    if cadence == PollCadence::Weekly && now.weekday() != Weekday::Mon {
        return false;
    }

    let Some(window_start) = now
        .date_naive()
        .and_hms_opt(POLL_HOUR, 0, 0)
        .and_then(|naive| naive.and_local_timezone(*now.offset()).single())
    else {
        return false;
    };

    match last_fired {
        Some(fired) => fired < window_start.with_timezone(&Utc),
        None => true,
    }
}

/// Whether a report on `schedule` fires at `now`: a configured weekday
/// (0 = Sunday) and `now` in `[time - 15min, time + 15min)`.
pub fn report_due(now: DateTime<FixedOffset>, schedule: &ReportSchedule) -> bool {
    let Some(target) = schedule.minutes_of_day() else {
        return false;
    };
    if !schedule.days.contains(&now.weekday().num_days_from_sunday()) {
        return false;
    }
    let current = i64::from(now.hour() * 60 + now.minute());
    let diff = current - i64::from(target);
    (-REPORT_WINDOW_MINUTES..REPORT_WINDOW_MINUTES).contains(&diff)
}

/// The discovery wipe runs in the first sweep of Sunday's 00:00 local hour.
pub fn cleanup_due(now: DateTime<FixedOffset>, sweep_interval_minutes: u32) -> bool {
    now.weekday() == Weekday::Sun
        && now.hour() == 0
        && now.minute() < sweep_interval_minutes.min(60)
}

pub struct Scheduler {
    repo: Arc<Repository>,
    bus: EventBus,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(repo: Arc<Repository>, bus: EventBus, config: SchedulerConfig) -> Self {
        Self { repo, bus, config }
    }

    /// Emits every job due at `now`.
    ///
    /// A subscription's `last_polled_at` is written before its poll is
    /// emitted, so an overlapping sweep sees it as already dispatched.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepSummary> {
        let mut summary = SweepSummary::default();

        let configs: HashMap<String, AiConfig> = self
            .repo
            .configured_profiles()
            .await?
            .into_iter()
            .filter_map(|p| p.ai_config.map(|cfg| (p.id, cfg)))
            .collect();

        for sub in self.repo.all_subscriptions().await? {
            let config = configs.get(&sub.owner_id);
            let cadence = config.map(|c| c.poll_cadence).unwrap_or_default();
            let local = local_time(now, self.offset_for(config));

            if !is_due(local, cadence, sub.last_polled_at) {
                continue;
            }

            self.repo.mark_subscription_polled(sub.id, now).await?;
            if self.bus.emit(Job::PollSubscription {
                subscription_id: sub.id,
                owner_id: sub.owner_id.clone(),
                url: sub.url.clone(),
            }) {
                summary.polls += 1;
            }
        }

        for (owner_id, config) in &configs {
            let has_recipient = config
                .notification_email
                .as_deref()
                .is_some_and(|e| !e.trim().is_empty());
            if !has_recipient {
                continue;
            }

            let local = local_time(now, self.offset_for(Some(config)));
            for (kind, schedule) in [
                (ReportKind::Insight, &config.insight_report),
                (ReportKind::Rss, &config.rss_report),
            ] {
                if !report_due(local, schedule) {
                    continue;
                }
                if self.bus.emit(Job::report(owner_id.as_str(), kind)) {
                    summary.reports += 1;
                }
            }
        }

        let local = local_time(now, self.config.utc_offset_minutes);
        if cleanup_due(local, self.config.sweep_interval_minutes) {
            summary.cleanup = self.bus.emit(Job::CleanupDiscovery);
        }

        tracing::debug!(
            "Sweep at {}: {} polls, {} reports, cleanup {}",
            now,
            summary.polls,
            summary.reports,
            summary.cleanup
        );
        Ok(summary)
    }

    /// Re-emits ingest jobs for every item a previous run left unfinished.
    /// Call before the worker starts taking new submissions.
    pub async fn resume_interrupted(&self) -> Result<usize> {
        let mut resumed = 0;
        for item in self.repo.requeue_interrupted().await? {
            if self.bus.emit(Job::ingest_for(&item)) {
                resumed += 1;
            }
        }
        if resumed > 0 {
            tracing::info!("Re-queued {} unfinished items", resumed);
        }
        Ok(resumed)
    }

    /// Sweeps forever on the configured interval.
    pub async fn run(self) {
        let period_secs = u64::from(self.config.sweep_interval_minutes.max(1)) * 60;
        let elapsed = Utc::now().timestamp().rem_euclid(period_secs as i64) as u64;
        let first = tokio::time::Instant::now() + Duration::from_secs(period_secs - elapsed);

        let mut ticker = tokio::time::interval_at(first, Duration::from_secs(period_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(
            "Scheduler sweeping every {} minutes",
            self.config.sweep_interval_minutes
        );

        loop {
            ticker.tick().await;
            match self.sweep(Utc::now()).await {
                Ok(summary) if summary != SweepSummary::default() => {
                    tracing::info!(
                        "Sweep emitted {} polls, {} reports{}",
                        summary.polls,
                        summary.reports,
                        if summary.cleanup { ", cleanup" } else { "" }
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Scheduler sweep failed: {}", e),
            }
        }
    }

    fn offset_for(&self, config: Option<&AiConfig>) -> i32 {
        config
            .and_then(|c| c.utc_offset_minutes)
            .unwrap_or(self.config.utc_offset_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Profile;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<FixedOffset> {
        // September 2025: the 7th is a Sunday, the 8th a Monday.
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 9, day, hour, minute, 0)
            .unwrap()
    }

    fn utc(local: DateTime<FixedOffset>) -> DateTime<Utc> {
        local.with_timezone(&Utc)
    }

    #[test]
    fn daily_window_is_the_nine_o_clock_hour() {
        assert!(is_due(at(10, 9, 0), PollCadence::Daily, None));
        assert!(is_due(at(10, 9, 30), PollCadence::Daily, None));
        assert!(!is_due(at(10, 8, 30), PollCadence::Daily, None));
        assert!(!is_due(at(10, 10, 0), PollCadence::Daily, None));
    }

    #[test]
    fn weekly_only_fires_on_monday() {
        assert!(is_due(at(8, 9, 0), PollCadence::Weekly, None));
        assert!(!is_due(at(9, 9, 0), PollCadence::Weekly, None));
        assert!(!is_due(at(8, 10, 0), PollCadence::Weekly, None));
    }

    #[test]
    fn last_fired_guard() {
        let two_days_ago = Some(utc(at(8, 9, 0)));
        assert!(is_due(at(10, 9, 0), PollCadence::Daily, two_days_ago));

        let this_window = Some(utc(at(10, 9, 0)));
        assert!(!is_due(at(10, 9, 30), PollCadence::Daily, this_window));
    }

    #[test]
    fn local_clock_applies_offset() {
        let now = Utc.with_ymd_and_hms(2025, 9, 10, 1, 0, 0).unwrap();
        assert_eq!(local_time(now, 480).hour(), 9);
        assert_eq!(local_time(now, 0).hour(), 1);
        assert_eq!(local_time(now, -300).hour(), 20);
    }

    #[test]
    fn report_window_is_half_open() {
        let schedule = ReportSchedule {
            days: vec![1, 5],
            time: "09:00".into(),
        };
        assert!(report_due(at(8, 8, 45), &schedule));
        assert!(report_due(at(8, 9, 0), &schedule));
        assert!(!report_due(at(8, 9, 15), &schedule));
        assert!(report_due(at(12, 9, 0), &schedule));
        assert!(!report_due(at(9, 9, 0), &schedule));

        let broken = ReportSchedule {
            days: vec![1],
            time: "nine".into(),
        };
        assert!(!report_due(at(8, 9, 0), &broken));
    }

    #[test]
    fn cleanup_in_first_sweep_of_sunday() {
        assert!(cleanup_due(at(7, 0, 0), 30));
        assert!(!cleanup_due(at(7, 0, 30), 30));
        assert!(!cleanup_due(at(8, 0, 0), 30));
    }

    async fn scheduler() -> (
        Scheduler,
        Arc<Repository>,
        tokio::sync::mpsc::UnboundedReceiver<Job>,
    ) {
        let repo = Arc::new(Repository::in_memory().await.unwrap());
        let (bus, rx) = EventBus::new();
        (
            Scheduler::new(repo.clone(), bus, SchedulerConfig::default()),
            repo,
            rx,
        )
    }

    #[tokio::test]
    async fn due_subscription_is_dispatched_once() {
        let (scheduler, repo, mut rx) = scheduler().await;
        let sub = repo
            .insert_subscription("u1", "https://blog.example.com/feed.xml")
            .await
            .unwrap();
        repo.mark_subscription_polled(sub.id, utc(at(8, 9, 5)))
            .await
            .unwrap();

        let first = scheduler.sweep(utc(at(10, 9, 0))).await.unwrap();
        assert_eq!(first.polls, 1);
        assert!(matches!(
            rx.try_recv(),
            Ok(Job::PollSubscription { subscription_id, .. }) if subscription_id == sub.id
        ));

        let second = scheduler.sweep(utc(at(10, 9, 30))).await.unwrap();
        assert_eq!(second.polls, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reports_need_a_recipient() {
        let (scheduler, repo, mut rx) = scheduler().await;
        let mut with_email = Profile::new("u1");
        with_email.ai_config = Some(AiConfig {
            notification_email: Some("ada@example.com".into()),
            ..AiConfig::default()
        });
        repo.upsert_profile(with_email).await.unwrap();

        let mut silent = Profile::new("u2");
        silent.ai_config = Some(AiConfig::default());
        repo.upsert_profile(silent).await.unwrap();

        let summary = scheduler.sweep(utc(at(8, 9, 0))).await.unwrap();
        assert_eq!(summary.reports, 2);

        let mut names = Vec::new();
        while let Ok(job) = rx.try_recv() {
            assert_eq!(job.owner_id(), Some("u1"));
            names.push(job.name());
        }
        names.sort();
        assert_eq!(names, vec!["report/generate.insight", "report/generate.rss"]);
    }

    #[tokio::test]
    async fn sunday_midnight_emits_cleanup() {
        let (scheduler, _repo, mut rx) = scheduler().await;
        let summary = scheduler.sweep(utc(at(7, 0, 0))).await.unwrap();
        assert!(summary.cleanup);
        assert_eq!(rx.try_recv().ok(), Some(Job::CleanupDiscovery));
    }

    #[tokio::test]
    async fn per_user_offset_moves_the_window() {
        let (scheduler, repo, mut rx) = scheduler().await;
        let mut profile = Profile::new("u1");
        profile.ai_config = Some(AiConfig {
            utc_offset_minutes: Some(0),
            ..AiConfig::default()
        });
        repo.upsert_profile(profile).await.unwrap();
        repo.insert_subscription("u1", "https://blog.example.com/feed.xml")
            .await
            .unwrap();

        // 09:00 at +08:00 is 01:00 UTC: not due for a UTC user.
        assert_eq!(scheduler.sweep(utc(at(10, 9, 0))).await.unwrap().polls, 0);
        let nine_utc = Utc.with_ymd_and_hms(2025, 9, 10, 9, 0, 0).unwrap();
        assert_eq!(scheduler.sweep(nine_utc).await.unwrap().polls, 1);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unfinished_items_resume_after_restart() {
        use crate::models::{ItemStatus, JobOutcome, NewItem};
        use crate::pipeline::testing::{pipeline, StubCompletion, StubPages, ANALYSIS_JSON};

        let (pipeline, repo) = pipeline(
            StubPages::new(),
            Arc::new(StubCompletion::new(ANALYSIS_JSON)),
        )
        .await;
        // A worker that died mid-job leaves its item claimed.
        let stuck = repo
            .insert_item(NewItem::from_text("u1", "half-analyzed note"))
            .await
            .unwrap();
        assert!(repo.mark_processing("u1", stuck.id).await.unwrap());
        let queued = repo
            .insert_item(NewItem::from_url("u1", "https://blog.example.com/post"))
            .await
            .unwrap();

        let stuck_job = Job::ingest_for(&stuck);
        assert!(matches!(
            pipeline.run(stuck_job.clone()).await,
            JobOutcome::Skipped(_)
        ));

        let (bus, mut rx) = EventBus::new();
        let scheduler = Scheduler::new(repo.clone(), bus, SchedulerConfig::default());
        assert_eq!(scheduler.resume_interrupted().await.unwrap(), 2);
        assert_eq!(rx.try_recv().ok(), Some(stuck_job.clone()));
        assert_eq!(
            rx.try_recv().ok(),
            Some(Job::IngestUrl {
                item_id: queued.id,
                owner_id: "u1".into()
            })
        );

        assert!(matches!(
            pipeline.run(stuck_job).await,
            JobOutcome::Succeeded(_)
        ));
        let item = repo.get_item("u1", stuck.id).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Done);
    }
}
