use chrono::{Duration, Utc};

use crate::ai::{insight_material, rss_material};
use crate::models::{
    DiscoveryItem, Item, JobOutcome, JobReport, NewWeeklyReport, ReportKind, WeeklyReport,
};
use crate::services::OutgoingMail;

use super::email::{render_report_email, report_subject};
use super::{failed, Pipeline, StepError, StepFailure, StepRunner};

/// Reports retained per owner.
pub const MAX_REPORTS: usize = 10;

const REPORT_WINDOW_DAYS: i64 = 7;

impl Pipeline {
    /// `report/generate.*`: collect material, write the report, store it, then
    /// email it when the owner asked for notifications.
    pub(super) async fn report(&self, owner_id: &str, kind: ReportKind) -> JobOutcome {
        let job = match kind {
            ReportKind::Insight => "report/generate.insight",
            ReportKind::Rss => "report/generate.rss",
        };
        let mut runner = StepRunner::new(job, self.policy.clone());
        let repo = &*self.repo;
        let analyzer = &self.analyzer;
        let end = Utc::now();
        let start = end - Duration::days(REPORT_WINDOW_DAYS);

        let result = async {
            let settings = runner
                .run("load-config", move || self.load_settings(owner_id))
                .await?;

            let material: String = runner
                .run("collect-material", move || async move {
                    let material = match kind {
                        ReportKind::Insight => {
                            let items: Vec<Item> = repo.done_items(owner_id, Some(start)).await?;
                            insight_material(&items)
                        }
                        ReportKind::Rss => {
                            let items: Vec<DiscoveryItem> =
                                repo.discovery_for_owner(owner_id).await?;
                            rss_material(&items)
                        }
                    };
                    Ok::<_, StepError>(material)
                })
                .await?;
            if material.trim().is_empty() {
                return Ok(None);
            }

            let prompt = match kind {
                ReportKind::Insight => settings.user.insight_prompt.as_deref(),
                ReportKind::Rss => settings.user.rss_prompt.as_deref(),
            };
            let content: String = runner
                .run("write-report", || {
                    let material = &material;
                    let model = &settings.model;
                    async move {
                        Ok::<_, StepError>(
                            analyzer.weekly_report(kind, prompt, material, model).await?,
                        )
                    }
                })
                .await?;

            let report: WeeklyReport = runner
                .run("persist", || {
                    let new_report = NewWeeklyReport {
                        owner_id: owner_id.to_string(),
                        kind,
                        start_date: start,
                        end_date: end,
                        content: content.clone(),
                    };
                    async move {
                        let report = repo.insert_report(new_report).await?;
                        let pruned = repo.prune_reports(owner_id, MAX_REPORTS).await?;
                        if pruned > 0 {
                            tracing::debug!("Pruned {} old reports for {}", pruned, owner_id);
                        }
                        Ok::<_, StepError>(report)
                    }
                })
                .await?;

            let recipient = settings
                .user
                .notification_email
                .clone()
                .filter(|e| !e.trim().is_empty());
            let emailed = match (recipient, self.mailer.as_deref()) {
                (Some(to), Some(mailer)) => {
                    let mail = OutgoingMail {
                        to,
                        subject: report_subject(kind, end),
                        html: render_report_email(kind, &report.content, start, end),
                    };
                    let sent = runner
                        .run("send-email", || {
                            let mail = &mail;
                            async move {
                                mailer.send(mail).await?;
                                Ok::<_, StepError>(())
                            }
                        })
                        .await;
                    match sent {
                        Ok(()) => true,
                        Err(failure) => {
                            tracing::warn!(
                                "Report {} stored but not emailed: {}",
                                report.id,
                                failure
                            );
                            false
                        }
                    }
                }
                _ => false,
            };

            Ok::<_, StepFailure>(Some(JobReport::Report {
                report_id: report.id,
                emailed,
            }))
        }
        .await;

        match result {
            Ok(Some(report)) => JobOutcome::Succeeded(report),
            Ok(None) => JobOutcome::Skipped(format!("nothing to report for {owner_id}")),
            Err(failure) => failed(failure),
        }
    }
}
