use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

mod ai;
mod config;
mod db;
mod error;
mod events;
mod feed;
mod models;
mod pipeline;
mod scheduler;
mod server;
mod services;

use ai::OpenAiClient;
use config::Config;
use db::Repository;
use error::Result;
use events::EventBus;
use models::{Job, JobOutcome, NewItem};
use pipeline::{Pipeline, RetryPolicy, Worker};
use scheduler::Scheduler;
use services::{BrevoMailer, ContentFetcher, PageSource};

const USAGE: &str = "Usage: neofeed [--sweep | --cleanup | --ingest <owner> <url> | --reanalyze <owner> <item id>
               | --delete-item <owner> <item id> | --subscribe <owner> <url> | --subscriptions <owner>
               | --unsubscribe <owner> <subscription id> | --import <owner> <opml> | --digest <owner>]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Info and above unless RUST_LOG says otherwise
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = Config::load()?;
    let pipeline = Arc::new(build_pipeline(&config).await?);

    match args.get(1).map(String::as_str) {
        None => serve(&config, pipeline).await,
        Some("--sweep") => {
            let (bus, rx) = EventBus::new();
            let scheduler = Scheduler::new(
                pipeline.repository().clone(),
                bus,
                config.scheduler.clone(),
            );
            let summary = scheduler.sweep(Utc::now()).await?;
            // Dropping the scheduler closes the bus so the worker exits once drained.
            drop(scheduler);
            Worker::new(pipeline, config.scheduler.max_concurrent_jobs)
                .run(rx)
                .await;
            println!(
                "Sweep emitted {} polls and {} reports{}",
                summary.polls,
                summary.reports,
                if summary.cleanup { ", plus cleanup" } else { "" }
            );
            Ok(())
        }
        Some("--cleanup") => report(pipeline.run(Job::CleanupDiscovery).await),
        Some("--ingest") => {
            let (owner_id, url) = two_args(&args)?;
            let item = pipeline
                .repository()
                .insert_item(NewItem::from_url(owner_id, url))
                .await?;
            report(
                pipeline
                    .run(Job::IngestUrl {
                        item_id: item.id,
                        owner_id: owner_id.to_string(),
                    })
                    .await,
            )
        }
        Some("--reanalyze") => {
            let (owner_id, id) = two_args(&args)?;
            let item_id: i64 = id.parse()?;
            report(
                pipeline
                    .run(Job::Reanalyze {
                        item_id,
                        owner_id: owner_id.to_string(),
                    })
                    .await,
            )
        }
        Some("--delete-item") => {
            let (owner_id, id) = two_args(&args)?;
            let removed = pipeline.repository().delete_item(owner_id, id.parse()?).await?;
            println!("{}", if removed { "Item deleted" } else { "No such item" });
            Ok(())
        }
        Some("--subscriptions") => {
            let owner_id = args.get(2).ok_or_else(|| anyhow::anyhow!("{USAGE}"))?;
            for sub in pipeline.repository().subscriptions_for_owner(owner_id).await? {
                let polled = sub
                    .last_polled_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!("{:>5}  {}  (polled {}; {})", sub.id, sub.url, polled, sub.themes.join(", "));
            }
            Ok(())
        }
        Some("--unsubscribe") => {
            let (owner_id, id) = two_args(&args)?;
            let removed = pipeline
                .repository()
                .delete_subscription(owner_id, id.parse()?)
                .await?;
            println!("{}", if removed { "Unsubscribed" } else { "No such subscription" });
            Ok(())
        }
        Some("--subscribe") => {
            let (owner_id, url) = two_args(&args)?;
            let feed = pipeline.feeds().discover_feed(url).await?;
            let sub = pipeline
                .repository()
                .insert_subscription(owner_id, &feed.url)
                .await?;
            println!("Subscribed {} to {} ({})", owner_id, feed.title, sub.url);
            Ok(())
        }
        Some("--import") => {
            let (owner_id, path) = two_args(&args)?;
            let urls = feed::parse_opml_file(&PathBuf::from(path))?;
            for url in &urls {
                pipeline
                    .repository()
                    .insert_subscription(owner_id, url)
                    .await?;
            }
            println!("Imported {} feeds for {} from {}", urls.len(), owner_id, path);
            Ok(())
        }
        Some("--digest") => {
            let owner_id = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("{USAGE}"))?;
            report(
                pipeline
                    .run(Job::GenerateDigest {
                        owner_id: owner_id.clone(),
                        force: true,
                        with_image: true,
                    })
                    .await,
            )
        }
        Some(_) => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
}

async fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let repo = Arc::new(Repository::new(&config.db_path).await?);
    let pages: Arc<dyn PageSource> = Arc::new(ContentFetcher::new(&config.fetch)?);
    let completion = Arc::new(OpenAiClient::new(Duration::from_secs(
        config.ai.timeout_secs,
    ))?);

    let mut pipeline = Pipeline::new(
        repo,
        pages,
        completion,
        config.ai.clone(),
        RetryPolicy::from_config(&config.retry),
    );

    if let Some(mail) = &config.mail {
        match BrevoMailer::new(mail) {
            Ok(mailer) => pipeline = pipeline.with_mailer(Arc::new(mailer)),
            Err(e) => tracing::warn!("Report emails disabled: {}", e),
        }
    }
    Ok(pipeline)
}

/// Worker, scheduler and submission API together until Ctrl-C.
///
/// On shutdown the API and scheduler stop first; the worker then finishes
/// every queued job. A second Ctrl-C exits at once, and whatever was cut
/// short is picked up again on the next start.
async fn serve(config: &Config, pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
    let repo = pipeline.repository().clone();
    let (bus, rx) = EventBus::new();

    let worker = tokio::spawn(Worker::new(pipeline, config.scheduler.max_concurrent_jobs).run(rx));

    let scheduler = Scheduler::new(repo.clone(), bus.clone(), config.scheduler.clone());
    scheduler.resume_interrupted().await?;
    let scheduler = tokio::spawn(scheduler.run());

    let served = server::run_server(&config.server.bind, repo, bus, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutting down, finishing queued jobs");
    })
    .await;

    // The scheduler holds the last sender; once it is gone the worker drains and exits.
    scheduler.abort();
    let _ = scheduler.await;

    tokio::select! {
        finished = worker => {
            if let Err(e) = finished {
                tracing::error!("Job worker ended abnormally: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Forced exit; unfinished items resume on next start");
        }
    }
    served
}

fn two_args(args: &[String]) -> anyhow::Result<(&str, &str)> {
    match (args.get(2), args.get(3)) {
        (Some(a), Some(b)) => Ok((a.as_str(), b.as_str())),
        _ => Err(anyhow::anyhow!("{USAGE}")),
    }
}

fn report(outcome: JobOutcome) -> anyhow::Result<()> {
    match outcome {
        JobOutcome::Succeeded(report) => {
            println!("Done: {report:?}");
            Ok(())
        }
        JobOutcome::Skipped(reason) => {
            println!("Skipped: {reason}");
            Ok(())
        }
        JobOutcome::Failed { step, error } => Err(anyhow::anyhow!("failed at {step}: {error}")),
    }
}
