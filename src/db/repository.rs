use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{
    AiConfig, AnalysisStatus, Category, DigestCache, DiscoveryItem, DiscoverySummary, Item,
    ItemAnalysisUpdate, ItemStatus, NewDiscoveryItem, NewItem, NewWeeklyReport, Profile,
    ReportKind, SourceType, Subscription, WeeklyReport,
};

use super::schema::SCHEMA;

const ITEM_COLUMNS: &str = "id, owner_id, url, title, content_raw, summary, takeaways, tags, \
     category, emotion, reading_time, status, analysis_status, source_type, created_at";

const SUBSCRIPTION_COLUMNS: &str = "id, owner_id, url, themes, last_polled_at, created_at";

const DISCOVERY_COLUMNS: &str =
    "id, owner_id, title, url, summary, reason, source_name, category, created_at";

/// SQLite-backed content store. Every read and write is scoped by owner id,
/// except the sweeps that are global by nature (scheduler listing, discovery wipe).
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    pub async fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Profile operations

    pub async fn upsert_profile(&self, profile: Profile) -> Result<()> {
        let config_json = profile
            .ai_config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO profiles (id, display_name, email, api_key, ai_config)
                       VALUES (?1, ?2, ?3, ?4, ?5)
                       ON CONFLICT(id) DO UPDATE SET
                           display_name = excluded.display_name,
                           email = excluded.email,
                           api_key = excluded.api_key,
                           ai_config = excluded.ai_config"#,
                    params![
                        profile.id,
                        profile.display_name,
                        profile.email,
                        profile.api_key,
                        config_json
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_profile(&self, owner_id: &str) -> Result<Option<Profile>> {
        let owner_id = owner_id.to_string();
        let profile = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, display_name, email, api_key, ai_config FROM profiles WHERE id = ?1",
                )?;
                let profile = stmt
                    .query_row(params![owner_id], profile_from_row)
                    .optional()?;
                Ok(profile)
            })
            .await?;
        Ok(profile)
    }

    pub async fn find_owner_by_api_key(&self, api_key: &str) -> Result<Option<String>> {
        let api_key = api_key.to_string();
        let owner = self
            .conn
            .call(move |conn| {
                let owner = conn
                    .query_row(
                        "SELECT id FROM profiles WHERE api_key = ?1",
                        params![api_key],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(owner)
            })
            .await?;
        Ok(owner)
    }

    pub async fn get_ai_config(&self, owner_id: &str) -> Result<Option<AiConfig>> {
        Ok(self.get_profile(owner_id).await?.and_then(|p| p.ai_config))
    }

    /// Profiles that carry an AI configuration, for the scheduler sweep.
    pub async fn configured_profiles(&self) -> Result<Vec<Profile>> {
        let profiles = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, display_name, email, api_key, ai_config FROM profiles WHERE ai_config IS NOT NULL ORDER BY id",
                )?;
                let profiles = stmt
                    .query_map([], profile_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(profiles)
            })
            .await?;
        Ok(profiles)
    }

    // Item operations

    pub async fn insert_item(&self, item: NewItem) -> Result<Item> {
        self.insert_item_at(item, Utc::now()).await
    }

    pub async fn insert_item_at(&self, item: NewItem, created_at: DateTime<Utc>) -> Result<Item> {
        let item = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO items (owner_id, url, title, content_raw, status, source_type, created_at)
                       VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6)"#,
                    params![
                        item.owner_id,
                        item.url,
                        item.title,
                        item.content_raw,
                        item.source_type.as_str(),
                        created_at.to_rfc3339(),
                    ],
                )?;
                let id = conn.last_insert_rowid();
                let item = conn.query_row(
                    &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1"),
                    params![id],
                    item_from_row,
                )?;
                Ok(item)
            })
            .await?;
        Ok(item)
    }

    pub async fn get_item(&self, owner_id: &str, id: i64) -> Result<Option<Item>> {
        let owner_id = owner_id.to_string();
        let item = self
            .conn
            .call(move |conn| {
                let item = conn
                    .query_row(
                        &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1 AND owner_id = ?2"),
                        params![id, owner_id],
                        item_from_row,
                    )
                    .optional()?;
                Ok(item)
            })
            .await?;
        Ok(item)
    }

    /// `pending -> processing`. Returns false when the item was not pending.
    pub async fn mark_processing(&self, owner_id: &str, id: i64) -> Result<bool> {
        let owner_id = owner_id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE items SET status = 'processing' WHERE id = ?1 AND owner_id = ?2 AND status = 'pending'",
                    params![id, owner_id],
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(changed)
    }

    /// `processing -> done` with the analysis fields. Returns false when the
    /// item was not in flight (already terminal or never started).
    pub async fn complete_item(
        &self,
        owner_id: &str,
        id: i64,
        update: ItemAnalysisUpdate,
    ) -> Result<bool> {
        self.write_analysis(owner_id, id, update, "status = 'processing'")
            .await
    }

    /// Re-analysis of a terminal item. The item stays terminal throughout and
    /// lands on `done`.
    pub async fn apply_reanalysis(
        &self,
        owner_id: &str,
        id: i64,
        update: ItemAnalysisUpdate,
    ) -> Result<bool> {
        self.write_analysis(owner_id, id, update, "status IN ('done', 'failed')")
            .await
    }

    async fn write_analysis(
        &self,
        owner_id: &str,
        id: i64,
        update: ItemAnalysisUpdate,
        status_guard: &'static str,
    ) -> Result<bool> {
        let owner_id = owner_id.to_string();
        let takeaways = serde_json::to_string(&update.takeaways)?;
        let tags = serde_json::to_string(&update.tags)?;
        let changed = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    r#"UPDATE items SET
                           title = ?1,
                           content_raw = ?2,
                           summary = ?3,
                           takeaways = ?4,
                           tags = ?5,
                           category = ?6,
                           emotion = ?7,
                           reading_time = ?8,
                           analysis_status = ?9,
                           status = 'done'
                       WHERE id = ?10 AND owner_id = ?11 AND {status_guard}"#
                );
                let n = conn.execute(
                    &sql,
                    params![
                        update.title,
                        update.content_raw,
                        update.summary,
                        takeaways,
                        tags,
                        update.category.as_str(),
                        update.emotion,
                        update.reading_time,
                        update.analysis_status.as_str(),
                        id,
                        owner_id,
                    ],
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(changed)
    }

    /// `pending | processing -> failed`, recording the reason in the summary.
    pub async fn fail_item(&self, owner_id: &str, id: i64, reason: &str) -> Result<bool> {
        let owner_id = owner_id.to_string();
        let summary = format!("Processing failed: {reason}");
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE items SET status = 'failed', summary = ?1 WHERE id = ?2 AND owner_id = ?3 AND status IN ('pending', 'processing')",
                    params![summary, id, owner_id],
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(changed)
    }

    /// Startup recovery: items left `processing` by a worker that never
    /// finished go back to `pending`. Returns every pending item, oldest first.
    pub async fn requeue_interrupted(&self) -> Result<Vec<Item>> {
        let items = self
            .conn
            .call(|conn| {
                let tx = conn.transaction()?;
                let reset = tx.execute(
                    "UPDATE items SET status = 'pending' WHERE status = 'processing'",
                    [],
                )?;
                if reset > 0 {
                    tracing::warn!("Reset {} interrupted items to pending", reset);
                }
                let items = {
                    let mut stmt = tx.prepare(&format!(
                        "SELECT {ITEM_COLUMNS} FROM items WHERE status = 'pending' ORDER BY created_at, id"
                    ))?;
                    let items = stmt
                        .query_map([], item_from_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    items
                };
                tx.commit()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    /// All items for an owner, newest first.
    pub async fn items_for_owner(&self, owner_id: &str) -> Result<Vec<Item>> {
        let owner_id = owner_id.to_string();
        let items = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ITEM_COLUMNS} FROM items WHERE owner_id = ?1 ORDER BY created_at DESC, id DESC"
                ))?;
                let items = stmt
                    .query_map(params![owner_id], item_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    pub async fn count_items(&self, owner_id: &str) -> Result<usize> {
        self.count_where(owner_id, "owner_id = ?1").await
    }

    pub async fn count_done_items(&self, owner_id: &str) -> Result<usize> {
        self.count_where(owner_id, "owner_id = ?1 AND status = 'done'")
            .await
    }

    async fn count_where(&self, owner_id: &str, predicate: &'static str) -> Result<usize> {
        let owner_id = owner_id.to_string();
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM items WHERE {predicate}"),
                    params![owner_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count.max(0) as usize)
    }

    /// Done items for an owner, newest first, optionally limited to those
    /// created at or after `since`.
    pub async fn done_items(
        &self,
        owner_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Item>> {
        let owner_id = owner_id.to_string();
        let since = since.map(|dt| dt.to_rfc3339());
        let items = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    r#"SELECT {ITEM_COLUMNS} FROM items
                       WHERE owner_id = ?1 AND status = 'done'
                         AND (?2 IS NULL OR created_at >= ?2)
                       ORDER BY created_at DESC, id DESC"#
                ))?;
                let items = stmt
                    .query_map(params![owner_id, since], item_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    pub async fn delete_item(&self, owner_id: &str, id: i64) -> Result<bool> {
        let owner_id = owner_id.to_string();
        let deleted = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "DELETE FROM items WHERE id = ?1 AND owner_id = ?2",
                    params![id, owner_id],
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(deleted)
    }

    // Subscription operations

    /// Adds a subscription; re-adding the same URL returns the existing row.
    pub async fn insert_subscription(&self, owner_id: &str, url: &str) -> Result<Subscription> {
        let owner_id = owner_id.to_string();
        let url = url.to_string();
        let now = Utc::now().to_rfc3339();
        let sub = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO subscriptions (owner_id, url, themes, created_at) VALUES (?1, ?2, '[]', ?3)",
                    params![owner_id, url, now],
                )?;
                let sub = conn.query_row(
                    &format!(
                        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE owner_id = ?1 AND url = ?2"
                    ),
                    params![owner_id, url],
                    subscription_from_row,
                )?;
                Ok(sub)
            })
            .await?;
        Ok(sub)
    }

    pub async fn get_subscription(&self, owner_id: &str, id: i64) -> Result<Option<Subscription>> {
        let owner_id = owner_id.to_string();
        let sub = self
            .conn
            .call(move |conn| {
                let sub = conn
                    .query_row(
                        &format!(
                            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = ?1 AND owner_id = ?2"
                        ),
                        params![id, owner_id],
                        subscription_from_row,
                    )
                    .optional()?;
                Ok(sub)
            })
            .await?;
        Ok(sub)
    }

    pub async fn subscriptions_for_owner(&self, owner_id: &str) -> Result<Vec<Subscription>> {
        let owner_id = owner_id.to_string();
        let subs = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE owner_id = ?1 ORDER BY id"
                ))?;
                let subs = stmt
                    .query_map(params![owner_id], subscription_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(subs)
            })
            .await?;
        Ok(subs)
    }

    pub async fn all_subscriptions(&self) -> Result<Vec<Subscription>> {
        let subs = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions ORDER BY id"
                ))?;
                let subs = stmt
                    .query_map([], subscription_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(subs)
            })
            .await?;
        Ok(subs)
    }

    pub async fn delete_subscription(&self, owner_id: &str, id: i64) -> Result<bool> {
        let owner_id = owner_id.to_string();
        let deleted = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "DELETE FROM subscriptions WHERE id = ?1 AND owner_id = ?2",
                    params![id, owner_id],
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(deleted)
    }

    pub async fn mark_subscription_polled(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE subscriptions SET last_polled_at = ?1 WHERE id = ?2",
                    params![at.to_rfc3339(), id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Returns false when the subscription was deleted while its poll was in flight.
    pub async fn update_subscription_themes(
        &self,
        owner_id: &str,
        id: i64,
        themes: Vec<String>,
    ) -> Result<bool> {
        let owner_id = owner_id.to_string();
        let themes = serde_json::to_string(&themes)?;
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE subscriptions SET themes = ?1 WHERE id = ?2 AND owner_id = ?3",
                    params![themes, id, owner_id],
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(changed)
    }

    // Discovery operations

    /// Deletes every discovery row for (owner, source) and inserts `items`
    /// in the same transaction.
    pub async fn replace_discovery_for_source(
        &self,
        owner_id: &str,
        source_name: &str,
        items: Vec<NewDiscoveryItem>,
        created_at: DateTime<Utc>,
    ) -> Result<usize> {
        let owner_id = owner_id.to_string();
        let source_name = source_name.to_string();
        let rows = items
            .into_iter()
            .map(|item| -> Result<(String, NewDiscoveryItem)> {
                Ok((serde_json::to_string(&item.summary)?, item))
            })
            .collect::<Result<Vec<_>>>()?;
        let created_at = created_at.to_rfc3339();

        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM discovery_items WHERE owner_id = ?1 AND source_name = ?2",
                    params![owner_id, source_name],
                )?;
                {
                    let mut stmt = tx.prepare(
                        r#"INSERT INTO discovery_items
                           (owner_id, title, url, summary, reason, source_name, category, created_at)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
                    )?;
                    for (summary, item) in &rows {
                        stmt.execute(params![
                            owner_id,
                            item.title,
                            item.url,
                            summary,
                            item.reason,
                            source_name,
                            item.category,
                            created_at,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(rows.len())
            })
            .await?;
        Ok(inserted)
    }

    pub async fn discovery_for_owner(&self, owner_id: &str) -> Result<Vec<DiscoveryItem>> {
        let owner_id = owner_id.to_string();
        let items = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {DISCOVERY_COLUMNS} FROM discovery_items WHERE owner_id = ?1 ORDER BY created_at DESC, id"
                ))?;
                let items = stmt
                    .query_map(params![owner_id], discovery_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    /// Full sweep across every owner.
    pub async fn clear_discovery(&self) -> Result<usize> {
        let removed = self
            .conn
            .call(|conn| Ok(conn.execute("DELETE FROM discovery_items", [])?))
            .await?;
        Ok(removed)
    }

    // Digest cache

    pub async fn get_digest_cache(&self, owner_id: &str) -> Result<Option<DigestCache>> {
        let owner_id = owner_id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT owner_id, digest, image_url, item_count, degraded, generated_at FROM digest_cache WHERE owner_id = ?1",
                        params![owner_id],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, Option<String>>(2)?,
                                row.get::<_, i64>(3)?,
                                row.get::<_, i64>(4)?,
                                row.get::<_, String>(5)?,
                            ))
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        let Some((owner_id, digest, image_url, item_count, degraded, generated_at)) = row else {
            return Ok(None);
        };

        Ok(Some(DigestCache {
            owner_id,
            digest: serde_json::from_str(&digest)?,
            image_url,
            item_count: item_count.max(0) as usize,
            degraded: degraded != 0,
            generated_at: parse_datetime(&generated_at).unwrap_or_else(Utc::now),
        }))
    }

    pub async fn save_digest_cache(&self, cache: DigestCache) -> Result<()> {
        let digest = serde_json::to_string(&cache.digest)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO digest_cache (owner_id, digest, image_url, item_count, degraded, generated_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                       ON CONFLICT(owner_id) DO UPDATE SET
                           digest = excluded.digest,
                           image_url = excluded.image_url,
                           item_count = excluded.item_count,
                           degraded = excluded.degraded,
                           generated_at = excluded.generated_at"#,
                    params![
                        cache.owner_id,
                        digest,
                        cache.image_url,
                        cache.item_count as i64,
                        cache.degraded,
                        cache.generated_at.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Weekly reports

    pub async fn insert_report(&self, report: NewWeeklyReport) -> Result<WeeklyReport> {
        let created_at = Utc::now();
        let stored = report.clone();
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO weekly_reports (owner_id, kind, start_date, end_date, content, created_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
                    params![
                        report.owner_id,
                        report.kind.as_str(),
                        report.start_date.to_rfc3339(),
                        report.end_date.to_rfc3339(),
                        report.content,
                        created_at.to_rfc3339(),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        Ok(WeeklyReport {
            id,
            owner_id: stored.owner_id,
            kind: stored.kind,
            start_date: stored.start_date,
            end_date: stored.end_date,
            content: stored.content,
            created_at,
        })
    }

    /// Keeps the `keep` most recent reports for an owner and deletes the rest.
    pub async fn prune_reports(&self, owner_id: &str, keep: usize) -> Result<usize> {
        let owner_id = owner_id.to_string();
        let removed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    r#"DELETE FROM weekly_reports
                       WHERE owner_id = ?1 AND id NOT IN (
                           SELECT id FROM weekly_reports WHERE owner_id = ?1
                           ORDER BY created_at DESC, id DESC LIMIT ?2
                       )"#,
                    params![owner_id, keep as i64],
                )?;
                Ok(n)
            })
            .await?;
        Ok(removed)
    }

    pub async fn reports_for_owner(&self, owner_id: &str) -> Result<Vec<WeeklyReport>> {
        let owner_id = owner_id.to_string();
        let reports = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id, owner_id, kind, start_date, end_date, content, created_at
                       FROM weekly_reports WHERE owner_id = ?1
                       ORDER BY created_at DESC, id DESC"#,
                )?;
                let reports = stmt
                    .query_map(params![owner_id], report_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(reports)
            })
            .await?;
        Ok(reports)
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn json_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(row
        .get::<_, String>(idx)
        .ok()
        .and_then(|s| parse_datetime(&s))
        .unwrap_or_else(Utc::now))
}

fn profile_from_row(row: &Row) -> rusqlite::Result<Profile> {
    let ai_config = row
        .get::<_, Option<String>>(4)?
        .and_then(|s| serde_json::from_str::<AiConfig>(&s).ok());
    Ok(Profile {
        id: row.get(0)?,
        display_name: row.get(1)?,
        email: row.get(2)?,
        api_key: row.get(3)?,
        ai_config,
    })
}

fn item_from_row(row: &Row) -> rusqlite::Result<Item> {
    let status: String = row.get(11)?;
    Ok(Item {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        url: row.get(2)?,
        title: row.get(3)?,
        content_raw: row.get(4)?,
        summary: row.get(5)?,
        takeaways: json_list(row.get(6)?),
        tags: json_list(row.get(7)?),
        category: Category::normalize(&row.get::<_, String>(8)?),
        emotion: row.get(9)?,
        reading_time: row.get(10)?,
        status: status.parse().unwrap_or(ItemStatus::Failed),
        analysis_status: row
            .get::<_, Option<String>>(12)?
            .as_deref()
            .and_then(AnalysisStatus::parse),
        source_type: SourceType::parse(&row.get::<_, String>(13)?),
        created_at: timestamp(row, 14)?,
    })
}

fn subscription_from_row(row: &Row) -> rusqlite::Result<Subscription> {
    Ok(Subscription {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        url: row.get(2)?,
        themes: json_list(row.get(3)?),
        last_polled_at: row
            .get::<_, Option<String>>(4)?
            .and_then(|s| parse_datetime(&s)),
        created_at: timestamp(row, 5)?,
    })
}

fn discovery_from_row(row: &Row) -> rusqlite::Result<DiscoveryItem> {
    let summary = row
        .get::<_, String>(4)
        .ok()
        .and_then(|s| serde_json::from_str::<DiscoverySummary>(&s).ok())
        .unwrap_or_default();
    Ok(DiscoveryItem {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        url: row.get(3)?,
        summary,
        reason: row.get(5)?,
        source_name: row.get(6)?,
        category: row.get(7)?,
        created_at: timestamp(row, 8)?,
    })
}

fn report_from_row(row: &Row) -> rusqlite::Result<WeeklyReport> {
    Ok(WeeklyReport {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        kind: ReportKind::parse(&row.get::<_, String>(2)?),
        start_date: timestamp(row, 3)?,
        end_date: timestamp(row, 4)?,
        content: row.get(5)?,
        created_at: timestamp(row, 6)?,
    })
}
