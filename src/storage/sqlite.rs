//! SQLite implementation of [`SchedulingStore`]
//!
//! Timestamps are stored as fixed-width RFC 3339 strings in UTC
//! (microsecond precision, `Z` suffix) so range predicates can compare them
//! as text. Collections (platform lists, media, options, posting times) are
//! stored as JSON columns.

use chrono::{DateTime, SecondsFormat, Utc, Weekday};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, ToSql};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use super::repository::{
    AttemptResolution, PostQuery, QueueDepth, SchedulingStore, ScoreRecord, StorageError,
    StorageResult,
};
use crate::models::{
    format_hhmm, parse_hhmm, weekday_from_sunday, BestTimeRecommendation, EngagementMetrics,
    PlatformPost, PostStatus, QueueItem, QueueSettings, ScheduledPost,
};

const POST_COLUMNS: &str = "id, tenant_id, account_id, content, platforms, media, options, \
     scheduled_at, status, approval_status, error_message, created_by, created_at, updated_at, \
     published_at, deleted_at";

const PLATFORM_POST_COLUMNS: &str = "id, scheduled_post_id, tenant_id, platform, status, \
     external_post_id, external_url, metrics, last_synced_at, error_message, published_at";

const QUEUE_COLUMNS: &str = "id, scheduled_post_id, platform, status, scheduled_for, \
     attempt_count, max_attempts, last_error, started_at, completed_at, created_at";

// ============================================================================
// Store
// ============================================================================

/// SQLite-backed scheduling store
///
/// Uses `Mutex` to serialize access to the single connection. Multi-row
/// state changes run inside a transaction on that connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn new(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // WAL lets readers proceed while the dispatcher writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite scheduling store initialized");
        Ok(store)
    }

    /// In-memory store (for tests and dry runs)
    pub fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn create_schema(&self) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
                PRAGMA foreign_keys = ON;

                CREATE TABLE IF NOT EXISTS scheduled_posts (
                    id TEXT PRIMARY KEY,
                    tenant_id TEXT NOT NULL,
                    account_id TEXT NOT NULL,
                    content TEXT NOT NULL,
                    platforms TEXT NOT NULL,
                    media TEXT NOT NULL DEFAULT '[]',
                    options TEXT NOT NULL DEFAULT '{}',
                    scheduled_at TEXT,
                    status TEXT NOT NULL,
                    approval_status TEXT NOT NULL DEFAULT 'not_required',
                    error_message TEXT,
                    created_by TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    published_at TEXT,
                    deleted_at TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_posts_tenant_schedule
                    ON scheduled_posts(tenant_id, scheduled_at);

                CREATE INDEX IF NOT EXISTS idx_posts_account_status
                    ON scheduled_posts(tenant_id, account_id, status);

                CREATE TABLE IF NOT EXISTS platform_posts (
                    id TEXT PRIMARY KEY,
                    scheduled_post_id TEXT NOT NULL REFERENCES scheduled_posts(id),
                    tenant_id TEXT NOT NULL,
                    platform TEXT NOT NULL,
                    status TEXT NOT NULL,
                    external_post_id TEXT,
                    external_url TEXT,
                    metrics TEXT,
                    last_synced_at TEXT,
                    error_message TEXT,
                    published_at TEXT,
                    UNIQUE(scheduled_post_id, platform)
                );

                CREATE INDEX IF NOT EXISTS idx_platform_posts_sync
                    ON platform_posts(tenant_id, status, last_synced_at);

                CREATE TABLE IF NOT EXISTS queue_items (
                    id TEXT PRIMARY KEY,
                    scheduled_post_id TEXT NOT NULL REFERENCES scheduled_posts(id),
                    platform TEXT NOT NULL,
                    status TEXT NOT NULL,
                    scheduled_for TEXT NOT NULL,
                    attempt_count INTEGER NOT NULL DEFAULT 0,
                    max_attempts INTEGER NOT NULL,
                    last_error TEXT,
                    started_at TEXT,
                    completed_at TEXT,
                    created_at TEXT NOT NULL,
                    UNIQUE(scheduled_post_id, platform)
                );

                CREATE INDEX IF NOT EXISTS idx_queue_due
                    ON queue_items(status, scheduled_for);

                CREATE TABLE IF NOT EXISTS queue_settings (
                    tenant_id TEXT NOT NULL,
                    account_id TEXT NOT NULL,
                    platform TEXT NOT NULL,
                    enabled INTEGER NOT NULL,
                    posting_times TEXT NOT NULL,
                    days_enabled TEXT NOT NULL,
                    posts_per_day INTEGER NOT NULL,
                    PRIMARY KEY (tenant_id, account_id)
                );

                CREATE TABLE IF NOT EXISTS best_time_recommendations (
                    tenant_id TEXT NOT NULL,
                    platform TEXT NOT NULL,
                    weekday INTEGER NOT NULL,
                    hour INTEGER NOT NULL,
                    engagement_score REAL NOT NULL,
                    sample_size INTEGER NOT NULL,
                    avg_engagement_rate REAL NOT NULL,
                    calculated_at TEXT NOT NULL,
                    PRIMARY KEY (tenant_id, platform, weekday, hour)
                );

                CREATE TABLE IF NOT EXISTS performance_scores (
                    platform_post_id TEXT PRIMARY KEY,
                    tenant_id TEXT NOT NULL,
                    platform TEXT NOT NULL,
                    group_key TEXT NOT NULL,
                    score REAL NOT NULL,
                    label TEXT NOT NULL,
                    percentile_rank INTEGER NOT NULL,
                    scored_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_scores_group
                    ON performance_scores(tenant_id, platform, group_key);
                "#,
        )?;

        Ok(())
    }
}

// ============================================================================
// Column codecs
// ============================================================================

/// Fixed-width UTC timestamp encoding
pub(crate) fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn encode_opt_ts(ts: &Option<DateTime<Utc>>) -> Option<String> {
    ts.as_ref().map(encode_ts)
}

fn conversion_err<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn get_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|value| {
        DateTime::parse_from_rfc3339(&value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_err(idx, e))
    })
    .transpose()
}

fn get_parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_err(idx, e))
}

fn get_json<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_err(idx, e))
}

fn get_opt_json<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|value| serde_json::from_str(&value).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

fn row_to_post(row: &Row<'_>) -> rusqlite::Result<ScheduledPost> {
    Ok(ScheduledPost {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        account_id: row.get(2)?,
        content: row.get(3)?,
        platforms: get_json(row, 4)?,
        media: get_json(row, 5)?,
        options: get_json(row, 6)?,
        scheduled_at: get_opt_ts(row, 7)?,
        status: get_parsed(row, 8)?,
        approval_status: get_parsed(row, 9)?,
        error_message: row.get(10)?,
        created_by: row.get(11)?,
        created_at: get_ts(row, 12)?,
        updated_at: get_ts(row, 13)?,
        published_at: get_opt_ts(row, 14)?,
        deleted_at: get_opt_ts(row, 15)?,
    })
}

fn row_to_platform_post(row: &Row<'_>) -> rusqlite::Result<PlatformPost> {
    Ok(PlatformPost {
        id: row.get(0)?,
        scheduled_post_id: row.get(1)?,
        tenant_id: row.get(2)?,
        platform: row.get(3)?,
        status: get_parsed(row, 4)?,
        external_post_id: row.get(5)?,
        external_url: row.get(6)?,
        metrics: get_opt_json(row, 7)?,
        last_synced_at: get_opt_ts(row, 8)?,
        error_message: row.get(9)?,
        published_at: get_opt_ts(row, 10)?,
    })
}

fn row_to_queue_item(row: &Row<'_>) -> rusqlite::Result<QueueItem> {
    Ok(QueueItem {
        id: row.get(0)?,
        scheduled_post_id: row.get(1)?,
        platform: row.get(2)?,
        status: get_parsed(row, 3)?,
        scheduled_for: get_ts(row, 4)?,
        attempt_count: row.get(5)?,
        max_attempts: row.get(6)?,
        last_error: row.get(7)?,
        started_at: get_opt_ts(row, 8)?,
        completed_at: get_opt_ts(row, 9)?,
        created_at: get_ts(row, 10)?,
    })
}

fn row_to_settings(row: &Row<'_>) -> rusqlite::Result<QueueSettings> {
    let times: Vec<String> = get_json(row, 4)?;
    let posting_times = times
        .iter()
        .map(|t| {
            parse_hhmm(t).ok_or_else(|| {
                conversion_err(
                    4,
                    StorageError::corrupt("queue_settings", format!("bad posting time '{t}'")),
                )
            })
        })
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let days: Vec<u32> = get_json(row, 5)?;
    let days_enabled = days
        .into_iter()
        .map(|d| {
            weekday_from_sunday(d).ok_or_else(|| {
                conversion_err(
                    5,
                    StorageError::corrupt("queue_settings", format!("bad weekday {d}")),
                )
            })
        })
        .collect::<rusqlite::Result<Vec<Weekday>>>()?;

    Ok(QueueSettings {
        tenant_id: row.get(0)?,
        account_id: row.get(1)?,
        platform: row.get(2)?,
        enabled: row.get(3)?,
        posting_times,
        days_enabled,
        posts_per_day: row.get(6)?,
    }
    .normalize())
}

fn row_to_best_time(row: &Row<'_>) -> rusqlite::Result<BestTimeRecommendation> {
    let day: u32 = row.get(2)?;
    let weekday = weekday_from_sunday(day).ok_or_else(|| {
        conversion_err(
            2,
            StorageError::corrupt("best_time_recommendations", format!("bad weekday {day}")),
        )
    })?;

    Ok(BestTimeRecommendation {
        tenant_id: row.get(0)?,
        platform: row.get(1)?,
        weekday,
        hour: row.get(3)?,
        engagement_score: row.get(4)?,
        sample_size: row.get(5)?,
        avg_engagement_rate: row.get(6)?,
        calculated_at: get_ts(row, 7)?,
    })
}

/// Record the platform-side effect of an attempt. The (post, platform)
/// record is created on first touch.
fn write_platform_outcome(
    conn: &Connection,
    item: &QueueItem,
    tenant_id: &str,
    resolution: &AttemptResolution,
) -> rusqlite::Result<()> {
    match resolution {
        AttemptResolution::Published {
            external_id,
            url,
            at,
        } => {
            conn.execute(
                r#"
                    INSERT INTO platform_posts
                        (id, scheduled_post_id, tenant_id, platform, status,
                         external_post_id, external_url, published_at)
                    VALUES (?1, ?2, ?3, ?4, 'published', ?5, ?6, ?7)
                    ON CONFLICT(scheduled_post_id, platform) DO UPDATE SET
                        status = 'published',
                        external_post_id = excluded.external_post_id,
                        external_url = excluded.external_url,
                        published_at = excluded.published_at,
                        error_message = NULL
                    "#,
                params![
                    uuid::Uuid::new_v4().to_string(),
                    item.scheduled_post_id,
                    tenant_id,
                    item.platform,
                    external_id,
                    url,
                    encode_ts(at),
                ],
            )?;
        }
        AttemptResolution::Retry { error, .. } | AttemptResolution::Failed { error, .. } => {
            conn.execute(
                r#"
                    INSERT INTO platform_posts
                        (id, scheduled_post_id, tenant_id, platform, status, error_message)
                    VALUES (?1, ?2, ?3, ?4, 'failed', ?5)
                    ON CONFLICT(scheduled_post_id, platform) DO UPDATE SET
                        status = 'failed',
                        error_message = excluded.error_message
                    "#,
                params![
                    uuid::Uuid::new_v4().to_string(),
                    item.scheduled_post_id,
                    tenant_id,
                    item.platform,
                    error,
                ],
            )?;
        }
    }
    Ok(())
}

// ============================================================================
// SchedulingStore
// ============================================================================

impl SchedulingStore for SqliteStore {
    fn insert_post(&self, post: &ScheduledPost) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO scheduled_posts ({POST_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
            ),
            params![
                post.id,
                post.tenant_id,
                post.account_id,
                post.content,
                serde_json::to_string(&post.platforms)?,
                serde_json::to_string(&post.media)?,
                serde_json::to_string(&post.options)?,
                encode_opt_ts(&post.scheduled_at),
                post.status.as_str(),
                post.approval_status.as_str(),
                post.error_message,
                post.created_by,
                encode_ts(&post.created_at),
                encode_ts(&post.updated_at),
                encode_opt_ts(&post.published_at),
                encode_opt_ts(&post.deleted_at),
            ],
        )?;
        Ok(())
    }

    fn update_post(&self, post: &ScheduledPost) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
                UPDATE scheduled_posts SET
                    account_id = ?2, content = ?3, platforms = ?4, media = ?5, options = ?6,
                    scheduled_at = ?7, status = ?8, approval_status = ?9, error_message = ?10,
                    updated_at = ?11, published_at = ?12, deleted_at = ?13
                WHERE id = ?1
                "#,
            params![
                post.id,
                post.account_id,
                post.content,
                serde_json::to_string(&post.platforms)?,
                serde_json::to_string(&post.media)?,
                serde_json::to_string(&post.options)?,
                encode_opt_ts(&post.scheduled_at),
                post.status.as_str(),
                post.approval_status.as_str(),
                post.error_message,
                encode_ts(&post.updated_at),
                encode_opt_ts(&post.published_at),
                encode_opt_ts(&post.deleted_at),
            ],
        )?;
        Ok(())
    }

    fn get_post(&self, post_id: &str) -> StorageResult<Option<ScheduledPost>> {
        let conn = self.conn()?;
        let post = conn
            .query_row(
                &format!("SELECT {POST_COLUMNS} FROM scheduled_posts WHERE id = ?1"),
                params![post_id],
                row_to_post,
            )
            .optional()?;
        Ok(post)
    }

    fn list_posts(&self, query: &PostQuery) -> StorageResult<Vec<ScheduledPost>> {
        let mut sql = format!(
            "SELECT {POST_COLUMNS} FROM scheduled_posts WHERE tenant_id = ? AND deleted_at IS NULL"
        );
        let mut args: Vec<Box<dyn ToSql>> = vec![Box::new(query.tenant_id.clone())];

        if let Some(account) = &query.account_id {
            sql.push_str(" AND account_id = ?");
            args.push(Box::new(account.clone()));
        }
        if !query.statuses.is_empty() {
            let placeholders = vec!["?"; query.statuses.len()].join(",");
            sql.push_str(&format!(" AND status IN ({placeholders})"));
            for status in &query.statuses {
                args.push(Box::new(status.as_str()));
            }
        }
        if let Some(from) = &query.scheduled_from {
            sql.push_str(" AND scheduled_at >= ?");
            args.push(Box::new(encode_ts(from)));
        }
        if let Some(to) = &query.scheduled_to {
            sql.push_str(" AND scheduled_at <= ?");
            args.push(Box::new(encode_ts(to)));
        }
        sql.push_str(" ORDER BY scheduled_at IS NULL, scheduled_at, created_at");
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            args.push(Box::new(limit as i64));
        }

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let posts = stmt
            .query_map(params_from_iter(args.iter()), row_to_post)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(posts)
    }

    fn tenants(&self) -> StorageResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT tenant_id FROM scheduled_posts WHERE deleted_at IS NULL ORDER BY tenant_id",
        )?;
        let tenants = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tenants)
    }

    fn transition_post(
        &self,
        post_id: &str,
        from: &[PostStatus],
        to: PostStatus,
        error_message: Option<&str>,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        if from.is_empty() {
            return Ok(false);
        }

        let placeholders = vec!["?"; from.len()].join(",");
        let sql = format!(
            "UPDATE scheduled_posts SET
                 status = ?, error_message = ?, updated_at = ?,
                 published_at = CASE WHEN ? = 'published' THEN ? ELSE published_at END
             WHERE id = ? AND status IN ({placeholders})"
        );

        let at = encode_ts(&at);
        let mut args: Vec<Box<dyn ToSql>> = vec![
            Box::new(to.as_str()),
            Box::new(error_message.map(str::to_string)),
            Box::new(at.clone()),
            Box::new(to.as_str()),
            Box::new(at),
            Box::new(post_id.to_string()),
        ];
        for status in from {
            args.push(Box::new(status.as_str()));
        }

        let conn = self.conn()?;
        let changed = conn.execute(&sql, params_from_iter(args.iter()))?;
        Ok(changed == 1)
    }

    fn upsert_platform_post(&self, platform_post: &PlatformPost) -> StorageResult<()> {
        let metrics = platform_post
            .metrics
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO platform_posts ({PLATFORM_POST_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(scheduled_post_id, platform) DO UPDATE SET
                     status = excluded.status,
                     external_post_id = excluded.external_post_id,
                     external_url = excluded.external_url,
                     metrics = excluded.metrics,
                     last_synced_at = excluded.last_synced_at,
                     error_message = excluded.error_message,
                     published_at = excluded.published_at"
            ),
            params![
                platform_post.id,
                platform_post.scheduled_post_id,
                platform_post.tenant_id,
                platform_post.platform,
                platform_post.status.as_str(),
                platform_post.external_post_id,
                platform_post.external_url,
                metrics,
                encode_opt_ts(&platform_post.last_synced_at),
                platform_post.error_message,
                encode_opt_ts(&platform_post.published_at),
            ],
        )?;
        Ok(())
    }

    fn get_platform_post(&self, platform_post_id: &str) -> StorageResult<Option<PlatformPost>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!("SELECT {PLATFORM_POST_COLUMNS} FROM platform_posts WHERE id = ?1"),
                params![platform_post_id],
                row_to_platform_post,
            )
            .optional()?;
        Ok(record)
    }

    fn platform_posts_for(&self, post_id: &str) -> StorageResult<Vec<PlatformPost>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PLATFORM_POST_COLUMNS} FROM platform_posts
             WHERE scheduled_post_id = ?1 ORDER BY platform"
        ))?;
        let records = stmt
            .query_map(params![post_id], row_to_platform_post)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn platform_posts_needing_sync(
        &self,
        tenant_id: &str,
        stale_before: DateTime<Utc>,
    ) -> StorageResult<Vec<PlatformPost>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PLATFORM_POST_COLUMNS} FROM platform_posts
             WHERE tenant_id = ?1
               AND status = 'published'
               AND external_post_id IS NOT NULL
               AND (last_synced_at IS NULL OR last_synced_at < ?2)
             ORDER BY published_at"
        ))?;
        let records = stmt
            .query_map(params![tenant_id, encode_ts(&stale_before)], row_to_platform_post)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn update_platform_metrics(
        &self,
        platform_post_id: &str,
        metrics: &EngagementMetrics,
        synced_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE platform_posts SET metrics = ?2, last_synced_at = ?3 WHERE id = ?1",
            params![
                platform_post_id,
                serde_json::to_string(metrics)?,
                encode_ts(&synced_at)
            ],
        )?;
        Ok(())
    }

    fn published_platform_posts(
        &self,
        tenant_id: &str,
        platform: Option<&str>,
    ) -> StorageResult<Vec<PlatformPost>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PLATFORM_POST_COLUMNS} FROM platform_posts
             WHERE tenant_id = ?1
               AND status = 'published'
               AND published_at IS NOT NULL
               AND (?2 IS NULL OR platform = ?2)
             ORDER BY published_at"
        ))?;
        let records = stmt
            .query_map(params![tenant_id, platform], row_to_platform_post)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn upsert_queue_item(&self, item: &QueueItem) -> StorageResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            &format!(
                "INSERT INTO queue_items ({QUEUE_COLUMNS})
                 VALUES (?1, ?2, ?3, 'pending', ?4, 0, ?5, NULL, NULL, NULL, ?6)
                 ON CONFLICT(scheduled_post_id, platform) DO UPDATE SET
                     status = 'pending',
                     scheduled_for = excluded.scheduled_for,
                     attempt_count = 0,
                     max_attempts = excluded.max_attempts,
                     last_error = NULL,
                     started_at = NULL,
                     completed_at = NULL
                 WHERE queue_items.status NOT IN ('completed', 'processing')"
            ),
            params![
                item.id,
                item.scheduled_post_id,
                item.platform,
                encode_ts(&item.scheduled_for),
                item.max_attempts,
                encode_ts(&item.created_at),
            ],
        )?;
        Ok(changed == 1)
    }

    fn get_queue_item(&self, item_id: &str) -> StorageResult<Option<QueueItem>> {
        let conn = self.conn()?;
        let item = conn
            .query_row(
                &format!("SELECT {QUEUE_COLUMNS} FROM queue_items WHERE id = ?1"),
                params![item_id],
                row_to_queue_item,
            )
            .optional()?;
        Ok(item)
    }

    fn queue_items_for(&self, post_id: &str) -> StorageResult<Vec<QueueItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {QUEUE_COLUMNS} FROM queue_items WHERE scheduled_post_id = ?1 ORDER BY platform"
        ))?;
        let items = stmt
            .query_map(params![post_id], row_to_queue_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    fn due_queue_items(&self, now: DateTime<Utc>, limit: usize) -> StorageResult<Vec<QueueItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {QUEUE_COLUMNS} FROM queue_items
             WHERE status = 'pending'
               AND scheduled_for <= ?1
               AND attempt_count < max_attempts
               AND scheduled_post_id IN (
                   SELECT id FROM scheduled_posts
                   WHERE status IN ('scheduled', 'publishing')
                     AND approval_status IN ('approved', 'not_required')
                     AND deleted_at IS NULL
               )
             ORDER BY scheduled_for, created_at
             LIMIT ?2"
        ))?;
        let items = stmt
            .query_map(params![encode_ts(&now), limit as i64], row_to_queue_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    fn claim_queue_item(
        &self,
        item_id: &str,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let claimed = tx.execute(
            r#"
                UPDATE queue_items SET
                    status = 'processing',
                    attempt_count = attempt_count + 1,
                    started_at = ?2
                WHERE id = ?1
                  AND status = 'pending'
                  AND attempt_count < max_attempts
                "#,
            params![item_id, encode_ts(&now)],
        )?;
        if claimed == 0 {
            return Ok(false);
        }

        let (post_id, platform): (String, String) = tx.query_row(
            "SELECT scheduled_post_id, platform FROM queue_items WHERE id = ?1",
            params![item_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        tx.execute(
            r#"
                INSERT INTO platform_posts (id, scheduled_post_id, tenant_id, platform, status)
                VALUES (?1, ?2, ?3, ?4, 'publishing')
                ON CONFLICT(scheduled_post_id, platform) DO UPDATE SET
                    status = 'publishing',
                    error_message = NULL
                "#,
            params![uuid::Uuid::new_v4().to_string(), post_id, tenant_id, platform],
        )?;

        tx.commit()?;
        Ok(true)
    }

    fn resolve_attempt(
        &self,
        item: &QueueItem,
        tenant_id: &str,
        resolution: &AttemptResolution,
    ) -> StorageResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let changed = match resolution {
            AttemptResolution::Published { at, .. } => tx.execute(
                "UPDATE queue_items SET status = 'completed', completed_at = ?2, last_error = NULL
                 WHERE id = ?1 AND status = 'processing'",
                params![item.id, encode_ts(at)],
            )?,
            AttemptResolution::Retry { error, retry_at } => tx.execute(
                "UPDATE queue_items SET status = 'pending', scheduled_for = ?2, last_error = ?3,
                     started_at = NULL
                 WHERE id = ?1 AND status = 'processing'",
                params![item.id, encode_ts(retry_at), error],
            )?,
            AttemptResolution::Failed { error, at } => tx.execute(
                "UPDATE queue_items SET status = 'failed', completed_at = ?2, last_error = ?3
                 WHERE id = ?1 AND status = 'processing'",
                params![item.id, encode_ts(at), error],
            )?,
        };

        // Another worker (or the watchdog) already settled this attempt
        if changed == 0 {
            return Ok(false);
        }

        write_platform_outcome(&tx, item, tenant_id, resolution)?;
        tx.commit()?;
        Ok(true)
    }

    fn stuck_queue_items(&self, started_before: DateTime<Utc>) -> StorageResult<Vec<QueueItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {QUEUE_COLUMNS} FROM queue_items
             WHERE status = 'processing' AND started_at <= ?1
             ORDER BY started_at"
        ))?;
        let items = stmt
            .query_map(params![encode_ts(&started_before)], row_to_queue_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    fn cancel_queue_items(
        &self,
        post_id: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE queue_items SET status = 'failed', last_error = ?2, completed_at = ?3
             WHERE scheduled_post_id = ?1 AND status = 'pending'",
            params![post_id, reason, encode_ts(&at)],
        )?;
        Ok(changed)
    }

    fn queue_depth(&self, tenant_id: &str) -> StorageResult<QueueDepth> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT q.status, COUNT(*) FROM queue_items q
             JOIN scheduled_posts p ON p.id = q.scheduled_post_id
             WHERE p.tenant_id = ?1
             GROUP BY q.status",
        )?;
        let rows = stmt
            .query_map(params![tenant_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut depth = QueueDepth::default();
        for (status, count) in rows {
            let count = count.max(0) as usize;
            match status.as_str() {
                "pending" => depth.pending = count,
                "processing" => depth.processing = count,
                "completed" => depth.completed = count,
                "failed" => depth.failed = count,
                other => {
                    return Err(StorageError::corrupt(
                        "queue_items",
                        format!("unknown status '{other}'"),
                    ))
                }
            }
        }
        Ok(depth)
    }

    fn get_queue_settings(
        &self,
        tenant_id: &str,
        account_id: &str,
    ) -> StorageResult<Option<QueueSettings>> {
        let conn = self.conn()?;
        let settings = conn
            .query_row(
                "SELECT tenant_id, account_id, platform, enabled, posting_times, days_enabled,
                        posts_per_day
                 FROM queue_settings WHERE tenant_id = ?1 AND account_id = ?2",
                params![tenant_id, account_id],
                row_to_settings,
            )
            .optional()?;
        Ok(settings)
    }

    fn save_queue_settings(&self, settings: &QueueSettings) -> StorageResult<()> {
        let times: Vec<String> = settings.posting_times.iter().map(format_hhmm).collect();
        let days: Vec<u32> = settings
            .days_enabled
            .iter()
            .map(|d| d.num_days_from_sunday())
            .collect();

        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO queue_settings
                 (tenant_id, account_id, platform, enabled, posting_times, days_enabled, posts_per_day)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                settings.tenant_id,
                settings.account_id,
                settings.platform,
                settings.enabled,
                serde_json::to_string(&times)?,
                serde_json::to_string(&days)?,
                settings.posts_per_day,
            ],
        )?;
        Ok(())
    }

    fn upsert_best_time(&self, recommendation: &BestTimeRecommendation) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO best_time_recommendations
                 (tenant_id, platform, weekday, hour, engagement_score, sample_size,
                  avg_engagement_rate, calculated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                recommendation.tenant_id,
                recommendation.platform,
                recommendation.weekday.num_days_from_sunday(),
                recommendation.hour,
                recommendation.engagement_score,
                recommendation.sample_size,
                recommendation.avg_engagement_rate,
                encode_ts(&recommendation.calculated_at),
            ],
        )?;
        Ok(())
    }

    fn best_times(
        &self,
        tenant_id: &str,
        platform: Option<&str>,
    ) -> StorageResult<Vec<BestTimeRecommendation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT tenant_id, platform, weekday, hour, engagement_score, sample_size,
                    avg_engagement_rate, calculated_at
             FROM best_time_recommendations
             WHERE tenant_id = ?1 AND (?2 IS NULL OR platform = ?2)
             ORDER BY engagement_score DESC, platform, weekday, hour",
        )?;
        let rows = stmt
            .query_map(params![tenant_id, platform], row_to_best_time)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn clear_best_times(&self, tenant_id: &str) -> StorageResult<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM best_time_recommendations WHERE tenant_id = ?1",
            params![tenant_id],
        )?;
        Ok(removed)
    }

    fn record_score(&self, record: &ScoreRecord) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO performance_scores
                 (platform_post_id, tenant_id, platform, group_key, score, label,
                  percentile_rank, scored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.platform_post_id,
                record.tenant_id,
                record.platform,
                record.group_key,
                record.score,
                record.label,
                record.percentile_rank,
                encode_ts(&record.scored_at),
            ],
        )?;
        Ok(())
    }

    fn historical_scores(
        &self,
        tenant_id: &str,
        platform: &str,
        group_key: &str,
        exclude_platform_post: Option<&str>,
    ) -> StorageResult<Vec<f64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT score FROM performance_scores
             WHERE tenant_id = ?1 AND platform = ?2 AND group_key = ?3
               AND (?4 IS NULL OR platform_post_id != ?4)",
        )?;
        let scores = stmt
            .query_map(
                params![tenant_id, platform, group_key, exclude_platform_post],
                |row| row.get::<_, f64>(0),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(scores)
    }
}
