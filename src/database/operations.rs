//! Database CRUD operations

use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;

/// Default page size for [`DownloadStore::list`]
pub const DEFAULT_LIST_LIMIT: i64 = 50;

/// Persistent mirror of a download task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRecord {
    pub id: String,
    pub status: String,
    pub source: String,
    pub site: String,
    pub url: String,
    pub title: String,
    pub quality: String,
    pub format: String,
    pub total: i64,
    pub finished: i64,
    pub size: i64,
    pub current: i64,
    pub progress: f64,
    pub saved_path: String,
    pub error: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Terminal figures written when a task finishes
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub id: String,
    pub status: String,
    pub total: i64,
    pub finished: i64,
    pub size: i64,
    pub current: i64,
    pub progress: f64,
    pub error: String,
}

/// Storage for download records; soft-delete aware
#[async_trait]
pub trait DownloadStore: Send + Sync {
    /// Create the record for a starting task, reviving a soft-deleted row with the same id
    async fn begin(&self, record: &DownloadRecord) -> Result<()>;

    /// Live record by id
    async fn get(&self, id: &str) -> Result<Option<DownloadRecord>>;

    /// Record by id including soft-deleted rows
    async fn get_with_deleted(&self, id: &str) -> Result<Option<DownloadRecord>>;

    /// Stamp terminal status and counters; false if no live row matched
    async fn finish(&self, outcome: &TaskOutcome) -> Result<bool>;

    /// Soft delete; false if no live row matched
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Latest live records, newest first
    async fn list(&self, limit: i64) -> Result<Vec<DownloadRecord>>;
}

/// Database manager
#[derive(Debug, Clone)]
pub struct DatabaseManager {
    pool: Pool<Sqlite>,
}

impl DatabaseManager {
    /// Create new database manager
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl DownloadStore for DatabaseManager {
    async fn begin(&self, record: &DownloadRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO downloads
            (id, status, source, site, url, title, quality, format, total, finished, size,
             current, progress, saved_path, error, created_at, updated_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                source = excluded.source,
                site = excluded.site,
                url = excluded.url,
                title = excluded.title,
                quality = excluded.quality,
                format = excluded.format,
                total = excluded.total,
                finished = excluded.finished,
                size = excluded.size,
                current = excluded.current,
                progress = excluded.progress,
                saved_path = excluded.saved_path,
                error = excluded.error,
                updated_at = excluded.updated_at,
                deleted_at = NULL
            "#,
        )
        .bind(&record.id)
        .bind(&record.status)
        .bind(&record.source)
        .bind(&record.site)
        .bind(&record.url)
        .bind(&record.title)
        .bind(&record.quality)
        .bind(&record.format)
        .bind(record.total)
        .bind(record.finished)
        .bind(record.size)
        .bind(record.current)
        .bind(record.progress)
        .bind(&record.saved_path)
        .bind(&record.error)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("Saved download record: {}", record.id);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<DownloadRecord>> {
        let row = sqlx::query("SELECT * FROM downloads WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_into_download_record).transpose()
    }

    async fn get_with_deleted(&self, id: &str) -> Result<Option<DownloadRecord>> {
        let row = sqlx::query("SELECT * FROM downloads WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_into_download_record).transpose()
    }

    async fn finish(&self, outcome: &TaskOutcome) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE downloads
            SET status = ?, total = ?, finished = ?, size = ?, current = ?, progress = ?,
                error = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(&outcome.status)
        .bind(outcome.total)
        .bind(outcome.finished)
        .bind(outcome.size)
        .bind(outcome.current)
        .bind(outcome.progress)
        .bind(&outcome.error)
        .bind(Utc::now())
        .bind(&outcome.id)
        .execute(&self.pool)
        .await?;

        debug!("Finished download record: {} ({})", outcome.id, outcome.status);
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE downloads SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        debug!("Deleted download record: {}", id);
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, limit: i64) -> Result<Vec<DownloadRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM downloads WHERE deleted_at IS NULL ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_into_download_record).collect()
    }
}

/// Convert database row to download record
fn row_into_download_record(row: sqlx::sqlite::SqliteRow) -> Result<DownloadRecord> {
    Ok(DownloadRecord {
        id: row.try_get("id")?,
        status: row.try_get("status")?,
        source: row.try_get("source")?,
        site: row.try_get("site")?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        quality: row.try_get("quality")?,
        format: row.try_get("format")?,
        total: row.try_get("total")?,
        finished: row.try_get("finished")?,
        size: row.try_get("size")?,
        current: row.try_get("current")?,
        progress: row.try_get("progress")?,
        saved_path: row.try_get("saved_path")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema::initialize_database;
    use chrono::Duration;
    use tempfile::TempDir;

    async fn manager(dir: &TempDir) -> DatabaseManager {
        let pool = initialize_database(&dir.path().join("test.db")).await.unwrap();
        DatabaseManager::new(pool)
    }

    fn record(id: &str) -> DownloadRecord {
        let now = Utc::now();
        DownloadRecord {
            id: id.to_string(),
            status: "downloading".to_string(),
            source: "youtube".to_string(),
            site: "YouTube".to_string(),
            url: "https://example.com/v".to_string(),
            title: "Demo".to_string(),
            quality: "1080p".to_string(),
            format: "mp4".to_string(),
            total: 2,
            finished: 0,
            size: 300,
            current: 0,
            progress: 0.0,
            saved_path: "/tmp/youtube".to_string(),
            error: String::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn test_begin_and_get() {
        let dir = TempDir::new().unwrap();
        let db = manager(&dir).await;

        db.begin(&record("a")).await.unwrap();
        let saved = db.get("a").await.unwrap().expect("record should exist");
        assert_eq!(saved.title, "Demo");
        assert_eq!(saved.total, 2);
        assert!(saved.deleted_at.is_none());

        assert!(db.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_finish_updates_terminal_fields() {
        let dir = TempDir::new().unwrap();
        let db = manager(&dir).await;
        db.begin(&record("a")).await.unwrap();

        let updated = db
            .finish(&TaskOutcome {
                id: "a".to_string(),
                status: "allSuccess".to_string(),
                total: 2,
                finished: 2,
                size: 300,
                current: 300,
                progress: 100.0,
                error: String::new(),
            })
            .await
            .unwrap();
        assert!(updated);

        let saved = db.get("a").await.unwrap().unwrap();
        assert_eq!(saved.status, "allSuccess");
        assert_eq!(saved.finished, 2);
        assert_eq!(saved.progress, 100.0);
    }

    #[tokio::test]
    async fn test_soft_delete_then_recreate() {
        let dir = TempDir::new().unwrap();
        let db = manager(&dir).await;
        db.begin(&record("a")).await.unwrap();

        assert!(db.delete("a").await.unwrap());
        assert!(db.get("a").await.unwrap().is_none(), "deleted row is hidden");
        assert!(db.get_with_deleted("a").await.unwrap().unwrap().deleted_at.is_some());
        assert!(!db.delete("a").await.unwrap(), "second delete matches nothing");

        db.begin(&record("a")).await.unwrap();
        let revived = db.get("a").await.unwrap().expect("record recreated");
        assert!(revived.deleted_at.is_none());
        assert_eq!(revived.status, "downloading");
    }

    #[tokio::test]
    async fn test_list_newest_first_with_limit() {
        let dir = TempDir::new().unwrap();
        let db = manager(&dir).await;

        let base = Utc::now();
        for (i, id) in ["old", "mid", "new"].iter().enumerate() {
            let mut r = record(id);
            r.created_at = base + Duration::seconds(i as i64);
            db.begin(&r).await.unwrap();
        }
        db.delete("mid").await.unwrap();

        let listed = db.list(DEFAULT_LIST_LIMIT).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);

        assert_eq!(db.list(1).await.unwrap().len(), 1);
    }
}
