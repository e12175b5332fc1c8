//! Persistent job ledger using SQLite.
//!
//! Two tables:
//! - `images`: one row per downloaded asset id (the dedup source of truth)
//! - `failed`: append-only log of failed attempts
//!
//! A failure row never blocks a retry; only an `images` row does.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::info;
use url::Url;

use super::JobLedger;
use crate::utils::UNKNOWN_ASSET_ID;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS images (
    id TEXT PRIMARY KEY,
    src_url TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS failed (
    src_url TEXT NOT NULL,
    id TEXT NOT NULL,
    err_msg TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_failed_id ON failed(id);
"#;

/// One failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub src_url: String,
    pub id: String,
    pub err_msg: String,
}

/// SQLite-backed [`JobLedger`], in WAL mode so workers can read while one writes
#[derive(Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteLedger {
    /// Open the ledger at `path`, creating the file and schema if needed
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create ledger directory")?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open SQLite ledger {}", path.display()))?;

        sqlx::query(SCHEMA_SQL)
            .execute(&pool)
            .await
            .context("Failed to initialize ledger schema")?;

        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of downloaded assets
    pub async fn downloaded_count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM images")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count downloaded images")?;
        Ok(row.0)
    }

    /// Number of failed attempts across all assets
    pub async fn failure_count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM failed")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count failures")?;
        Ok(row.0)
    }

    /// Every failed attempt recorded for `asset_id`, oldest first
    pub async fn failures_for(&self, asset_id: &str) -> Result<Vec<FailureRecord>> {
        let rows: Vec<(String, String, String)> =
            sqlx::query_as("SELECT src_url, id, err_msg FROM failed WHERE id = ? ORDER BY rowid")
                .bind(asset_id)
                .fetch_all(&self.pool)
                .await
                .context("Failed to query failures")?;

        Ok(rows
            .into_iter()
            .map(|(src_url, id, err_msg)| FailureRecord {
                src_url,
                id,
                err_msg,
            })
            .collect())
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Close the ledger and delete its database files
    pub async fn wipe(self) -> Result<()> {
        self.close().await;
        tokio::fs::remove_file(&self.path)
            .await
            .with_context(|| format!("Failed to wipe ledger {}", self.path.display()))?;
        for suffix in ["-wal", "-shm"] {
            let mut sidecar = self.path.clone().into_os_string();
            sidecar.push(suffix);
            // WAL sidecars are usually gone after a clean close.
            let _ = tokio::fs::remove_file(PathBuf::from(sidecar)).await;
        }
        info!(path = %self.path.display(), "Wiped ledger");
        Ok(())
    }
}

#[async_trait]
impl JobLedger for SqliteLedger {
    async fn has_downloaded(&self, asset_id: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM images WHERE id = ?")
            .bind(asset_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to check image")?;
        Ok(row.is_some())
    }

    async fn mark_downloaded(&self, asset_id: &str, locator: &Url) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO images (id, src_url) VALUES (?, ?)")
            .bind(asset_id)
            .bind(locator.as_str())
            .execute(&self.pool)
            .await
            .context("Failed to mark image downloaded")?;
        Ok(())
    }

    async fn mark_failed(&self, asset_id: &str, locator: &str, reason: &str) -> Result<()> {
        let id = if asset_id.is_empty() {
            UNKNOWN_ASSET_ID
        } else {
            asset_id
        };
        sqlx::query("INSERT INTO failed (src_url, id, err_msg) VALUES (?, ?, ?)")
            .bind(locator)
            .bind(id)
            .bind(reason)
            .execute(&self.pool)
            .await
            .context("Failed to mark image failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_downloaded_is_recorded_once() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let ledger = SqliteLedger::open(&temp_dir.path().join("state.db")).await?;

        assert!(!ledger.has_downloaded("abc").await?);
        ledger
            .mark_downloaded("abc", &url("https://pbs.twimg.com/media/abc?format=jpg"))
            .await?;
        ledger
            .mark_downloaded("abc", &url("https://pbs.twimg.com/media/abc?format=png"))
            .await?;

        assert!(ledger.has_downloaded("abc").await?);
        assert_eq!(ledger.downloaded_count().await?, 1);

        ledger.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_failures_accumulate_and_do_not_block() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let ledger = SqliteLedger::open(&temp_dir.path().join("state.db")).await?;

        let src = "https://pbs.twimg.com/media/xyz?format=jpg";
        ledger.mark_failed("xyz", src, "download failed: timeout").await?;
        ledger.mark_failed("xyz", src, "download failed: 503").await?;
        assert!(!ledger.has_downloaded("xyz").await?);

        let failures = ledger.failures_for("xyz").await?;
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].err_msg, "download failed: timeout");

        ledger.mark_failed("", "not a url", "parse url: no path").await?;
        assert_eq!(ledger.failures_for("unknown").await?.len(), 1);
        assert_eq!(ledger.failure_count().await?, 3);

        ledger.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_reopen_keeps_state_and_wipe_removes_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("nested/state.db");

        let ledger = SqliteLedger::open(&path).await?;
        ledger
            .mark_downloaded("abc", &url("https://pbs.twimg.com/media/abc"))
            .await?;
        ledger.close().await;

        let reopened = SqliteLedger::open(&path).await?;
        assert!(reopened.has_downloaded("abc").await?);
        reopened.wipe().await?;
        assert!(!path.exists());
        Ok(())
    }
}
