//! Stream job repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{JobStatus, StatusUpdate, StreamJobDbModel};
use crate::database::time::now_ms;
use crate::{Error, Result};

/// Stream job repository trait.
///
/// Every write is a single-row statement keyed by id, so concurrent jobs never
/// contend on each other's records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamJobRepository: Send + Sync {
    async fn get_job(&self, id: &str) -> Result<StreamJobDbModel>;
    async fn list_jobs(&self) -> Result<Vec<StreamJobDbModel>>;
    async fn upsert_job(&self, job: &StreamJobDbModel) -> Result<()>;

    /// `PENDING -> RUNNING`, recording launch timestamps. Returns whether a row changed.
    async fn mark_running(
        &self,
        id: &str,
        started_at: i64,
        expected_end_at: i64,
        remaining_secs: i64,
        log_path: Option<String>,
    ) -> Result<bool>;

    /// Persist a countdown tick. Only applies while the row is still `PENDING`
    /// or `RUNNING`, so a tick can never overwrite a stop that landed first.
    async fn update_remaining(&self, id: &str, remaining_secs: i64) -> Result<bool>;

    /// Apply a transition only if the row is still `PENDING` or `RUNNING`.
    async fn transition_active(&self, id: &str, update: &StatusUpdate) -> Result<bool>;

    /// Apply a transition unconditionally (the supervisor's final write).
    async fn apply_status(&self, id: &str, update: &StatusUpdate) -> Result<bool>;

    /// Reclassify every `PENDING`/`RUNNING` row as `ORPHANED`.
    async fn orphan_active_jobs(&self) -> Result<u64>;

    async fn delete_job(&self, id: &str) -> Result<bool>;
}

/// SQLx implementation of StreamJobRepository.
pub struct SqlxStreamJobRepository {
    pool: SqlitePool,
}

impl SqlxStreamJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StreamJobRepository for SqlxStreamJobRepository {
    async fn get_job(&self, id: &str) -> Result<StreamJobDbModel> {
        sqlx::query_as::<_, StreamJobDbModel>("SELECT * FROM stream_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("StreamJob", id))
    }

    async fn list_jobs(&self) -> Result<Vec<StreamJobDbModel>> {
        let jobs = sqlx::query_as::<_, StreamJobDbModel>(
            "SELECT * FROM stream_jobs ORDER BY created_at DESC, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn upsert_job(&self, job: &StreamJobDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stream_jobs (
                id, title, video_reference, stream_key, destination_url,
                total_duration_secs, status, failure_reason, stop_reason, exit_code,
                remaining_secs, started_at, expected_end_at, log_path,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                video_reference = excluded.video_reference,
                stream_key = excluded.stream_key,
                destination_url = excluded.destination_url,
                total_duration_secs = excluded.total_duration_secs,
                status = excluded.status,
                failure_reason = excluded.failure_reason,
                stop_reason = excluded.stop_reason,
                exit_code = excluded.exit_code,
                remaining_secs = excluded.remaining_secs,
                started_at = excluded.started_at,
                expected_end_at = excluded.expected_end_at,
                log_path = excluded.log_path,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&job.id)
        .bind(&job.title)
        .bind(&job.video_reference)
        .bind(&job.stream_key)
        .bind(&job.destination_url)
        .bind(job.total_duration_secs)
        .bind(&job.status)
        .bind(&job.failure_reason)
        .bind(&job.stop_reason)
        .bind(job.exit_code)
        .bind(job.remaining_secs)
        .bind(job.started_at)
        .bind(job.expected_end_at)
        .bind(&job.log_path)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_running(
        &self,
        id: &str,
        started_at: i64,
        expected_end_at: i64,
        remaining_secs: i64,
        log_path: Option<String>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE stream_jobs SET
                status = ?,
                remaining_secs = ?,
                started_at = ?,
                expected_end_at = ?,
                log_path = ?,
                updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(JobStatus::Running.as_str())
        .bind(remaining_secs)
        .bind(started_at)
        .bind(expected_end_at)
        .bind(log_path)
        .bind(now_ms())
        .bind(id)
        .bind(JobStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_remaining(&self, id: &str, remaining_secs: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE stream_jobs SET status = ?, remaining_secs = ?, updated_at = ?
            WHERE id = ? AND status IN ('PENDING', 'RUNNING')
            "#,
        )
        .bind(JobStatus::Running.as_str())
        .bind(remaining_secs)
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn transition_active(&self, id: &str, update: &StatusUpdate) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE stream_jobs SET
                status = ?,
                remaining_secs = ?,
                failure_reason = ?,
                stop_reason = ?,
                exit_code = ?,
                updated_at = ?
            WHERE id = ? AND status IN ('PENDING', 'RUNNING')
            "#,
        )
        .bind(update.status.as_str())
        .bind(update.remaining_secs)
        .bind(&update.failure_reason)
        .bind(update.stop_reason.map(|r| r.as_str()))
        .bind(update.exit_code)
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn apply_status(&self, id: &str, update: &StatusUpdate) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE stream_jobs SET
                status = ?,
                remaining_secs = ?,
                failure_reason = ?,
                stop_reason = ?,
                exit_code = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(update.status.as_str())
        .bind(update.remaining_secs)
        .bind(&update.failure_reason)
        .bind(update.stop_reason.map(|r| r.as_str()))
        .bind(update.exit_code)
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn orphan_active_jobs(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE stream_jobs SET status = ?, remaining_secs = 0, updated_at = ?
            WHERE status IN ('PENDING', 'RUNNING')
            "#,
        )
        .bind(JobStatus::Orphaned.as_str())
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_job(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM stream_jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
