use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgQueryResult;
use sqlx::types::Json;

use super::{JobHandle, JobMeta, JobQueue, JobStatus, NewJob};
use crate::config::QueueConfig;
use crate::db::DbClient;
use crate::types::JobId;
use crate::Result;

/// the body of a `new_job` notification, see task_executor/notification_handler.rs
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct JobAnnouncement {
    pub id: JobId,
    pub task_name: String,
}

impl JobAnnouncement {
    /// `new_job <json>`, parsed back by task_executor/notification_handler.rs
    pub fn notification_body(&self) -> Result<String> {
        Ok(format!("new_job {}", serde_json::to_string(self)?))
    }
}

/// job queue kept in the `jobs` table, announced over postgres listen/notify
#[derive(Clone)]
pub struct PgJobQueue {
    db_client: DbClient,
    queue_name: String,
    channel_name: String,
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: JobId,
    task_name: String,
    args: Json<serde_json::Value>,
    status: JobStatus,
    meta: Json<JobMeta>,
    enqueued_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl From<JobRow> for JobHandle {
    fn from(row: JobRow) -> Self {
        Self {
            id: row.id,
            task_name: row.task_name,
            args: row.args.0,
            status: row.status,
            meta: row.meta.0,
            enqueued_at: row.enqueued_at,
            ended_at: row.ended_at,
        }
    }
}

const SELECT_JOB: &str =
    r#"select id, task_name, args, status, meta, enqueued_at, ended_at from jobs"#;

impl PgJobQueue {
    pub fn new(db_client: DbClient, config: &QueueConfig) -> Self {
        Self {
            db_client,
            queue_name: config.name.clone(),
            channel_name: config.channel_name.clone(),
        }
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// queued jobs, oldest first. used by the sweeper in case a notification got lost
    pub async fn fetch_queued(&self, limit: i64) -> Result<Vec<JobHandle>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "{SELECT_JOB} where queue = $1 and status = 'queued' order by enqueued_at asc limit $2"
        ))
        .bind(&self.queue_name)
        .bind(limit)
        .fetch_all(self.db_client.pool_ref())
        .await?;
        Ok(rows.into_iter().map(JobHandle::from).collect())
    }

    /// a worker calls this right before running a job
    ///
    /// the update only matches while status = 'queued'. under read committed a
    /// second worker racing on the same row waits for the first to commit,
    /// re-evaluates the filter, and updates nothing. so rows_affected = 1 means
    /// this worker owns the job
    pub async fn claim(&self, id: &JobId) -> Result<PgQueryResult> {
        let result = sqlx::query(
            r#"update jobs set
            status = 'started',
            started_at = current_timestamp
            where id = $1
            and status = 'queued'"#,
        )
        .bind(id)
        .execute(self.db_client.pool_ref())
        .await?;
        Ok(result)
    }

    pub async fn mark_finished(&self, id: &JobId) -> Result<()> {
        sqlx::query(
            "update jobs set status = 'finished', ended_at = current_timestamp where id = $1",
        )
        .bind(id)
        .execute(self.db_client.pool_ref())
        .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: &JobId, error: &str) -> Result<()> {
        sqlx::query(
            r#"update jobs set
            status = 'failed',
            error = $2,
            ended_at = current_timestamp
            where id = $1"#,
        )
        .bind(id)
        .bind(error)
        .execute(self.db_client.pool_ref())
        .await?;
        Ok(())
    }

    /// drops ended jobs older than `result_ttl` seconds. pollers see these as done
    pub async fn evict_ended_jobs(&self, result_ttl: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"delete from jobs
            where queue = $1
            and ended_at is not null
            and ended_at < current_timestamp - make_interval(secs => $2)"#,
        )
        .bind(&self.queue_name)
        .bind(result_ttl as f64)
        .execute(self.db_client.pool_ref())
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    fn new_job(&self, task_name: &str, args: serde_json::Value) -> Result<NewJob> {
        Ok(NewJob {
            id: JobId(uuid::Uuid::new_v4().to_string()),
            queue: self.queue_name.clone(),
            channel: Some(self.channel_name.clone()),
            task_name: task_name.to_string(),
            args,
        })
    }

    async fn fetch(&self, id: &JobId) -> Result<Option<JobHandle>> {
        let row = sqlx::query_as::<_, JobRow>(&format!("{SELECT_JOB} where id = $1"))
            .bind(id)
            .fetch_optional(self.db_client.pool_ref())
            .await?;
        Ok(row.map(JobHandle::from))
    }

    async fn save_meta(&self, id: &JobId, meta: &JobMeta) -> Result<()> {
        sqlx::query("update jobs set meta = $2 where id = $1")
            .bind(id)
            .bind(Json(meta))
            .execute(self.db_client.pool_ref())
            .await?;
        Ok(())
    }
}
