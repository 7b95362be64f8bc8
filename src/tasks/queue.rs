use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::JobId;
use crate::Result;

#[derive(Debug, Deserialize, Serialize, sqlx::Type, PartialEq, Eq, Clone, Copy)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// when a job is enqueued and persisted in the db
    Queued,
    /// when a worker claims the job
    Started,
    /// when the job function returned successfully
    Finished,
    /// the job function returned an error, it may have partially run
    Failed,
}

/// metadata the running job publishes for pollers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct JobMeta {
    /// 0 to 100
    #[serde(default)]
    pub progress: u8,
}

/// a job as the queue currently knows it
#[derive(Debug, Clone, PartialEq)]
pub struct JobHandle {
    pub id: JobId,
    pub task_name: String,
    pub args: serde_json::Value,
    pub status: JobStatus,
    pub meta: JobMeta,
    pub enqueued_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// a job the queue assigned an id to, not written anywhere yet
///
/// it is staged in the caller's transaction (see `crate::store::StageTask`)
/// so the job and its task record become visible together
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub id: JobId,
    pub queue: String,
    /// listen/notify channel announcing the job on commit, if the queue has one
    pub channel: Option<String>,
    pub task_name: String,
    pub args: serde_json::Value,
}

/// the job queue, as seen from the request path
///
/// jobs are ephemeral: once they end they are evicted after a while, and
/// `fetch` returns `None` from then on
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// assigns the job its id. nothing is queued until the job is staged and committed
    fn new_job(&self, task_name: &str, args: serde_json::Value) -> Result<NewJob>;
    async fn fetch(&self, id: &JobId) -> Result<Option<JobHandle>>;
    async fn save_meta(&self, id: &JobId, meta: &JobMeta) -> Result<()>;
}
