//! Durable task records over an ephemeral job queue.
//!
//! The request path calls `TaskHandle::launch` to stage a job and its
//! `TaskRecord` in one transaction; later requests poll `progress` without holding on to anything
//! but the record. The worker (see `crate::task_executor`) is the only writer
//! of `complete`.

#[cfg(test)]
pub mod memory_queue;
mod pg_queue;
mod queue;

use std::sync::Arc;

pub use pg_queue::{JobAnnouncement, PgJobQueue};
pub use queue::{JobHandle, JobMeta, JobQueue, JobStatus, NewJob};

use crate::store::{StageTask, TaskRepo};
use crate::types::{TaskKind, TaskRecord, UserId};
use crate::Result;

#[derive(Clone)]
pub struct TaskHandle {
    /// `None` when the queue is disabled in the config
    queue: Option<Arc<dyn JobQueue>>,
    tasks: Arc<dyn TaskRepo>,
}

impl TaskHandle {
    pub fn new(queue: Option<Arc<dyn JobQueue>>, tasks: Arc<dyn TaskRepo>) -> Self {
        Self { queue, tasks }
    }

    /// stages the job and its record in `session`
    ///
    /// nothing is queued or durable until the caller commits `session`, so a
    /// worker never sees a job whose record is missing. callers are expected
    /// to check `get_in_progress` first
    #[tracing::instrument(skip_all, fields(owner = %owner, task = kind.as_str()))]
    pub async fn launch<S>(
        &self,
        session: &mut S,
        owner: UserId,
        kind: TaskKind,
        description: &str,
        args: serde_json::Value,
    ) -> Result<TaskRecord>
    where
        S: StageTask + ?Sized,
    {
        let queue = self.queue.as_ref().ok_or(crate::Error::QueueUnavailable)?;
        let job = queue.new_job(kind.as_str(), args)?;
        session.stage_job(&job).await?;
        let record = TaskRecord {
            id: job.id,
            name: kind.as_str().to_string(),
            description: Some(description.to_string()),
            user_id: owner,
            complete: false,
        };
        session.stage_task(&record).await?;
        tracing::debug!("staged task record for job id: {}", record.id);
        Ok(record)
    }

    pub async fn get_in_progress(&self, owner: UserId, name: &str) -> Result<Option<TaskRecord>> {
        self.tasks.latest_incomplete(owner, name).await
    }

    pub async fn tasks_in_progress(&self, owner: UserId) -> Result<Vec<TaskRecord>> {
        self.tasks.incomplete_tasks(owner).await
    }

    /// 0 to 100. a job the queue no longer knows about (or a queue we cannot
    /// reach) counts as done
    pub async fn progress(&self, record: &TaskRecord) -> u8 {
        let Some(queue) = &self.queue else {
            return 100;
        };
        match queue.fetch(&record.id).await {
            Ok(Some(job)) => job.meta.progress.min(100),
            Ok(None) => 100,
            Err(err) => {
                tracing::warn!(
                    "unable to fetch job id: {} from the queue, err: {err}. reporting it as done",
                    record.id
                );
                100
            }
        }
    }
}
