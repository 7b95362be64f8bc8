//! In-memory job queue for unit tests. Nothing consumes it; tests drive the
//! job lifecycle by hand. Jobs show up once the `MemoryUnit` staging them commits.

use async_trait::async_trait;
use chrono::Utc;

use super::{JobHandle, JobMeta, JobQueue, JobStatus, NewJob};
use crate::types::JobId;
use crate::Result;

#[derive(Default)]
pub struct MemoryJobQueue {
    jobs: scc::HashMap<JobId, JobHandle>,
}

impl MemoryJobQueue {
    /// makes a staged job visible, what a commit does for the postgres queue
    pub fn accept(&self, job: NewJob) {
        let handle = JobHandle {
            id: job.id.clone(),
            task_name: job.task_name,
            args: job.args,
            status: JobStatus::Queued,
            meta: JobMeta::default(),
            enqueued_at: Utc::now(),
            ended_at: None,
        };
        let _ = self.jobs.insert(job.id, handle);
    }

    /// simulates the queue dropping the job (ttl expired, redis flushed...)
    pub async fn evict(&self, id: &JobId) {
        let _ = self.jobs.remove_async(id).await;
    }

    pub async fn status(&self, id: &JobId) -> Option<JobStatus> {
        self.jobs.read_async(id, |_, job| job.status).await
    }

    pub async fn set_status(&self, id: &JobId, status: JobStatus) {
        self.jobs
            .update_async(id, |_, job| {
                job.status = status;
                if matches!(status, JobStatus::Finished | JobStatus::Failed) {
                    job.ended_at = Some(Utc::now());
                }
            })
            .await;
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    fn new_job(&self, task_name: &str, args: serde_json::Value) -> Result<NewJob> {
        Ok(NewJob {
            id: JobId(uuid::Uuid::new_v4().to_string()),
            queue: "memory".to_string(),
            channel: None,
            task_name: task_name.to_string(),
            args,
        })
    }

    async fn fetch(&self, id: &JobId) -> Result<Option<JobHandle>> {
        Ok(self.jobs.read_async(id, |_, job| job.clone()).await)
    }

    async fn save_meta(&self, id: &JobId, meta: &JobMeta) -> Result<()> {
        self.jobs
            .update_async(id, |_, job| job.meta = *meta)
            .await;
        Ok(())
    }
}
