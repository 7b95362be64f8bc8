use std::sync::Arc;

use tokio::sync::mpsc::Receiver;
use tokio::sync::Semaphore;

use crate::tasks::{JobAnnouncement, JobQueue};
use crate::types::{JobId, TaskKind};
use crate::{AppConfig, Result};

use super::task_handlers::{self, ExportPostsArgs, JobContext};
use super::ExecutorDeps;

pub async fn start_work_queue(
    app_config: Arc<AppConfig>,
    deps: ExecutorDeps,
    mut receiver: Receiver<super::QueueEvent>,
    job_ids_in_queue: Arc<scc::HashSet<JobId>>,
) {
    tracing::debug!("Started in memory work queue!");

    let max_concurrent_jobs = app_config.queue.max_concurrent_jobs.max(1);
    let max_executing_jobs = Arc::new(Semaphore::new(max_concurrent_jobs));

    loop {
        if let Some(queue_event) = receiver.recv().await {
            match queue_event {
                super::QueueEvent::Job(job) => {
                    let deps = deps.clone();
                    let max_executing_jobs = max_executing_jobs.clone();
                    let job_ids_in_queue = job_ids_in_queue.clone();
                    tokio::spawn(async move {
                        execute_job_from_queue(deps, job, max_executing_jobs, job_ids_in_queue)
                            .await;
                    });
                }
                super::QueueEvent::Stop => {
                    tracing::info!("Work queue loop got a Stop event, breaking out of loop!");
                    break;
                }
            }
        } else {
            tracing::info!(
                "Work queue loop got a None from receiver.recv(), breaking out of loop!"
            );
            break;
        }
    }

    // holding every permit means no job is still running
    if let Ok(permits) = u32::try_from(max_concurrent_jobs) {
        let _ = max_executing_jobs.acquire_many(permits).await;
    }
}

#[tracing::instrument(skip_all,fields(job_id=%job.id))]
async fn execute_job_from_queue(
    deps: ExecutorDeps,
    job: JobAnnouncement,
    max_executing_jobs: Arc<Semaphore>,
    job_ids_in_queue: Arc<scc::HashSet<JobId>>,
) {
    let job_id = job.id.clone();
    match max_executing_jobs.acquire().await {
        Ok(_execution_permit) => execute_job_once(&deps, job).await,
        Err(err) => tracing::error!("execution semaphore closed, dropping job! err: {err}"),
    }
    job_ids_in_queue.remove_async(&job_id).await;
}

/// this function holds the logic guaranteeing that a job is only executed once,
/// even with several worker processes consuming the same queue
async fn execute_job_once(deps: &ExecutorDeps, job: JobAnnouncement) {
    let result = match deps.queue.claim(&job.id).await {
        Ok(result) => result,
        Err(err) => {
            tracing::error!("Unable to claim job, err: {err}");
            return;
        }
    };

    if result.rows_affected() == 0 {
        // this means that status != 'queued'
        // so we assume a different worker got this job (or it was evicted)
        tracing::debug!("job already claimed, skipping");
    } else {
        // the claim filters on the primary key, so this is exactly 1 row
        execute_job(deps, job).await;
    }
}

async fn execute_job(deps: &ExecutorDeps, job: JobAnnouncement) {
    let ctx = JobContext::new(
        job.id.clone(),
        Arc::new(deps.queue.clone()),
        Arc::new(deps.db_client.clone()),
        Arc::new(deps.db_client.clone()),
    );

    let job_result = run_task(deps, &ctx, &job).await;

    // a job that ended, in any way, is complete as far as its owner is concerned
    if let Err(err) = ctx.set_progress(100).await {
        tracing::error!("Unable to set final progress, err: {err}");
    }

    match job_result {
        Ok(_) => deps.queue.mark_finished(&job.id).await.unwrap_or_else(|e| {
            tracing::error!("Unable to mark job as finished!, err: {e}");
        }),
        Err(err) => {
            tracing::error!(
                "Error while executing job id {} err: {}, marking job as failed!",
                job.id,
                err
            );
            deps.queue
                .mark_failed(&job.id, &err.to_string())
                .await
                .unwrap_or_else(|e| {
                    tracing::error!("Unable to mark job as failed!, err: {e}");
                });
        }
    }
}

async fn run_task(deps: &ExecutorDeps, ctx: &JobContext, job: &JobAnnouncement) -> Result<()> {
    // the args live in the jobs table, the notification only carries the id
    let Some(handle) = deps.queue.fetch(&job.id).await? else {
        tracing::warn!("job vanished before it could run");
        return Ok(());
    };
    match TaskKind::try_from(handle.task_name.as_str())? {
        TaskKind::ExportPosts => {
            let args: ExportPostsArgs = serde_json::from_value(handle.args)?;
            task_handlers::export_posts(ctx, &deps.db_client, args, &deps.export_dir).await?;
        }
    }
    Ok(())
}
