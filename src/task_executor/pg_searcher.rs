use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc::Sender;

use crate::tasks::{JobAnnouncement, PgJobQueue};
use crate::types::JobId;
use crate::AppConfig;

/// the pg searcher thread accomplishes 2 tasks
///
/// 1) every <look_for_new_jobs_interval> seconds it searches the database for jobs that
///    have status = 'queued' and submits them to the in memory work queue
///    (in ASC order, so the older jobs get started first). this covers notifications
///    that were sent while no worker was listening
///
/// 2) it evicts jobs that ended more than <result_ttl> seconds ago. pollers
///    asking about an evicted job are told it is done
///
/// step 1 also runs once right on startup, to pick up jobs queued while the worker was down
pub async fn start_pg_searcher(
    app_config: Arc<AppConfig>,
    queue: PgJobQueue,
    sender: Sender<super::QueueEvent>,
    job_ids_in_queue: Arc<scc::HashSet<JobId>>,
) {
    tracing::debug!("Starting pg searcher thread");
    let sleep_duration = Duration::from_secs(app_config.queue.look_for_new_jobs_interval);
    loop {
        search_and_submit_queued_jobs(&queue, &sender, &app_config, &job_ids_in_queue).await;
        evict_ended_jobs(&queue, app_config.queue.result_ttl).await;
        tokio::time::sleep(sleep_duration).await;
    }
}

async fn search_and_submit_queued_jobs(
    queue: &PgJobQueue,
    sender: &Sender<super::QueueEvent>,
    app_config: &AppConfig,
    job_ids_in_queue: &scc::HashSet<JobId>,
) {
    let limit = sender.capacity() as i64;
    if limit == 0 {
        tracing::debug!("work queue is full, skipping this sweep");
        return;
    }
    let jobs = match queue.fetch_queued(limit).await {
        Ok(jobs) => jobs,
        Err(err) => {
            tracing::error!(
                "Unable to fetch queued jobs, retrying in {} seconds. err: {err}",
                app_config.queue.look_for_new_jobs_interval
            );
            return;
        }
    };

    for job in jobs {
        if job_ids_in_queue.contains_async(&job.id).await {
            continue;
        }
        // do not block for more than 100 milliseconds
        let result = sender
            .send_timeout(
                super::QueueEvent::Job(JobAnnouncement {
                    id: job.id.clone(),
                    task_name: job.task_name,
                }),
                Duration::from_millis(100),
            )
            .await;
        match result {
            Ok(()) => {
                let _ = job_ids_in_queue.insert_async(job.id).await;
            }
            Err(err) => {
                tracing::warn!(
                    "Unable to submit job id: {} to the work queue, err: {err}",
                    job.id
                );
                break;
            }
        }
    }
}

async fn evict_ended_jobs(queue: &PgJobQueue, result_ttl: i64) {
    match queue.evict_ended_jobs(result_ttl).await {
        Ok(0) => (),
        Ok(evicted) => tracing::debug!("evicted {evicted} ended jobs"),
        Err(err) => tracing::warn!("Unable to evict ended jobs, err: {err}"),
    }
}
