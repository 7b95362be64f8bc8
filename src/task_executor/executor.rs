use std::sync::Arc;

use scc::HashSet;
use tokio::sync::mpsc;

use crate::types::JobId;
use crate::AppConfig;

use super::ExecutorDeps;

pub async fn start_executor(app_config: Arc<AppConfig>, deps: ExecutorDeps) {
    // the sweeper can fetch this many jobs at once, so the channel holds that many
    let capacity = app_config.queue.max_concurrent_jobs.max(1) * 16;
    // shared between the three loops, scc::HashSet::clone would copy the set
    let job_ids_in_queue = Arc::new(HashSet::<JobId>::with_capacity(capacity));
    let (tx, rx) = mpsc::channel::<super::QueueEvent>(capacity);

    // start work queue first
    let conf = app_config.clone();
    let worker_deps = deps.clone();
    let job_id_set = job_ids_in_queue.clone();
    let work_queue_handel = tokio::spawn(async {
        super::start_work_queue(conf, worker_deps, rx, job_id_set).await;
    });

    let conf = app_config.clone();
    let queue = deps.queue.clone();
    let job_id_set = job_ids_in_queue.clone();
    let sender = tx.clone();
    let pg_searcher_handel = tokio::spawn(async {
        super::start_pg_searcher(conf, queue, sender, job_id_set).await;
    });

    let db = deps.db_client.clone();
    let channel_name = deps.queue.channel_name().to_string();
    let job_id_set = job_ids_in_queue.clone();
    let notification_handel = tokio::spawn(async {
        super::start_pg_listener(channel_name, db, tx, job_id_set).await;
    });

    if let Err(err) = notification_handel.await {
        tracing::error!("notification listener thread panicked! err: {err}");
    }
    tracing::info!("notification listener thread is completed!");
    if let Err(err) = work_queue_handel.await {
        tracing::error!("work queue thread panicked! err: {err}");
    }
    tracing::info!("work queue thread is completed!");
    // the sweeper never returns on its own
    pg_searcher_handel.abort();
    match pg_searcher_handel.await {
        Err(err) if err.is_panic() => tracing::error!("pg searcher thread panicked! err: {err}"),
        _ => tracing::info!("pg searcher thread is completed!"),
    }
}
