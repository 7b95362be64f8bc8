use std::{sync::Arc, time::Duration};

use sqlx::postgres::PgListener;
use tokio::sync::mpsc::Sender;

use crate::db::DbClient;
use crate::tasks::JobAnnouncement;
use crate::types::JobId;

// for now there are only 2 events
#[derive(Debug, PartialEq, Eq)]
pub enum Notification {
    /// this will be sent when the server gets a SIGTERM
    /// the worker node will break out of if this event it sent
    /// this is a special case since there is no body only a type
    Stop,
    /// a job was just enqueued
    NewJob(JobAnnouncement),
}

/// parse the raw notification text to the Notification enum
impl TryFrom<&str> for Notification {
    type Error = String;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value == "stop" {
            Ok(Self::Stop)
        } else {
            // notification type will be in plain text before the body
            if let Some((notification_type, notification_body)) = value.split_once(' ') {
                match notification_type {
                    "new_job" => match serde_json::from_str(notification_body) {
                        Ok(job) => Ok(Self::NewJob(job)),
                        Err(err) => Err(format!(
                            "Unable to deserialized notification body. err: {err}"
                        )),
                    },
                    _ => Err(format!(
                        "Unexpected notification type: `{notification_type}`"
                    )),
                }
            } else {
                Err("Unable to split notification type from body".to_string())
            }
        }
    }
}

pub async fn start_pg_listener(
    channel_name: String,
    db_client: DbClient,
    sender: Sender<super::QueueEvent>,
    job_ids_in_queue: Arc<scc::HashSet<JobId>>,
) {
    tracing::debug!("Started pg notification listener");

    let mut listener = match PgListener::connect_with(&db_client.pool()).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(
                "Unable to start the pg listener, relying on the sweeper only. err: {err}"
            );
            return;
        }
    };
    tracing::debug!("subscribing to the `{}` postgres channel", &channel_name);
    if let Err(err) = listener.listen(&channel_name).await {
        tracing::error!(
            "Unable to listen on `{channel_name}`, relying on the sweeper only. err: {err}"
        );
        return;
    }

    loop {
        // ask for next notification, re-connecting (transparently) if needed
        let raw_notification = match listener.recv().await {
            Ok(raw_notification) => raw_notification,
            Err(err) => {
                tracing::warn!("Error while receiving a notification: {err}, retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };
        tracing::debug!("Got notification!");

        // this is VERY unlikely to happen, but we will still check
        if raw_notification.channel() != channel_name {
            tracing::warn!(
                "Got notification intended for channel `{}` expected `{}`. ignoring",
                raw_notification.channel(),
                &channel_name
            );
            continue;
        }

        let notification = match Notification::try_from(raw_notification.payload()) {
            Ok(notification) => notification,
            Err(err) => {
                tracing::warn!("Err while parsing notification: {err}, ignoring");
                continue;
            }
        };
        match notification {
            Notification::Stop => {
                tracing::info!("Got stop notification, job executor will stop!");
                if sender.send(super::QueueEvent::Stop).await.is_err() {
                    tracing::warn!("work queue already closed");
                }
                break;
            }
            Notification::NewJob(job) => {
                if job_ids_in_queue.contains_async(&job.id).await {
                    // already in the queue, nothing to do
                    continue;
                } else {
                    submit_job_to_mpsc(job, &sender, &job_ids_in_queue).await;
                }
            }
        }
    }
}

/// If the server shuts down after a job was sent to the in memory queue but before it started,
///     the sweeper will find it again with status='queued' after the restart.
///     the same job can then sit in several servers' in memory queues,
///     the claim in `execute_job_once` still runs it only once
async fn submit_job_to_mpsc(
    job: JobAnnouncement,
    sender: &Sender<super::QueueEvent>,
    job_ids_in_queue: &scc::HashSet<JobId>,
) {
    let job_id = job.id.clone();
    if sender.capacity() >= 1 {
        // this is in the hot path, wait a maximum of 100 milliseconds before giving up on this job
        let result = sender
            .send_timeout(super::QueueEvent::Job(job), Duration::from_millis(100))
            .await;

        if let Err(err) = result {
            match err {
                // the sweeper will pick it up
                tokio::sync::mpsc::error::SendTimeoutError::Timeout(_) => (),
                tokio::sync::mpsc::error::SendTimeoutError::Closed(_) => {
                    tracing::error!("The work queue is closed!!, dropping job id: {job_id}");
                }
            }
        } else {
            // returns error if the key is already in the set
            // this does not bother me
            let _ = job_ids_in_queue.insert_async(job_id).await;
        }
    } else {
        // the channel is full, ignore this job.
        // the sweeper searches the database for queued jobs every <look_for_new_jobs_interval>
        // and submits them oldest first
    }
}
