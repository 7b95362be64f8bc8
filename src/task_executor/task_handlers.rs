use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::schema::exported_projection;
use crate::store::{NotificationRepo, PostRepo, TaskRepo};
use crate::tasks::{JobMeta, JobQueue};
use crate::types::{JobId, UserId};
use crate::Result;

/// name of the notification a user polls to follow their tasks
pub const TASK_PROGRESS: &str = "task_progress";

/// handle a running job uses to report back
///
/// progress goes to the job's meta in the queue and to the owner's
/// `task_progress` notification. reaching 100 completes the TaskRecord
pub struct JobContext {
    pub job_id: JobId,
    queue: Arc<dyn JobQueue>,
    tasks: Arc<dyn TaskRepo>,
    notifications: Arc<dyn NotificationRepo>,
}

impl JobContext {
    pub fn new(
        job_id: JobId,
        queue: Arc<dyn JobQueue>,
        tasks: Arc<dyn TaskRepo>,
        notifications: Arc<dyn NotificationRepo>,
    ) -> Self {
        Self {
            job_id,
            queue,
            tasks,
            notifications,
        }
    }

    pub async fn set_progress(&self, progress: u8) -> Result<()> {
        let progress = progress.min(100);
        self.queue
            .save_meta(&self.job_id, &JobMeta { progress })
            .await?;

        let Some(task) = self.tasks.get_task(&self.job_id).await? else {
            // jobs and records commit together, so the record was removed since
            tracing::warn!("no task record for job id: {}", self.job_id);
            return Ok(());
        };
        self.notifications
            .add_notification(
                task.user_id,
                TASK_PROGRESS,
                &serde_json::json!({"task_id": task.id, "progress": progress}),
            )
            .await?;
        if progress >= 100 {
            self.tasks.mark_complete(&task.id).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct ExportPostsArgs {
    pub user_id: UserId,
}

/// writes every post of the user to `<export_dir>/posts-<user_id>-<job_id>.json`
///
/// progress is reported before each post, so it only reaches 100 once the file is written
#[tracing::instrument(skip_all, fields(job_id = %ctx.job_id, user_id = %args.user_id))]
pub async fn export_posts(
    ctx: &JobContext,
    posts: &dyn PostRepo,
    args: ExportPostsArgs,
    export_dir: &Path,
) -> Result<PathBuf> {
    ctx.set_progress(0).await?;
    let posts = posts.posts_by_author(args.user_id).await?;
    let total = posts.len();

    let mut data = Vec::with_capacity(total);
    let mut reported = 0u8;
    for (i, post) in posts.iter().enumerate() {
        let progress = (100 * i / total) as u8;
        if progress != reported {
            ctx.set_progress(progress).await?;
            reported = progress;
        }
        data.push(serde_json::Value::Object(exported_projection(post)));
    }

    tokio::fs::create_dir_all(export_dir).await?;
    let path = export_dir.join(format!("posts-{}-{}.json", args.user_id, ctx.job_id));
    let body = serde_json::to_vec_pretty(&serde_json::json!({ "posts": data }))?;
    tokio::fs::write(&path, body).await?;
    tracing::info!("exported {total} posts to {}", path.display());

    ctx.set_progress(100).await?;
    Ok(path)
}
