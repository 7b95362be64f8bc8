use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use crate::search::{CommitHooks, PendingChanges};
use crate::store::{NotificationRepo, PostRepo, RowSource, StageTask, TaskRepo};
use crate::tasks::{JobAnnouncement, NewJob};
use crate::types::{epoch_seconds, JobId, Notification, Post, TaskRecord, UserId};
use crate::{AppConfig, Result};

#[derive(Clone)]
pub struct DbClient {
    pool: PgPool,
    hooks: Arc<CommitHooks>,
}

const POST_COLUMNS: &str = r#"id, body, "timestamp", user_id, language"#;
const TASK_COLUMNS: &str = "id, name, description, user_id, complete";
const NOTIFICATION_COLUMNS: &str = r#"id, name, user_id, "timestamp", payload_json"#;

/// an open transaction plus the log of entity changes made through it
///
/// dropping a session without committing rolls it back, and the change log
/// goes with it
pub struct Session {
    tx: Transaction<'static, Postgres>,
    pending: PendingChanges,
    hooks: Arc<CommitHooks>,
}

impl DbClient {
    pub async fn new(app_config: &AppConfig, hooks: Arc<CommitHooks>) -> Result<Self> {
        // this will wait <acquire_timeout> before resulting in an error
        let pool = app_config.db.get_conn_pool().await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool, hooks })
    }

    /// clone and return the inner pool
    #[inline]
    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    #[inline]
    pub fn pool_ref(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Session> {
        Ok(Session {
            tx: self.pool.begin().await?,
            pending: PendingChanges::default(),
            hooks: self.hooks.clone(),
        })
    }

    pub async fn get_post(&self, id: i64) -> Result<Option<Post>> {
        let post = sqlx::query_as::<_, Post>(&format!(
            "select {POST_COLUMNS} from posts where id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(post)
    }
}

impl Session {
    pub async fn insert_post(
        &mut self,
        author: UserId,
        body: &str,
        language: Option<&str>,
    ) -> Result<Post> {
        let post = sqlx::query_as::<_, Post>(&format!(
            r#"insert into posts (body, user_id, language)
            values ($1, $2, $3) returning {POST_COLUMNS}"#
        ))
        .bind(body)
        .bind(author)
        .bind(language)
        .fetch_one(&mut *self.tx)
        .await?;
        self.pending.record_insert(&post);
        Ok(post)
    }

    /// `None` when the post does not exist or belongs to someone else
    pub async fn update_post(
        &mut self,
        author: UserId,
        id: i64,
        body: &str,
    ) -> Result<Option<Post>> {
        let post = sqlx::query_as::<_, Post>(&format!(
            "update posts set body = $3 where id = $1 and user_id = $2 returning {POST_COLUMNS}"
        ))
        .bind(id)
        .bind(author)
        .bind(body)
        .fetch_optional(&mut *self.tx)
        .await?;
        if let Some(post) = &post {
            self.pending.record_update(post);
        }
        Ok(post)
    }

    /// `None` when the post does not exist or belongs to someone else
    pub async fn delete_post(&mut self, author: UserId, id: i64) -> Result<Option<Post>> {
        let post = sqlx::query_as::<_, Post>(&format!(
            "delete from posts where id = $1 and user_id = $2 returning {POST_COLUMNS}"
        ))
        .bind(id)
        .bind(author)
        .fetch_optional(&mut *self.tx)
        .await?;
        if let Some(post) = &post {
            self.pending.record_delete(post);
        }
        Ok(post)
    }

    /// commits, then pushes the net changes to the registered observers
    pub async fn commit(self) -> Result<()> {
        let Session { tx, pending, hooks } = self;
        hooks
            .run_commit(pending, async move {
                tx.commit().await.map_err(crate::Error::from)
            })
            .await
    }

    pub async fn rollback(self) -> Result<()> {
        tracing::debug!(
            "rolling back, discarding {} pending changes",
            self.pending.len()
        );
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl StageTask for Session {
    async fn stage_job(&mut self, job: &NewJob) -> Result<()> {
        sqlx::query(
            r#"insert into jobs (id, queue, task_name, args, status, meta)
            values ($1, $2, $3, $4, 'queued', '{}'::jsonb)"#,
        )
        .bind(&job.id)
        .bind(&job.queue)
        .bind(&job.task_name)
        .bind(Json(&job.args))
        .execute(&mut *self.tx)
        .await?;

        if let Some(channel) = &job.channel {
            let announcement = JobAnnouncement {
                id: job.id.clone(),
                task_name: job.task_name.clone(),
            };
            // postgres holds the notification back until the transaction commits
            // and drops it on rollback
            sqlx::query("select pg_notify($1, $2)")
                .bind(channel)
                .bind(announcement.notification_body()?)
                .execute(&mut *self.tx)
                .await?;
        }
        Ok(())
    }

    async fn stage_task(&mut self, record: &TaskRecord) -> Result<()> {
        let result = sqlx::query(
            r#"insert into tasks (id, name, description, user_id, complete)
            values ($1, $2, $3, $4, $5)"#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.description)
        .bind(record.user_id)
        .bind(record.complete)
        .execute(&mut *self.tx)
        .await;
        match result {
            Ok(_) => Ok(()),
            // tasks_single_flight_idx: a concurrent request launched the same task first
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                Err(crate::Error::TaskAlreadyRunning(record.name.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl RowSource<Post> for DbClient {
    async fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<Post>> {
        let posts = sqlx::query_as::<_, Post>(&format!(
            "select {POST_COLUMNS} from posts where id = any($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }

    async fn fetch_all(&self) -> Result<Vec<Post>> {
        let posts = sqlx::query_as::<_, Post>(&format!(
            "select {POST_COLUMNS} from posts order by id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }
}

#[async_trait]
impl PostRepo for DbClient {
    async fn posts_by_author(&self, author: UserId) -> Result<Vec<Post>> {
        let posts = sqlx::query_as::<_, Post>(&format!(
            r#"select {POST_COLUMNS} from posts
            where user_id = $1 order by "timestamp" asc, id asc"#
        ))
        .bind(author)
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }
}

#[async_trait]
impl TaskRepo for DbClient {
    async fn get_task(&self, id: &JobId) -> Result<Option<TaskRecord>> {
        let task = sqlx::query_as::<_, TaskRecord>(&format!(
            "select {TASK_COLUMNS} from tasks where id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(task)
    }

    async fn latest_incomplete(&self, owner: UserId, name: &str) -> Result<Option<TaskRecord>> {
        let task = sqlx::query_as::<_, TaskRecord>(&format!(
            r#"select {TASK_COLUMNS} from tasks
            where user_id = $1 and name = $2 and not complete
            order by created_at desc limit 1"#
        ))
        .bind(owner)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(task)
    }

    async fn incomplete_tasks(&self, owner: UserId) -> Result<Vec<TaskRecord>> {
        let tasks = sqlx::query_as::<_, TaskRecord>(&format!(
            r#"select {TASK_COLUMNS} from tasks
            where user_id = $1 and not complete order by created_at asc"#
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }

    async fn mark_complete(&self, id: &JobId) -> Result<()> {
        sqlx::query("update tasks set complete = true where id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationRepo for DbClient {
    async fn add_notification(
        &self,
        user: UserId,
        name: &str,
        payload: &serde_json::Value,
    ) -> Result<Notification> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("delete from notifications where user_id = $1 and name = $2")
            .bind(user)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        let notification = sqlx::query_as::<_, Notification>(&format!(
            r#"insert into notifications (name, user_id, "timestamp", payload_json)
            values ($1, $2, $3, $4) returning {NOTIFICATION_COLUMNS}"#
        ))
        .bind(name)
        .bind(user)
        .bind(epoch_seconds(Utc::now()))
        .bind(serde_json::to_string(payload)?)
        .fetch_one(&mut *tx)
        .await?;

        // make sure to commit!
        tx.commit().await?;
        Ok(notification)
    }

    async fn notifications_since(&self, user: UserId, since: f64) -> Result<Vec<Notification>> {
        let notifications = sqlx::query_as::<_, Notification>(&format!(
            r#"select {NOTIFICATION_COLUMNS} from notifications
            where user_id = $1 and "timestamp" > $2 order by "timestamp" asc"#
        ))
        .bind(user)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(notifications)
    }
}
