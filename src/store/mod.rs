//! Repository seams over the relational store.
//!
//! `crate::db::DbClient` implements all of them against postgres; the
//! in-memory versions in `memory` back the unit tests.

use async_trait::async_trait;

use crate::tasks::NewJob;
use crate::types::{JobId, Notification, Post, TaskRecord, UserId};
use crate::Result;

#[cfg(test)]
pub mod memory;

/// rows of one entity type, fetched by id or in bulk
#[async_trait]
pub trait RowSource<E>: Send + Sync {
    /// no ordering guarantee, callers re-order themselves
    async fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<E>>;
    async fn fetch_all(&self) -> Result<Vec<E>>;
}

#[async_trait]
pub trait PostRepo: RowSource<Post> {
    /// oldest first
    async fn posts_by_author(&self, author: UserId) -> Result<Vec<Post>>;
}

#[async_trait]
pub trait TaskRepo: Send + Sync {
    async fn get_task(&self, id: &JobId) -> Result<Option<TaskRecord>>;
    /// the most recent record that is not complete
    async fn latest_incomplete(&self, owner: UserId, name: &str) -> Result<Option<TaskRecord>>;
    async fn incomplete_tasks(&self, owner: UserId) -> Result<Vec<TaskRecord>>;
    async fn mark_complete(&self, id: &JobId) -> Result<()>;
}

/// writes a job and its task record inside the caller's open transaction
///
/// neither is visible to a worker or a poller before the caller commits
#[async_trait]
pub trait StageTask: Send {
    async fn stage_job(&mut self, job: &NewJob) -> Result<()>;
    /// fails with `TaskAlreadyRunning` when the owner has an incomplete task of the same name
    async fn stage_task(&mut self, record: &TaskRecord) -> Result<()>;
}

#[async_trait]
pub trait NotificationRepo: Send + Sync {
    /// replaces any earlier notification with the same name for this user
    async fn add_notification(
        &self,
        user: UserId,
        name: &str,
        payload: &serde_json::Value,
    ) -> Result<Notification>;
    async fn notifications_since(&self, user: UserId, since: f64) -> Result<Vec<Notification>>;
}
