//! In-memory stand-ins for the postgres repositories, used by unit tests.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use super::{NotificationRepo, PostRepo, RowSource, StageTask, TaskRepo};
use crate::search::{CommitHooks, PendingChanges};
use crate::tasks::memory_queue::MemoryJobQueue;
use crate::tasks::NewJob;
use crate::types::{epoch_seconds, JobId, Notification, Post, TaskRecord, UserId};
use crate::Result;

#[derive(Default)]
pub struct MemoryStore {
    posts: Mutex<Vec<Post>>,
    tasks: Mutex<Vec<TaskRecord>>,
    notifications: Mutex<Vec<Notification>>,
    next_id: AtomicI64,
    row_fetches: AtomicUsize,
}

enum PostWrite {
    Insert(Post),
    Update(i64, String),
    Delete(i64),
}

/// a transaction against `MemoryStore`: writes are buffered until commit
pub struct MemorySession<'a> {
    store: &'a MemoryStore,
    hooks: Arc<CommitHooks>,
    pending: PendingChanges,
    writes: Vec<PostWrite>,
}

/// a transaction that only stages jobs and task records
pub struct MemoryUnit<'a> {
    store: &'a MemoryStore,
    queue: &'a MemoryJobQueue,
    jobs: Vec<NewJob>,
    staged: Vec<TaskRecord>,
}

impl MemoryStore {
    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn session(&self, hooks: Arc<CommitHooks>) -> MemorySession<'_> {
        MemorySession {
            store: self,
            hooks,
            pending: PendingChanges::default(),
            writes: Vec::new(),
        }
    }

    pub fn unit<'a>(&'a self, queue: &'a MemoryJobQueue) -> MemoryUnit<'a> {
        MemoryUnit {
            store: self,
            queue,
            jobs: Vec::new(),
            staged: Vec::new(),
        }
    }

    pub fn all_posts(&self) -> Vec<Post> {
        self.posts.lock().unwrap().clone()
    }

    pub fn add_post(&self, user_id: UserId, body: &str) -> Post {
        let post = new_post(self.next_id(), user_id, body);
        self.posts.lock().unwrap().push(post.clone());
        post
    }

    /// makes the "natural" row order disagree with insertion order
    pub fn reverse_row_order(&self) {
        self.posts.lock().unwrap().reverse();
    }

    /// deletes a row without going through a session, so the index is never told
    pub fn remove_row_behind_the_index(&self, id: i64) {
        self.posts.lock().unwrap().retain(|post| post.id != id);
    }

    pub fn row_fetches(&self) -> usize {
        self.row_fetches.load(Ordering::SeqCst)
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }
}

fn new_post(id: i64, user_id: UserId, body: &str) -> Post {
    Post {
        id,
        body: body.to_string(),
        timestamp: Utc::now(),
        user_id,
        language: None,
    }
}

impl MemorySession<'_> {
    pub fn insert_post(&mut self, user_id: UserId, body: &str) -> Post {
        let post = new_post(self.store.next_id(), user_id, body);
        self.pending.record_insert(&post);
        self.writes.push(PostWrite::Insert(post.clone()));
        post
    }

    pub fn update_post(&mut self, id: i64, body: &str) {
        let mut post = self
            .store
            .posts
            .lock()
            .unwrap()
            .iter()
            .find(|post| post.id == id)
            .cloned()
            .expect("updating a post that does not exist");
        post.body = body.to_string();
        self.pending.record_update(&post);
        self.writes.push(PostWrite::Update(id, body.to_string()));
    }

    pub fn delete_post(&mut self, id: i64) {
        let post = self
            .store
            .posts
            .lock()
            .unwrap()
            .iter()
            .find(|post| post.id == id)
            .cloned()
            .expect("deleting a post that does not exist");
        self.pending.record_delete(&post);
        self.writes.push(PostWrite::Delete(id));
    }

    pub fn rollback(self) {}

    pub async fn commit(self) -> Result<()> {
        let MemorySession {
            store,
            hooks,
            pending,
            writes,
        } = self;
        hooks
            .run_commit(pending, async move {
                let mut posts = store.posts.lock().unwrap();
                for write in writes {
                    match write {
                        PostWrite::Insert(post) => posts.push(post),
                        PostWrite::Update(id, body) => {
                            if let Some(post) = posts.iter_mut().find(|post| post.id == id) {
                                post.body = body;
                            }
                        }
                        PostWrite::Delete(id) => posts.retain(|post| post.id != id),
                    }
                }
                Ok(())
            })
            .await
    }

    /// behaves like a commit the database refused
    pub async fn commit_failing(self) -> Result<()> {
        self.hooks
            .run_commit(self.pending, async {
                Err(crate::Error::IndexBackend("could not serialize access".to_string()))
            })
            .await
    }
}

fn runs_same_task(a: &TaskRecord, b: &TaskRecord) -> bool {
    !a.complete && !b.complete && a.user_id == b.user_id && a.name == b.name
}

impl MemoryUnit<'_> {
    /// applies everything or nothing, like the postgres transaction guarded
    /// by `tasks_single_flight_idx`
    pub fn commit(self) -> Result<()> {
        let mut tasks = self.store.tasks.lock().unwrap();
        if let Some(record) = self
            .staged
            .iter()
            .find(|record| tasks.iter().any(|task| runs_same_task(task, record)))
        {
            return Err(crate::Error::TaskAlreadyRunning(record.name.clone()));
        }
        tasks.extend(self.staged);
        for job in self.jobs {
            self.queue.accept(job);
        }
        Ok(())
    }
}

#[async_trait]
impl StageTask for MemoryUnit<'_> {
    async fn stage_job(&mut self, job: &NewJob) -> Result<()> {
        self.jobs.push(job.clone());
        Ok(())
    }

    async fn stage_task(&mut self, record: &TaskRecord) -> Result<()> {
        let committed = self.store.tasks.lock().unwrap().clone();
        if committed
            .iter()
            .chain(&self.staged)
            .any(|task| runs_same_task(task, record))
        {
            return Err(crate::Error::TaskAlreadyRunning(record.name.clone()));
        }
        self.staged.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl RowSource<Post> for MemoryStore {
    async fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<Post>> {
        self.row_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .posts
            .lock()
            .unwrap()
            .iter()
            .filter(|post| ids.contains(&post.id))
            .cloned()
            .collect())
    }

    async fn fetch_all(&self) -> Result<Vec<Post>> {
        self.row_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.all_posts())
    }
}

#[async_trait]
impl PostRepo for MemoryStore {
    async fn posts_by_author(&self, author: UserId) -> Result<Vec<Post>> {
        let mut posts: Vec<Post> = self
            .all_posts()
            .into_iter()
            .filter(|post| post.user_id == author)
            .collect();
        posts.sort_by_key(|post| (post.timestamp, post.id));
        Ok(posts)
    }
}

#[async_trait]
impl TaskRepo for MemoryStore {
    async fn get_task(&self, id: &JobId) -> Result<Option<TaskRecord>> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .find(|task| &task.id == id)
            .cloned())
    }

    async fn latest_incomplete(&self, owner: UserId, name: &str) -> Result<Option<TaskRecord>> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|task| task.user_id == owner && task.name == name && !task.complete)
            .cloned())
    }

    async fn incomplete_tasks(&self, owner: UserId) -> Result<Vec<TaskRecord>> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|task| task.user_id == owner && !task.complete)
            .cloned()
            .collect())
    }

    async fn mark_complete(&self, id: &JobId) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.iter_mut().find(|task| &task.id == id) {
            task.complete = true;
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationRepo for MemoryStore {
    async fn add_notification(
        &self,
        user: UserId,
        name: &str,
        payload: &serde_json::Value,
    ) -> Result<Notification> {
        let notification = Notification {
            id: self.next_id(),
            name: name.to_string(),
            user_id: user,
            timestamp: epoch_seconds(Utc::now()),
            payload_json: serde_json::to_string(payload)?,
        };
        let mut notifications = self.notifications.lock().unwrap();
        notifications.retain(|n| !(n.user_id == user && n.name == name));
        notifications.push(notification.clone());
        Ok(notification)
    }

    async fn notifications_since(&self, user: UserId, since: f64) -> Result<Vec<Notification>> {
        Ok(self
            .notifications
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.user_id == user && n.timestamp > since)
            .cloned()
            .collect())
    }
}
