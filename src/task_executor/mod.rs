mod executor;
mod notification_handler;
mod pg_searcher;
mod task_handlers;
mod work_queue;

use std::path::PathBuf;

// this is the main function for the worker process
pub use executor::start_executor;

// this will be started by executor::start_executor
pub use notification_handler::start_pg_listener;
pub use pg_searcher::start_pg_searcher;
pub use work_queue::start_work_queue;

pub use task_handlers::ExportPostsArgs;

use crate::db::DbClient;
use crate::tasks::{JobAnnouncement, PgJobQueue};

// this will be sent in the mpsc channel
pub enum QueueEvent {
    Job(JobAnnouncement),
    /// forwarded from a `stop` notification, lets in flight jobs finish
    Stop,
}

/// everything a job needs to run, cloned into every spawned job
#[derive(Clone)]
pub struct ExecutorDeps {
    pub db_client: DbClient,
    pub queue: PgJobQueue,
    pub export_dir: PathBuf,
}
