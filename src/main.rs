mod config;
mod context;
mod db;
mod error;
mod http_server;
mod schema;
mod search;
mod store;
mod task_executor;
mod tasks;
mod types;

use std::sync::Arc;

pub use config::AppConfig;
pub use error::{Error, Result};
use tracing_subscriber::EnvFilter;

use crate::search::{CommitHooks, CommitObserver, IndexSync, SearchIndex};
use crate::tasks::{JobQueue, PgJobQueue, TaskHandle};
use crate::types::Post;

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::FromStr)]
enum Command {
    Http,
    Worker,
    Reindex,
}

fn start_tracing_subscriber() {
    let rust_log = std::env::var("RUST_LOG").unwrap_or("info".to_string());
    let env_filter = EnvFilter::new(rust_log);
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

#[tokio::main]
async fn main() {
    start_tracing_subscriber();
    let usage = "please provide either 'http', 'worker' or 'reindex' as the first argument";
    let Some(command) = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse::<Command>().ok())
    else {
        eprintln!("{}", usage);
        std::process::exit(1)
    };

    if let Err(err) = run(command).await {
        tracing::error!("{command:?} exited with an error: {err}");
        std::process::exit(1)
    }
}

async fn run(command: Command) -> Result<()> {
    let app_config = config::load_config()?;

    // backends are resolved once, nothing downstream checks for them again
    let index = SearchIndex::from_config(&app_config.search)?;
    let index_sync = Arc::new(IndexSync::new(index));
    let mut hooks = CommitHooks::default();
    hooks.register::<Post>(index_sync.clone() as Arc<dyn CommitObserver>);

    let db_client = db::DbClient::new(&app_config, Arc::new(hooks)).await?;
    let queue = app_config
        .queue
        .enabled
        .then(|| PgJobQueue::new(db_client.clone(), &app_config.queue));

    match command {
        Command::Http => {
            let tasks = TaskHandle::new(
                queue.map(|queue| Arc::new(queue) as Arc<dyn JobQueue>),
                Arc::new(db_client.clone()),
            );
            http_server::start_server(&app_config, db_client, index_sync, tasks).await
        }
        Command::Worker => {
            let queue = queue.ok_or(Error::QueueUnavailable)?;
            let deps = task_executor::ExecutorDeps {
                db_client,
                queue,
                export_dir: app_config.export_dir.clone(),
            };
            task_executor::start_executor(Arc::new(app_config), deps).await;
            Ok(())
        }
        Command::Reindex => {
            if !index_sync.index().is_enabled() {
                tracing::warn!("search is disabled, nothing to reindex");
                return Ok(());
            }
            let count = index_sync.reindex::<Post, _>(&db_client).await?;
            println!("reindexed {count} posts");
            Ok(())
        }
    }
}
