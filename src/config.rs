use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretBox};
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::Executor;
use sqlx::{postgres::PgConnectOptions, PgPool};

/// name of the optional config file, looked up in the working directory (`microblog.toml`)
const CONFIG_FILE: &str = "microblog";
/// env overrides look like `MICROBLOG__DB__HOST=10.0.0.2`
const ENV_PREFIX: &str = "MICROBLOG";

#[derive(Debug, Deserialize)]
// app config is not clone since the secrecy::SecretBox is not clone* (excluding the number types)
pub struct AppConfig {
    pub listen_port: u16,
    /// page size used by the search endpoint
    pub posts_per_page: i64,
    /// where the export task writes its json files
    pub export_dir: PathBuf,
    pub db: DbConfig,
    pub search: SearchConfig,
    pub queue: QueueConfig,
}

#[derive(Debug, Deserialize)]
pub struct DbConfig {
    acquire_timeout: u32,
    host: String,
    port: u16,
    username: String,
    // don't want to accidentally print this secret
    password: SecretBox<String>,
    database: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    Disabled,
    Elasticsearch,
    /// in process index, lost on restart. handy for local development
    Memory,
}

#[derive(Debug, Deserialize)]
pub struct SearchConfig {
    pub backend: IndexBackend,
    /// when the backend is elasticsearch and this is not set, search is disabled
    pub elasticsearch_url: Option<String>,
    /// in seconds
    pub request_timeout: u64,
}

#[derive(Debug, Deserialize)]
pub struct QueueConfig {
    /// with the queue disabled `launch` fails and `progress` always reports 100
    pub enabled: bool,
    pub name: String,
    /// this is the name of the channel used with postgres listen/notify
    pub channel_name: String,
    /// the interval (in seconds) the sweeper looks for queued jobs whose notification was missed
    pub look_for_new_jobs_interval: u64,
    /// the max number of jobs a single worker process runs at once
    pub max_concurrent_jobs: usize,
    /// ended jobs are evicted from the queue after this many seconds
    pub result_ttl: i64,
}

impl DbConfig {
    pub async fn get_conn_pool(&self) -> Result<PgPool, sqlx::Error> {
        let options = PgConnectOptions::new_without_pgpass()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(self.password.expose_secret())
            .database(&self.database);

        PgPoolOptions::new()
            .acquire_timeout(Duration::from_secs(self.acquire_timeout as u64))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    // this is the default, but the job claim in the worker relies on it
                    // so it is set explicitly
                    conn.execute("SET default_transaction_isolation TO 'read committed'")
                        .await?;
                    Ok(())
                })
            })
            .connect_with(options)
            .await
    }
}

fn builder_with_defaults(
) -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
    config::Config::builder()
        .set_default("listen_port", 3000)?
        .set_default("posts_per_page", 10)?
        .set_default("export_dir", "exports")?
        .set_default("db.acquire_timeout", 10)? // 10 seconds
        .set_default("db.host", "127.0.0.1")?
        .set_default("db.port", 5432)?
        .set_default("db.username", "postgres")?
        .set_default("db.password", "password")?
        .set_default("db.database", "microblog")?
        .set_default("search.backend", "elasticsearch")?
        .set_default("search.request_timeout", 5)?
        .set_default("queue.enabled", true)?
        .set_default("queue.name", "microblog-tasks")?
        .set_default("queue.channel_name", "new_jobs")?
        .set_default("queue.look_for_new_jobs_interval", 30)?
        .set_default("queue.max_concurrent_jobs", 4)?
        .set_default("queue.result_ttl", 500)
}

pub fn load_config() -> crate::Result<AppConfig> {
    let config = builder_with_defaults()?
        .add_source(config::File::with_name(CONFIG_FILE).required(false))
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;
    Ok(config.try_deserialize()?)
}
