use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// identity of the user performing a mutation
/// comes from the auth layer in front of this service, we never mint these
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// opaque job identifier, assigned by the job queue and never by us
///
/// the same value is the primary key of the `tasks` table, so a TaskRecord
/// can always be joined back to the live job in the queue
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct JobId(pub String);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: UserId,
    pub language: Option<String>,
}

/// the kinds of background work a user can launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// dump every post of the owner to a json file
    ExportPosts,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::ExportPosts => "export_posts",
        }
    }
}

impl TryFrom<&str> for TaskKind {
    type Error = crate::Error;
    fn try_from(value: &str) -> crate::Result<Self> {
        match value {
            "export_posts" => Ok(Self::ExportPosts),
            other => Err(crate::Error::UnknownTask(other.to_string())),
        }
    }
}

/// durable handle over a job that lives in the queue
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, sqlx::FromRow)]
pub struct TaskRecord {
    pub id: JobId,
    pub name: String,
    pub description: Option<String>,
    pub user_id: UserId,
    /// only ever flipped to true by the worker running the job
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, sqlx::FromRow)]
pub struct Notification {
    pub id: i64,
    pub name: String,
    pub user_id: UserId,
    /// seconds since the epoch, clients poll with `since=<timestamp>`
    pub timestamp: f64,
    pub payload_json: String,
}

impl Notification {
    pub fn get_data(&self) -> crate::Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.payload_json)?)
    }
}

/// seconds since the epoch with microsecond precision, used for notification timestamps
pub fn epoch_seconds(time: DateTime<Utc>) -> f64 {
    time.timestamp_micros() as f64 / 1_000_000.0
}
