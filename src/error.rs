use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub type Result<T> = std::result::Result<T, Error>;

/// this error will sometimes be returned from the http request handler
/// so we define a IntoResponse impl for it
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("The post with id: {0} was not found in the db")]
    PostNotFound(i64),
    #[error("user {0} is not allowed to modify post {1}")]
    Forbidden(crate::types::UserId, i64),
    #[error("invalid post: {0}")]
    InvalidPost(&'static str),
    #[error("a task named `{0}` is already running for this user")]
    TaskAlreadyRunning(String),
    #[error("unknown task name `{0}`")]
    UnknownTask(String),
    #[error("the job queue is not configured")]
    QueueUnavailable,
    #[error("request is missing a valid `x-user-id` header")]
    MissingActor,
    #[error("search backend error, {0}")]
    IndexBackend(String),
    #[error("Sqlx error, {0}")]
    SqlxError(#[from] sqlx::Error),
    #[error("migration error, {0}")]
    MigrateError(#[from] sqlx::migrate::MigrateError),
    #[error("reqwest error, {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("{0}")]
    SerdeJsonError(#[from] serde_json::Error),
    #[error("io error, {0}")]
    IoError(#[from] std::io::Error),
    #[error("config error, {0}")]
    ConfigError(#[from] config::ConfigError),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // the http error message should not leak information
        match self {
            Error::PostNotFound(_) => (StatusCode::NOT_FOUND, "post not found").into_response(),
            Error::Forbidden(..) => {
                (StatusCode::FORBIDDEN, "you can only modify your own posts").into_response()
            }
            Error::InvalidPost(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            Error::TaskAlreadyRunning(_) => (
                StatusCode::CONFLICT,
                "an export task is currently in progress",
            )
                .into_response(),
            Error::MissingActor => {
                (StatusCode::UNAUTHORIZED, "missing user identity").into_response()
            }
            Error::QueueUnavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, "background tasks are disabled").into_response()
            }
            err @ (Error::UnknownTask(_)
            | Error::IndexBackend(_)
            | Error::SerdeJsonError(_)
            | Error::IoError(_)
            | Error::ConfigError(_)) => {
                tracing::error!("server error: {err}");
                (StatusCode::INTERNAL_SERVER_ERROR, "server error").into_response()
            }
            Self::ReqwestError(err) => {
                tracing::error!("http error: {err}");
                (StatusCode::INTERNAL_SERVER_ERROR, "http error").into_response()
            }
            err @ (Error::SqlxError(_) | Error::MigrateError(_)) => {
                tracing::error!("database error: {err}");
                (StatusCode::INTERNAL_SERVER_ERROR, "database error").into_response()
            }
        }
    }
}
