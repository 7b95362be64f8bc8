pub mod api;
mod server;

use std::sync::Arc;

use axum::extract::FromRequestParts;
use http::request::Parts;

pub use server::start_server;

use crate::context::Ctx;
use crate::search::IndexSync;
use crate::tasks::TaskHandle;
use crate::types::UserId;

/// header the auth proxy in front of us sets to the id of the signed in user
pub const ACTOR_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    /// this comes from AppConfig.posts_per_page
    posts_per_page: i64,

    db_client: crate::db::DbClient,
    index_sync: Arc<IndexSync>,
    tasks: TaskHandle,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for Ctx {
    type Rejection = crate::Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> crate::Result<Self> {
        let actor = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<i64>().ok())
            .ok_or(crate::Error::MissingActor)?;
        Ok(Ctx {
            actor: UserId(actor),
            posts_per_page: state.posts_per_page,
        })
    }
}
