use axum::extract::{Json, Path, Query, State};
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::context::Ctx;
use crate::task_executor::ExportPostsArgs;
use crate::types::{Post, TaskKind, TaskRecord};
use crate::Result;

pub const MAX_POST_LENGTH: usize = 140;
pub const MAX_LANGUAGE_LENGTH: usize = 5;

#[derive(Debug, Deserialize)]
pub struct PostBody {
    pub body: String,
    #[serde(default)]
    pub language: Option<String>,
}

impl PostBody {
    /// the trimmed body, once it fits in a post
    fn validated(&self) -> Result<&str> {
        let body = self.body.trim();
        if body.is_empty() {
            return Err(crate::Error::InvalidPost("post body is empty"));
        }
        if body.chars().count() > MAX_POST_LENGTH {
            return Err(crate::Error::InvalidPost(
                "post body is longer than 140 characters",
            ));
        }
        if let Some(language) = &self.language {
            if language.chars().count() > MAX_LANGUAGE_LENGTH {
                return Err(crate::Error::InvalidPost(
                    "language is longer than 5 characters",
                ));
            }
        }
        Ok(body)
    }
}

pub async fn create_post(
    State(app_state): State<AppState>,
    ctx: Ctx,
    Json(post_body): Json<PostBody>,
) -> Result<Response> {
    let body = post_body.validated()?;
    let mut session = app_state.db_client.begin().await?;
    let post = session
        .insert_post(ctx.actor, body, post_body.language.as_deref())
        .await?;
    session.commit().await?;
    tracing::debug!("user {} created post id: {}", ctx.actor, post.id);

    Ok((StatusCode::CREATED, Json::from(post)).into_response())
}

pub async fn edit_post(
    State(app_state): State<AppState>,
    ctx: Ctx,
    Path(post_id): Path<i64>,
    Json(post_body): Json<PostBody>,
) -> Result<Response> {
    let body = post_body.validated()?;
    let mut session = app_state.db_client.begin().await?;
    match session.update_post(ctx.actor, post_id, body).await? {
        Some(post) => {
            session.commit().await?;
            Ok(Json::from(post).into_response())
        }
        None => {
            session.rollback().await?;
            Err(missing_or_forbidden(&app_state, &ctx, post_id).await)
        }
    }
}

pub async fn delete_post(
    State(app_state): State<AppState>,
    ctx: Ctx,
    Path(post_id): Path<i64>,
) -> Result<Response> {
    let mut session = app_state.db_client.begin().await?;
    match session.delete_post(ctx.actor, post_id).await? {
        Some(_) => {
            session.commit().await?;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        None => {
            session.rollback().await?;
            Err(missing_or_forbidden(&app_state, &ctx, post_id).await)
        }
    }
}

/// tells apart a post that does not exist from one owned by another user
async fn missing_or_forbidden(app_state: &AppState, ctx: &Ctx, post_id: i64) -> crate::Error {
    match app_state.db_client.get_post(post_id).await {
        Ok(Some(_)) => crate::Error::Forbidden(ctx.actor, post_id),
        Ok(None) => crate::Error::PostNotFound(post_id),
        Err(err) => err,
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    q: String,
    page: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResults {
    posts: Vec<Post>,
    total: u64,
    next_page: Option<usize>,
    prev_page: Option<usize>,
}

pub async fn search(
    State(app_state): State<AppState>,
    ctx: Ctx,
    Query(params): Query<SearchParams>,
) -> Result<Response> {
    let page = params.page.unwrap_or(1).max(1);
    let page_size = ctx.page_size();
    let (posts, total) = app_state
        .index_sync
        .search::<Post, _>(&app_state.db_client, &params.q, page, page_size)
        .await?;

    let (next_page, prev_page) = page_links(page, page_size, total);
    let results = SearchResults {
        posts,
        total,
        next_page,
        prev_page,
    };
    Ok(Json::from(results).into_response())
}

/// (next, previous) page numbers around a 1-based `page`
fn page_links(page: usize, page_size: usize, total: u64) -> (Option<usize>, Option<usize>) {
    let seen = (page as u64).saturating_mul(page_size as u64);
    let next_page = if seen < total { page.checked_add(1) } else { None };
    let prev_page = page.checked_sub(1).filter(|prev| *prev >= 1);
    (next_page, prev_page)
}

#[derive(Debug, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    task: TaskRecord,
    progress: u8,
}

pub async fn export_posts(State(app_state): State<AppState>, ctx: Ctx) -> Result<Response> {
    let kind = TaskKind::ExportPosts;
    if let Some(running) = app_state
        .tasks
        .get_in_progress(ctx.actor, kind.as_str())
        .await?
    {
        tracing::debug!("export already running as job id: {}", running.id);
        return Err(crate::Error::TaskAlreadyRunning(running.name));
    }

    let mut session = app_state.db_client.begin().await?;
    let args = serde_json::to_value(ExportPostsArgs { user_id: ctx.actor })?;
    let task = app_state
        .tasks
        .launch(&mut session, ctx.actor, kind, "Exporting posts...", args)
        .await?;
    session.commit().await?;

    let view = TaskView {
        task,
        progress: 0,
    };
    Ok((StatusCode::ACCEPTED, Json::from(view)).into_response())
}

pub async fn list_tasks(State(app_state): State<AppState>, ctx: Ctx) -> Result<Response> {
    let tasks = app_state.tasks.tasks_in_progress(ctx.actor).await?;
    let mut views = Vec::with_capacity(tasks.len());
    for task in tasks {
        let progress = app_state.tasks.progress(&task).await;
        views.push(TaskView { task, progress });
    }

    let response = serde_json::json!({"count": views.len(), "tasks": views});
    Ok(Json::from(response).into_response())
}

#[derive(Debug, Deserialize)]
pub struct NotificationParams {
    #[serde(default)]
    since: f64,
}

pub async fn notifications(
    State(app_state): State<AppState>,
    ctx: Ctx,
    Query(params): Query<NotificationParams>,
) -> Result<Response> {
    use crate::store::NotificationRepo;

    let notifications = app_state
        .db_client
        .notifications_since(ctx.actor, params.since)
        .await?;
    let mut response = Vec::with_capacity(notifications.len());
    for notification in notifications {
        response.push(serde_json::json!({
            "name": notification.name,
            "data": notification.get_data()?,
            "timestamp": notification.timestamp,
        }));
    }
    Ok(Json::from(response).into_response())
}
