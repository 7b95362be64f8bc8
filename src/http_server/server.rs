use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::search::IndexSync;
use crate::tasks::TaskHandle;
use crate::{db::DbClient, AppConfig, Result};

use super::{api, AppState};

pub async fn start_server(
    app_config: &AppConfig,
    db_client: DbClient,
    index_sync: Arc<IndexSync>,
    tasks: TaskHandle,
) -> Result<()> {
    let app_state = AppState {
        posts_per_page: app_config.posts_per_page,
        db_client,
        index_sync,
        tasks,
    };

    let app = Router::new()
        .route("/posts", post(api::create_post))
        .route(
            "/posts/:post_id",
            put(api::edit_post).delete(api::delete_post),
        )
        .route("/search", get(api::search))
        .route("/export_posts", post(api::export_posts))
        .route("/tasks", get(api::list_tasks))
        .route("/notifications", get(api::notifications))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(app_state);

    // run our app with hyper, listening globally
    let listener =
        tokio::net::TcpListener::bind(format!("0.0.0.0:{}", app_config.listen_port)).await?;
    tracing::info!("listening on port {}", app_config.listen_port);
    axum::serve(listener, app).await?;
    Ok(())
}
