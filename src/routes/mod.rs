pub mod auth;
pub mod feed;
pub mod posts;
pub mod uploads;
pub mod users;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Room for multipart framing and text fields on top of the image itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn app(state: AppState) -> Router {
    let body_limit = state.config.storage.max_upload_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .route("/uploads/{*path}", get(uploads::serve))
        .merge(auth::router())
        .merge(feed::router())
        .merge(posts::router())
        .merge(users::router())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
