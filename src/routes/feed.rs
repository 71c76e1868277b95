use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::AppResult;
use crate::extractors::MaybeUser;
use crate::social::feed::{self, FeedPage, FeedQuery};
use crate::state::AppState;

/// Raw query string. `limit` stays a string so malformed values can be
/// clamped instead of rejected.
#[derive(Deserialize)]
pub struct FeedParams {
    pub limit: Option<String>,
    pub cursor: Option<String>,
    pub user_id: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/feed", get(list_feed))
}

async fn list_feed(
    State(state): State<AppState>,
    user: MaybeUser,
    Query(params): Query<FeedParams>,
) -> AppResult<Json<FeedPage>> {
    let query = FeedQuery {
        limit: feed::clamp_limit(params.limit.as_deref(), &state.config.feed),
        cursor: params.cursor.filter(|c| !c.is_empty()),
        user_id: params.user_id.filter(|u| !u.is_empty()),
    };
    Ok(Json(feed::list_feed(&state.db, user.id(), &query)?))
}
