use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::db::models::User;
use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentUser, MaybeUser};
use crate::routes::posts::read_multipart;
use crate::social::feed::clamp_limit;
use crate::social::users::{self, Profile};
use crate::state::AppState;
use crate::storage;

#[derive(Deserialize)]
pub struct ProfileParams {
    pub limit: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateProfileBody {
    pub display_name: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/users/{username}", get(profile))
        .route("/api/me", patch(update_me).get(me).delete(delete_me))
        .route("/api/me/avatar", post(set_avatar))
}

async fn profile(
    State(state): State<AppState>,
    user: MaybeUser,
    Path(username): Path<String>,
    Query(params): Query<ProfileParams>,
) -> AppResult<Json<Profile>> {
    let limit = clamp_limit(params.limit.as_deref(), &state.config.feed);
    Ok(Json(users::get_profile(&state.db, user.id(), &username, limit)?))
}

async fn me(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<User>> {
    Ok(Json(users::get_user(&state.db, &user.id)?))
}

async fn update_me(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(body): Json<UpdateProfileBody>,
) -> AppResult<Json<User>> {
    let updated = users::update_profile(
        &state.db,
        Some(&user.id),
        &user.id,
        body.display_name.as_deref(),
    )?;
    Ok(Json(updated))
}

async fn set_avatar(
    State(state): State<AppState>,
    user: CurrentUser,
    multipart: Multipart,
) -> AppResult<Json<User>> {
    let (image, _) = read_multipart(multipart).await?;
    let image =
        image.ok_or_else(|| AppError::InvalidArgument("An image is required".into()))?;

    let previous = users::get_user(&state.db, &user.id)?.avatar_path;
    let updated = storage::store_then(
        state.blobs.as_ref(),
        image.bytes,
        &image.content_type,
        |avatar_path| users::set_avatar(&state.db, Some(&user.id), &user.id, avatar_path),
    )
    .await?;

    if let Some(old) = previous {
        if let Err(e) = state.blobs.remove(&old).await {
            tracing::warn!("Failed to remove previous avatar {}: {}", old, e);
        }
    }
    Ok(Json(updated))
}

async fn delete_me(State(state): State<AppState>, user: CurrentUser) -> AppResult<StatusCode> {
    users::delete_user(&state.db, Some(&user.id), &user.id)?;
    Ok(StatusCode::NO_CONTENT)
}
