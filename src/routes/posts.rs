use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::db::models::{Comment, Like};
use crate::error::{AppError, AppResult};
use crate::extractors::MaybeUser;
use crate::social::guard;
use crate::social::likes::LikeStatus;
use crate::social::{comments, likes, posts};
use crate::state::AppState;
use crate::storage;

// --- Bodies ---

#[derive(Deserialize)]
pub struct UpdatePostBody {
    pub caption: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateCommentBody {
    pub content: String,
}

#[derive(Serialize)]
pub struct LikesResponse {
    #[serde(flatten)]
    pub status: LikeStatus,
    pub likes: Vec<Like>,
}

// --- Router ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/posts", post(create_post))
        .route(
            "/api/posts/{id}",
            get(get_post).patch(update_post).delete(delete_post),
        )
        .route("/api/posts/{id}/like", post(toggle_like))
        .route("/api/posts/{id}/likes", get(list_likes))
        .route(
            "/api/posts/{id}/comments",
            get(list_comments).post(create_comment),
        )
        .route(
            "/api/comments/{id}",
            get(get_comment).delete(delete_comment),
        )
}

/// An image part pulled out of a multipart body.
pub struct ImageUpload {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Collect the `image` file part and any text parts from a multipart body.
pub async fn read_multipart(
    mut multipart: Multipart,
) -> AppResult<(Option<ImageUpload>, Vec<(String, String)>)> {
    let mut image = None;
    let mut fields = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "image" {
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field.bytes().await.map_err(multipart_error)?;
            image = Some(ImageUpload {
                bytes,
                content_type,
            });
        } else {
            let text = field.text().await.map_err(multipart_error)?;
            fields.push((name, text));
        }
    }

    Ok((image, fields))
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge("Upload is too large".into())
    } else {
        AppError::InvalidArgument(format!("Malformed upload: {}", err.body_text()))
    }
}

// --- Handlers ---

async fn create_post(
    State(state): State<AppState>,
    user: MaybeUser,
    multipart: Multipart,
) -> AppResult<Response> {
    // Anonymous uploads never reach the blob store
    let actor = guard::require_actor(user.id())?;

    let (image, fields) = read_multipart(multipart).await?;
    let image =
        image.ok_or_else(|| AppError::InvalidArgument("An image is required".into()))?;
    let caption = fields
        .into_iter()
        .find(|(name, _)| name == "caption")
        .map(|(_, text)| text);

    let post = storage::store_then(
        state.blobs.as_ref(),
        image.bytes,
        &image.content_type,
        |media_path| posts::create_post(&state.db, Some(actor), media_path, caption.as_deref()),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(post)).into_response())
}

async fn get_post(
    State(state): State<AppState>,
    user: MaybeUser,
    Path(id): Path<i64>,
) -> AppResult<Json<posts::PostView>> {
    Ok(Json(posts::get_post(&state.db, user.id(), id)?))
}

async fn update_post(
    State(state): State<AppState>,
    user: MaybeUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdatePostBody>,
) -> AppResult<Json<posts::PostView>> {
    let post = posts::update_post(&state.db, user.id(), id, body.caption.as_deref())?;
    Ok(Json(post))
}

async fn delete_post(
    State(state): State<AppState>,
    user: MaybeUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    let removed = posts::delete_post(&state.db, user.id(), id)?;
    if let Err(e) = state.blobs.remove(&removed.media_path).await {
        tracing::warn!("Failed to remove media for post {}: {}", id, e);
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_like(
    State(state): State<AppState>,
    user: MaybeUser,
    Path(id): Path<i64>,
) -> AppResult<Json<LikeStatus>> {
    Ok(Json(likes::toggle_like(&state.db, user.id(), id)?))
}

async fn list_likes(
    State(state): State<AppState>,
    user: MaybeUser,
    Path(id): Path<i64>,
) -> AppResult<Json<LikesResponse>> {
    let status = likes::like_status(&state.db, user.id(), id)?;
    let likes = likes::list_likes(&state.db, id)?;
    Ok(Json(LikesResponse { status, likes }))
}

async fn list_comments(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<Comment>>> {
    Ok(Json(comments::list_comments(&state.db, id)?))
}

async fn create_comment(
    State(state): State<AppState>,
    user: MaybeUser,
    Path(id): Path<i64>,
    Json(body): Json<CreateCommentBody>,
) -> AppResult<Response> {
    let comment = comments::create_comment(&state.db, user.id(), id, &body.content)?;
    Ok((StatusCode::CREATED, Json(comment)).into_response())
}

async fn get_comment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Comment>> {
    Ok(Json(comments::get_comment(&state.db, id)?))
}

async fn delete_comment(
    State(state): State<AppState>,
    user: MaybeUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    comments::delete_comment(&state.db, user.id(), id)?;
    Ok(StatusCode::NO_CONTENT)
}
