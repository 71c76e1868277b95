use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;

use crate::db::models::{Author, Post};
use crate::db::{next_created_at, now_timestamp, Ordered};
use crate::error::{AppError, AppResult};
use crate::social::guard::{self, Action, Resource};
use crate::state::DbPool;

pub const MAX_CAPTION_CHARS: usize = 2200;

/// A post as readers see it: author, live counts and the viewer's like flag.
#[derive(Debug, Clone, Serialize)]
pub struct PostView {
    pub id: i64,
    pub author: Author,
    pub media_path: String,
    pub caption: Option<String>,
    pub like_count: i64,
    pub comment_count: i64,
    pub liked: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Select list shared by every query producing a [`PostView`]. `?1` is the
/// viewer id, or NULL for anonymous readers (which makes `liked` false).
pub(crate) const POST_VIEW_COLUMNS: &str = "
    p.id AS id, p.user_id AS user_id, u.username AS username,
    u.display_name AS display_name, u.avatar_path AS avatar_path,
    p.media_path AS media_path, p.caption AS caption,
    p.created_at AS created_at, p.updated_at AS updated_at,
    (SELECT COUNT(*) FROM likes l WHERE l.post_id = p.id) AS like_count,
    (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comment_count,
    EXISTS (SELECT 1 FROM likes l WHERE l.post_id = p.id AND l.user_id = ?1) AS liked";

impl PostView {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            author: Author {
                id: row.get("user_id")?,
                username: row.get("username")?,
                display_name: row.get("display_name")?,
                avatar_path: row.get("avatar_path")?,
            },
            media_path: row.get("media_path")?,
            caption: row.get("caption")?,
            like_count: row.get("like_count")?,
            comment_count: row.get("comment_count")?,
            liked: row.get("liked")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub(crate) fn find_post(conn: &Connection, post_id: i64) -> AppResult<Post> {
    conn.query_row(
        "SELECT id, user_id, media_path, caption, created_at, updated_at FROM posts WHERE id = ?1",
        params![post_id],
        Post::from_row,
    )
    .optional()?
    .ok_or(AppError::NotFound)
}

fn fetch_view(conn: &Connection, actor: Option<&str>, post_id: i64) -> AppResult<PostView> {
    let sql = format!(
        "SELECT {} FROM posts p JOIN users u ON u.id = p.user_id WHERE p.id = ?2",
        POST_VIEW_COLUMNS
    );
    conn.query_row(&sql, params![actor, post_id], PostView::from_row)
        .optional()?
        .ok_or(AppError::NotFound)
}

/// An empty caption means no caption. Anything else is kept as given.
fn normalize_caption(caption: Option<&str>) -> AppResult<Option<&str>> {
    match caption.filter(|text| !text.is_empty()) {
        Some(text) if text.chars().count() > MAX_CAPTION_CHARS => Err(AppError::InvalidArgument(
            format!("Caption must be {} characters or less", MAX_CAPTION_CHARS),
        )),
        caption => Ok(caption),
    }
}

/// Create a post for an already stored media object. A non-empty caption is
/// kept exactly as given, whitespace included.
pub fn create_post(
    pool: &DbPool,
    actor: Option<&str>,
    media_path: &str,
    caption: Option<&str>,
) -> AppResult<PostView> {
    let actor = guard::require_actor(actor)?;
    if media_path.trim().is_empty() {
        return Err(AppError::InvalidArgument(
            "A media reference is required".into(),
        ));
    }
    let caption = normalize_caption(caption)?;

    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let created_at = next_created_at(&tx, Ordered::Posts)?;
    tx.execute(
        "INSERT INTO posts (user_id, media_path, caption, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![actor, media_path, caption, created_at],
    )?;
    let post_id = tx.last_insert_rowid();
    tx.commit()?;
    tracing::info!(post_id, user_id = actor, "Post created");

    fetch_view(&conn, Some(actor), post_id)
}

pub fn get_post(pool: &DbPool, actor: Option<&str>, post_id: i64) -> AppResult<PostView> {
    let conn = pool.get()?;
    fetch_view(&conn, actor, post_id)
}

/// Replace the caption of a post. `None` or an empty caption clears it; the
/// media is never touched.
pub fn update_post(
    pool: &DbPool,
    actor: Option<&str>,
    post_id: i64,
    caption: Option<&str>,
) -> AppResult<PostView> {
    let actor = guard::require_actor(actor)?;
    let caption = normalize_caption(caption)?;

    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let post = find_post(&tx, post_id)?;
    guard::authorize(
        Some(actor),
        Resource::Post {
            owner_id: &post.user_id,
        },
        Action::Update,
    )?;
    tx.execute(
        "UPDATE posts SET caption = ?1, updated_at = ?2 WHERE id = ?3",
        params![caption, now_timestamp(), post_id],
    )?;
    tx.commit()?;

    fetch_view(&conn, Some(actor), post_id)
}

/// Delete a post together with its comments and likes, all or nothing.
/// Returns the removed post so callers can release its media.
pub fn delete_post(pool: &DbPool, actor: Option<&str>, post_id: i64) -> AppResult<Post> {
    let actor = guard::require_actor(actor)?;

    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let post = find_post(&tx, post_id)?;
    guard::authorize(
        Some(actor),
        Resource::Post {
            owner_id: &post.user_id,
        },
        Action::Delete,
    )?;

    let comments = tx.execute("DELETE FROM comments WHERE post_id = ?1", params![post_id])?;
    let likes = tx.execute("DELETE FROM likes WHERE post_id = ?1", params![post_id])?;
    tx.execute("DELETE FROM posts WHERE id = ?1", params![post_id])?;
    tx.commit()?;

    tracing::info!(post_id, comments, likes, "Post deleted");
    Ok(post)
}
