use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::db::models::Comment;
use crate::db::{next_created_at, Ordered};
use crate::error::{AppError, AppResult};
use crate::social::guard::{self, Action, Resource};
use crate::social::posts::find_post;
use crate::state::DbPool;

pub const MAX_COMMENT_CHARS: usize = 500;

const COMMENT_COLUMNS: &str = "
    c.id AS id, c.post_id AS post_id, c.user_id AS user_id, u.username AS username,
    c.content AS content, c.created_at AS created_at, c.updated_at AS updated_at";

/// Trim and validate raw comment input. Runs before any storage access.
pub fn normalize_content(raw: &str) -> AppResult<&str> {
    let content = raw.trim();
    if content.is_empty() {
        return Err(AppError::InvalidArgument("Comment cannot be empty".into()));
    }
    if content.chars().count() > MAX_COMMENT_CHARS {
        return Err(AppError::InvalidArgument(format!(
            "Comment must be {} characters or less",
            MAX_COMMENT_CHARS
        )));
    }
    Ok(content)
}

fn fetch_comment(conn: &Connection, comment_id: i64) -> AppResult<Comment> {
    let sql = format!(
        "SELECT {} FROM comments c JOIN users u ON u.id = c.user_id WHERE c.id = ?1",
        COMMENT_COLUMNS
    );
    conn.query_row(&sql, params![comment_id], Comment::from_row)
        .optional()?
        .ok_or(AppError::NotFound)
}

/// Add a comment to a post. Only the trimmed content is persisted.
pub fn create_comment(
    pool: &DbPool,
    actor: Option<&str>,
    post_id: i64,
    raw_content: &str,
) -> AppResult<Comment> {
    let actor = guard::require_actor(actor)?;
    let content = normalize_content(raw_content)?;

    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let post = find_post(&tx, post_id)?;
    guard::authorize(
        Some(actor),
        Resource::Post {
            owner_id: &post.user_id,
        },
        Action::Comment,
    )?;

    let now = next_created_at(&tx, Ordered::Comments)?;
    tx.execute(
        "INSERT INTO comments (user_id, post_id, content, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![actor, post_id, content, now],
    )?;
    let comment_id = tx.last_insert_rowid();
    let comment = fetch_comment(&tx, comment_id)?;
    tx.commit()?;

    Ok(comment)
}

pub fn get_comment(pool: &DbPool, comment_id: i64) -> AppResult<Comment> {
    let conn = pool.get()?;
    fetch_comment(&conn, comment_id)
}

/// Comments on a post, oldest first. Equal timestamps fall back to the
/// auto-incrementing id, which is insertion order.
pub fn list_comments(pool: &DbPool, post_id: i64) -> AppResult<Vec<Comment>> {
    let conn = pool.get()?;
    find_post(&conn, post_id)?;

    let sql = format!(
        "SELECT {} FROM comments c JOIN users u ON u.id = c.user_id
         WHERE c.post_id = ?1
         ORDER BY c.created_at ASC, c.id ASC",
        COMMENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let comments = stmt
        .query_map(params![post_id], Comment::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(comments)
}

/// Remove a comment. Allowed for its author and for the owner of the post.
pub fn delete_comment(pool: &DbPool, actor: Option<&str>, comment_id: i64) -> AppResult<()> {
    let actor = guard::require_actor(actor)?;

    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let comment = fetch_comment(&tx, comment_id)?;
    let post = find_post(&tx, comment.post_id)?;
    guard::authorize(
        Some(actor),
        Resource::Comment {
            author_id: &comment.user_id,
            post_owner_id: &post.user_id,
        },
        Action::Delete,
    )?;

    tx.execute("DELETE FROM comments WHERE id = ?1", params![comment_id])?;
    tx.commit()?;

    tracing::debug!(comment_id, user_id = actor, "Comment deleted");
    Ok(())
}
