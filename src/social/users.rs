use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::db::models::User;
use crate::db::now_timestamp;
use crate::error::{AppError, AppResult};
use crate::social::feed::{list_feed_with, FeedPage, FeedQuery};
use crate::social::guard::{self, Action, Resource};
use crate::state::DbPool;

pub const MAX_DISPLAY_NAME_CHARS: usize = 50;
pub const MIN_PASSWORD_CHARS: usize = 8;

const USER_COLUMNS: &str =
    "id, email, username, display_name, avatar_path, password_hash, created_at, updated_at";

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_path: Option<String>,
    pub post_count: i64,
    pub created_at: String,
    pub posts: FeedPage,
}

fn validate_username(username: &str) -> AppResult<()> {
    let valid_len = (3..=30).contains(&username.len());
    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if !valid_len || !valid_chars {
        return Err(AppError::InvalidArgument(
            "Username must be 3-30 letters, digits, '_' or '.'".into(),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> AppResult<()> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(AppError::InvalidArgument("Invalid email address".into())),
    }
}

/// Trim a display name; blank input clears it.
fn normalize_display_name(raw: Option<&str>) -> AppResult<Option<String>> {
    let Some(name) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if name.chars().count() > MAX_DISPLAY_NAME_CHARS {
        return Err(AppError::InvalidArgument(format!(
            "Display name must be {} characters or less",
            MAX_DISPLAY_NAME_CHARS
        )));
    }
    Ok(Some(name.to_string()))
}

pub(crate) fn find_user(conn: &Connection, user_id: &str) -> AppResult<User> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        params![user_id],
        User::from_row,
    )
    .optional()?
    .ok_or(AppError::NotFound)
}

pub fn get_user(pool: &DbPool, user_id: &str) -> AppResult<User> {
    let conn = pool.get()?;
    find_user(&conn, user_id)
}

pub fn register(pool: &DbPool, new_user: &NewUser, bcrypt_cost: u32) -> AppResult<User> {
    let email = new_user.email.trim();
    let username = new_user.username.trim();
    validate_email(email)?;
    validate_username(username)?;
    if new_user.password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(AppError::InvalidArgument(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_CHARS
        )));
    }
    let display_name = normalize_display_name(new_user.display_name.as_deref())?;
    let password_hash = bcrypt::hash(&new_user.password, bcrypt_cost)?;

    let conn = pool.get()?;
    let id = uuid::Uuid::now_v7().to_string();
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO users (id, email, username, display_name, password_hash, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![id, email, username, display_name, password_hash, now],
    )
    .map_err(|e| match AppError::from(e) {
        AppError::Conflict(_) => AppError::Conflict("Username or email is already taken".into()),
        other => other,
    })?;

    tracing::info!(user_id = %id, username, "User registered");
    find_user(&conn, &id)
}

/// Check a password against a stored hash. Without a stored hash a throwaway
/// hash is computed at the configured cost, so an unknown login takes as long
/// to reject as a wrong password.
fn verify_password(password: &str, stored_hash: Option<&str>, bcrypt_cost: u32) -> bool {
    match stored_hash {
        Some(hash) => bcrypt::verify(password, hash).unwrap_or(false),
        None => {
            let _ = bcrypt::hash(password, bcrypt_cost);
            false
        }
    }
}

/// Check a username-or-email and password pair.
pub fn authenticate(
    pool: &DbPool,
    login: &str,
    password: &str,
    bcrypt_cost: u32,
) -> AppResult<User> {
    let conn = pool.get()?;
    let user = conn
        .query_row(
            &format!(
                "SELECT {} FROM users WHERE username = ?1 OR email = ?1",
                USER_COLUMNS
            ),
            params![login.trim()],
            User::from_row,
        )
        .optional()?;

    let stored_hash = user.as_ref().map(|u| u.password_hash.as_str());
    if verify_password(password, stored_hash, bcrypt_cost) {
        user.ok_or(AppError::Unauthorized)
    } else {
        Err(AppError::Unauthorized)
    }
}

/// Public profile with the first page of the user's posts, newest first.
pub fn get_profile(
    pool: &DbPool,
    actor: Option<&str>,
    username: &str,
    limit: usize,
) -> AppResult<Profile> {
    let conn = pool.get()?;
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
            params![username],
            User::from_row,
        )
        .optional()?
        .ok_or(AppError::NotFound)?;

    let post_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM posts WHERE user_id = ?1",
        params![user.id],
        |r| r.get(0),
    )?;
    let posts = list_feed_with(
        &conn,
        actor,
        &FeedQuery {
            limit,
            cursor: None,
            user_id: Some(user.id.clone()),
        },
    )?;

    Ok(Profile {
        id: user.id,
        username: user.username,
        display_name: user.display_name,
        avatar_path: user.avatar_path,
        post_count,
        created_at: user.created_at,
        posts,
    })
}

pub fn update_profile(
    pool: &DbPool,
    actor: Option<&str>,
    user_id: &str,
    display_name: Option<&str>,
) -> AppResult<User> {
    guard::authorize(actor, Resource::Profile { user_id }, Action::Update)?;
    let display_name = normalize_display_name(display_name)?;

    let conn = pool.get()?;
    let updated = conn.execute(
        "UPDATE users SET display_name = ?1, updated_at = ?2 WHERE id = ?3",
        params![display_name, now_timestamp(), user_id],
    )?;
    if updated == 0 {
        return Err(AppError::NotFound);
    }
    find_user(&conn, user_id)
}

/// Point the user's avatar at an already stored media object.
pub fn set_avatar(
    pool: &DbPool,
    actor: Option<&str>,
    user_id: &str,
    avatar_path: &str,
) -> AppResult<User> {
    guard::authorize(actor, Resource::Profile { user_id }, Action::Update)?;
    if avatar_path.trim().is_empty() {
        return Err(AppError::InvalidArgument(
            "A media reference is required".into(),
        ));
    }

    let conn = pool.get()?;
    let updated = conn.execute(
        "UPDATE users SET avatar_path = ?1, updated_at = ?2 WHERE id = ?3",
        params![avatar_path, now_timestamp(), user_id],
    )?;
    if updated == 0 {
        return Err(AppError::NotFound);
    }
    find_user(&conn, user_id)
}

/// Remove a user and everything hanging off them: their posts with all
/// likes and comments on those posts, their own likes and comments on other
/// posts, and their sessions.
pub fn delete_user(pool: &DbPool, actor: Option<&str>, user_id: &str) -> AppResult<()> {
    guard::authorize(actor, Resource::Profile { user_id }, Action::Delete)?;

    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    find_user(&tx, user_id)?;

    tx.execute(
        "DELETE FROM comments
         WHERE user_id = ?1 OR post_id IN (SELECT id FROM posts WHERE user_id = ?1)",
        params![user_id],
    )?;
    tx.execute(
        "DELETE FROM likes
         WHERE user_id = ?1 OR post_id IN (SELECT id FROM posts WHERE user_id = ?1)",
        params![user_id],
    )?;
    let posts = tx.execute("DELETE FROM posts WHERE user_id = ?1", params![user_id])?;
    tx.execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])?;
    tx.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
    tx.commit()?;

    tracing::info!(user_id, posts, "User deleted");
    Ok(())
}
