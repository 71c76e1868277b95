use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;

use crate::db::models::Like;
use crate::db::now_timestamp;
use crate::error::{AppError, AppResult};
use crate::social::guard::{self, Action, Resource};
use crate::social::posts::find_post;
use crate::state::DbPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LikeStatus {
    pub liked: bool,
    pub like_count: i64,
}

fn count_likes(conn: &Connection, post_id: i64) -> AppResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM likes WHERE post_id = ?1",
        params![post_id],
        |r| r.get(0),
    )?)
}

fn has_liked(conn: &Connection, actor: Option<&str>, post_id: i64) -> AppResult<bool> {
    let Some(actor) = actor else {
        return Ok(false);
    };
    Ok(conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM likes WHERE post_id = ?1 AND user_id = ?2)",
        params![post_id, actor],
        |r| r.get(0),
    )?)
}

/// Flip the actor's like on a post and report the resulting state.
///
/// The whole read-modify-write runs in one IMMEDIATE transaction, so two
/// toggles from the same actor serialize: the second observes the first's
/// row. The insert additionally yields to the `(user_id, post_id)` unique
/// index, so a duplicate can never add a second row.
pub fn toggle_like(pool: &DbPool, actor: Option<&str>, post_id: i64) -> AppResult<LikeStatus> {
    let actor = guard::require_actor(actor)?;

    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let post = find_post(&tx, post_id)?;
    guard::authorize(
        Some(actor),
        Resource::Post {
            owner_id: &post.user_id,
        },
        Action::Like,
    )?;

    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM likes WHERE user_id = ?1 AND post_id = ?2",
            params![actor, post_id],
            |r| r.get(0),
        )
        .optional()?;

    let liked = match existing {
        Some(like_id) => {
            tx.execute("DELETE FROM likes WHERE id = ?1", params![like_id])?;
            false
        }
        None => {
            let inserted = tx.execute(
                "INSERT INTO likes (user_id, post_id, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (user_id, post_id) DO NOTHING",
                params![actor, post_id, now_timestamp()],
            )?;
            if inserted == 0 {
                tracing::debug!(post_id, user_id = actor, "Duplicate like ignored");
            }
            true
        }
    };

    let like_count = count_likes(&tx, post_id)?;
    tx.commit()?;

    Ok(LikeStatus { liked, like_count })
}

/// Like count for a post and whether `actor` is among the likers.
/// Anonymous readers always get `liked = false`.
pub fn like_status(pool: &DbPool, actor: Option<&str>, post_id: i64) -> AppResult<LikeStatus> {
    let conn = pool.get()?;
    find_post(&conn, post_id)?;
    Ok(LikeStatus {
        liked: has_liked(&conn, actor, post_id)?,
        like_count: count_likes(&conn, post_id)?,
    })
}

/// Likes on a post, most recent first.
pub fn list_likes(pool: &DbPool, post_id: i64) -> AppResult<Vec<Like>> {
    let conn = pool.get()?;
    find_post(&conn, post_id)?;

    let mut stmt = conn.prepare(
        "SELECT l.id AS id, l.post_id AS post_id, l.user_id AS user_id,
                u.username AS username, l.created_at AS created_at
         FROM likes l
         JOIN users u ON u.id = l.user_id
         WHERE l.post_id = ?1
         ORDER BY l.created_at DESC, l.id DESC",
    )?;
    let likes = stmt
        .query_map(params![post_id], Like::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(likes)
}

pub fn get_like(pool: &DbPool, like_id: i64) -> AppResult<Like> {
    let conn = pool.get()?;
    conn.query_row(
        "SELECT l.id AS id, l.post_id AS post_id, l.user_id AS user_id,
                u.username AS username, l.created_at AS created_at
         FROM likes l
         JOIN users u ON u.id = l.user_id
         WHERE l.id = ?1",
        params![like_id],
        Like::from_row,
    )
    .optional()?
    .ok_or(AppError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{migrated_pool, seed_user};
    use crate::social::posts::create_post;

    fn setup() -> (DbPool, String, i64) {
        let pool = migrated_pool();
        let owner = seed_user(&pool, "owner");
        let post = create_post(&pool, Some(&owner), "/uploads/p.png", None).unwrap();
        (pool, owner, post.id)
    }

    #[test]
    fn toggle_twice_restores_original_state() {
        let (pool, _owner, post_id) = setup();
        let alice = seed_user(&pool, "alice");

        let before = like_status(&pool, Some(&alice), post_id).unwrap();
        let first = toggle_like(&pool, Some(&alice), post_id).unwrap();
        assert_eq!(
            first,
            LikeStatus {
                liked: true,
                like_count: before.like_count + 1
            }
        );

        let second = toggle_like(&pool, Some(&alice), post_id).unwrap();
        assert_eq!(second, before);
        assert!(!second.liked);
    }

    #[test]
    fn other_likers_are_untouched() {
        let (pool, _owner, post_id) = setup();
        let others: Vec<String> = (0..3)
            .map(|i| seed_user(&pool, &format!("fan{}", i)))
            .collect();
        for fan in &others {
            toggle_like(&pool, Some(fan), post_id).unwrap();
        }
        let newcomer = seed_user(&pool, "newcomer");

        assert_eq!(
            toggle_like(&pool, Some(&newcomer), post_id)
                .unwrap()
                .like_count,
            4
        );
        assert_eq!(
            toggle_like(&pool, Some(&newcomer), post_id)
                .unwrap()
                .like_count,
            3
        );

        let likers: Vec<String> = list_likes(&pool, post_id)
            .unwrap()
            .into_iter()
            .map(|l| l.user_id)
            .collect();
        assert_eq!(likers.len(), 3);
        for fan in &others {
            assert!(likers.contains(fan));
        }
    }

    #[test]
    fn relike_creates_a_new_row() {
        let (pool, _owner, post_id) = setup();
        let alice = seed_user(&pool, "alice");

        toggle_like(&pool, Some(&alice), post_id).unwrap();
        let first = list_likes(&pool, post_id).unwrap().remove(0);
        toggle_like(&pool, Some(&alice), post_id).unwrap();
        toggle_like(&pool, Some(&alice), post_id).unwrap();
        let second = list_likes(&pool, post_id).unwrap().remove(0);

        assert_ne!(first.id, second.id);
        assert!(matches!(get_like(&pool, first.id), Err(AppError::NotFound)));
        assert_eq!(get_like(&pool, second.id).unwrap().user_id, alice);
    }

    #[test]
    fn anonymous_status_is_not_liked() {
        let (pool, owner, post_id) = setup();
        toggle_like(&pool, Some(&owner), post_id).unwrap();

        let status = like_status(&pool, None, post_id).unwrap();
        assert_eq!(
            status,
            LikeStatus {
                liked: false,
                like_count: 1
            }
        );
    }

    #[test]
    fn toggle_requires_actor_and_existing_post() {
        let (pool, owner, post_id) = setup();
        assert!(matches!(
            toggle_like(&pool, None, post_id),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            toggle_like(&pool, Some(&owner), post_id + 100),
            Err(AppError::NotFound)
        ));
        assert!(matches!(
            like_status(&pool, None, post_id + 100),
            Err(AppError::NotFound)
        ));
    }
}
