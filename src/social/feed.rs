//! Cursor-based feed traversal.
//!
//! Posts are totally ordered by `(created_at DESC, id DESC)`. A cursor names
//! the last post a client has seen and the next page starts strictly after it
//! in that order, so posts created in the meantime land ahead of the cursor
//! and only show up when the client refreshes from the top.

use chrono::DateTime;
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::config::FeedConfig;
use crate::error::{AppError, AppResult};
use crate::social::posts::{PostView, POST_VIEW_COLUMNS};
use crate::state::DbPool;

/// Hard ceiling on a page, whatever the caller or the config asks for.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Opaque position in the feed: the sort key of the last returned post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedCursor {
    pub created_at: String,
    pub id: i64,
}

impl FeedCursor {
    pub fn encode(&self) -> String {
        hex::encode(format!("{}|{}", self.created_at, self.id))
    }

    pub fn decode(token: &str) -> AppResult<Self> {
        let invalid = || AppError::InvalidArgument("Invalid cursor".into());

        let bytes = hex::decode(token).map_err(|_| invalid())?;
        let raw = String::from_utf8(bytes).map_err(|_| invalid())?;
        let (created_at, id) = raw.rsplit_once('|').ok_or_else(invalid)?;
        DateTime::parse_from_rfc3339(created_at).map_err(|_| invalid())?;
        let id = id.parse::<i64>().map_err(|_| invalid())?;

        Ok(Self {
            created_at: created_at.to_string(),
            id,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeedQuery {
    pub limit: usize,
    pub cursor: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedPage {
    pub posts: Vec<PostView>,
    pub next_cursor: Option<String>,
}

/// Turn a raw `limit` parameter into a page size. Missing or non-numeric
/// values fall back to the default; numbers are clamped into `1..=max`.
pub fn clamp_limit(raw: Option<&str>, config: &FeedConfig) -> usize {
    let max = config.max_limit.clamp(1, MAX_PAGE_SIZE);
    match raw.map(str::trim).and_then(|s| s.parse::<i64>().ok()) {
        Some(n) if n < 1 => 1,
        Some(n) => usize::try_from(n).unwrap_or(max).min(max),
        None => config.default_limit.clamp(1, max),
    }
}

pub fn list_feed(pool: &DbPool, actor: Option<&str>, query: &FeedQuery) -> AppResult<FeedPage> {
    let conn = pool.get()?;
    list_feed_with(&conn, actor, query)
}

/// Fetches one row past the page to learn whether another page exists, so
/// `next_cursor` is present exactly when there is more to read.
pub(crate) fn list_feed_with(
    conn: &Connection,
    actor: Option<&str>,
    query: &FeedQuery,
) -> AppResult<FeedPage> {
    let limit = query.limit.clamp(1, MAX_PAGE_SIZE);
    let cursor = query.cursor.as_deref().map(FeedCursor::decode).transpose()?;
    let (cursor_at, cursor_id) = match &cursor {
        Some(c) => (Some(c.created_at.as_str()), Some(c.id)),
        None => (None, None),
    };

    let sql = format!(
        "SELECT {}
         FROM posts p
         JOIN users u ON u.id = p.user_id
         WHERE (?2 IS NULL OR p.user_id = ?2)
           AND (?3 IS NULL OR p.created_at < ?3 OR (p.created_at = ?3 AND p.id < ?4))
         ORDER BY p.created_at DESC, p.id DESC
         LIMIT ?5",
        POST_VIEW_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut posts = stmt
        .query_map(
            params![
                actor,
                query.user_id.as_deref(),
                cursor_at,
                cursor_id,
                (limit + 1) as i64
            ],
            PostView::from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    let next_cursor = if posts.len() > limit {
        posts.truncate(limit);
        posts.last().map(|last| {
            FeedCursor {
                created_at: last.created_at.clone(),
                id: last.id,
            }
            .encode()
        })
    } else {
        None
    };

    Ok(FeedPage { posts, next_cursor })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{migrated_pool, seed_user};
    use crate::social::posts::create_post;
    use std::collections::HashSet;

    fn query(limit: usize, cursor: Option<String>) -> FeedQuery {
        FeedQuery {
            limit,
            cursor,
            user_id: None,
        }
    }

    fn collect_pages(pool: &DbPool, base: FeedQuery) -> Vec<Vec<i64>> {
        let mut pages = Vec::new();
        let mut q = base;
        loop {
            let page = list_feed(pool, None, &q).unwrap();
            pages.push(page.posts.iter().map(|p| p.id).collect());
            match page.next_cursor {
                Some(next) => q.cursor = Some(next),
                None => break,
            }
        }
        pages
    }

    #[test]
    fn cursor_round_trips_and_rejects_garbage() {
        let cursor = FeedCursor {
            created_at: "2026-10-19T10:00:00.000001Z".into(),
            id: 42,
        };
        assert_eq!(FeedCursor::decode(&cursor.encode()).unwrap(), cursor);

        let no_separator = hex::encode("no-separator");
        let bad_time = hex::encode("yesterday|1");
        for bad in ["", "zz", no_separator.as_str(), bad_time.as_str()] {
            assert!(matches!(
                FeedCursor::decode(bad),
                Err(AppError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn limit_is_clamped_not_rejected() {
        let config = FeedConfig::default();
        assert_eq!(clamp_limit(None, &config), 20);
        assert_eq!(clamp_limit(Some("abc"), &config), 20);
        assert_eq!(clamp_limit(Some(""), &config), 20);
        assert_eq!(clamp_limit(Some("0"), &config), 1);
        assert_eq!(clamp_limit(Some("-7"), &config), 1);
        assert_eq!(clamp_limit(Some(" 15 "), &config), 15);
        assert_eq!(clamp_limit(Some("1000"), &config), 100);
        assert_eq!(clamp_limit(Some("99999999999999999999"), &config), 20);
    }

    #[test]
    fn oversized_limit_is_capped_by_the_engine() {
        let pool = migrated_pool();
        let alice = seed_user(&pool, "alice");
        for i in 0..3 {
            create_post(&pool, Some(&alice), &format!("/uploads/{}.png", i), None).unwrap();
        }

        let page = list_feed(&pool, None, &query(usize::MAX, None)).unwrap();
        assert_eq!(page.posts.len(), 3);
        assert!(page.next_cursor.is_none());

        let page = list_feed(&pool, None, &query(0, None)).unwrap();
        assert_eq!(page.posts.len(), 1);

        let generous = FeedConfig {
            default_limit: 20,
            max_limit: usize::MAX,
        };
        assert_eq!(clamp_limit(Some("5000"), &generous), MAX_PAGE_SIZE);
    }

    #[test]
    fn post_created_after_first_page_never_appears_on_load_more() {
        let pool = migrated_pool();
        let alice = seed_user(&pool, "alice");
        create_post(&pool, Some(&alice), "/uploads/old.png", None).unwrap();
        // Newest existing row is stamped ahead of the clock, as after a clock step back
        let ahead = (chrono::Utc::now() + chrono::Duration::hours(1))
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
        let newest = {
            let conn = pool.get().unwrap();
            conn.execute(
                "INSERT INTO posts (user_id, media_path, created_at, updated_at)
                 VALUES (?1, '/uploads/ahead.png', ?2, ?2)",
                params![alice, ahead],
            )
            .unwrap();
            conn.last_insert_rowid()
        };

        let first = list_feed(&pool, None, &query(1, None)).unwrap();
        assert_eq!(first.posts[0].id, newest);

        let late = create_post(&pool, Some(&alice), "/uploads/late.png", None).unwrap();

        let more = collect_pages(&pool, query(1, first.next_cursor.clone()));
        assert!(more.iter().flatten().all(|id| *id != late.id));

        let refreshed = list_feed(&pool, None, &query(1, None)).unwrap();
        assert_eq!(refreshed.posts[0].id, late.id);
    }

    #[test]
    fn feed_is_newest_first() {
        let pool = migrated_pool();
        let alice = seed_user(&pool, "alice");
        let ids: Vec<i64> = (0..5)
            .map(|i| {
                create_post(&pool, Some(&alice), &format!("/uploads/{}.png", i), None)
                    .unwrap()
                    .id
            })
            .collect();

        let page = list_feed(&pool, None, &query(10, None)).unwrap();
        let listed: Vec<i64> = page.posts.iter().map(|p| p.id).collect();
        let mut expected = ids.clone();
        expected.reverse();
        assert_eq!(listed, expected);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn pages_cover_every_post_exactly_once() {
        let pool = migrated_pool();
        let alice = seed_user(&pool, "alice");
        let n: usize = 11;
        for i in 0..n {
            create_post(&pool, Some(&alice), &format!("/uploads/{}.png", i), None).unwrap();
        }

        for k in [1usize, 3, 4, 11, 20] {
            let pages = collect_pages(&pool, query(k, None));
            assert_eq!(pages.len(), n.div_ceil(k).max(1), "limit {}", k);

            let all: Vec<i64> = pages.concat();
            let unique: HashSet<i64> = all.iter().copied().collect();
            assert_eq!(all.len(), n);
            assert_eq!(unique.len(), n);
            assert!(all.windows(2).all(|w| w[0] > w[1]));
        }
    }

    #[test]
    fn exact_multiple_has_no_trailing_empty_page() {
        let pool = migrated_pool();
        let alice = seed_user(&pool, "alice");
        for i in 0..4 {
            create_post(&pool, Some(&alice), &format!("/uploads/{}.png", i), None).unwrap();
        }
        let pages = collect_pages(&pool, query(2, None));
        assert_eq!(pages.len(), 2);
        assert!(pages.iter().all(|p| p.len() == 2));
    }

    #[test]
    fn empty_feed_is_one_empty_page() {
        let pool = migrated_pool();
        let page = list_feed(&pool, None, &query(5, None)).unwrap();
        assert!(page.posts.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn identical_timestamps_are_neither_skipped_nor_duplicated() {
        let pool = migrated_pool();
        let alice = seed_user(&pool, "alice");
        {
            let conn = pool.get().unwrap();
            for i in 0..7 {
                conn.execute(
                    "INSERT INTO posts (user_id, media_path, created_at, updated_at)
                     VALUES (?1, ?2, '2026-01-01T00:00:00.000000Z', '2026-01-01T00:00:00.000000Z')",
                    params![alice, format!("/uploads/{}.png", i)],
                )
                .unwrap();
            }
        }

        let all: Vec<i64> = collect_pages(&pool, query(3, None)).concat();
        assert_eq!(all, vec![7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn new_posts_appear_on_refresh_not_on_load_more() {
        let pool = migrated_pool();
        let alice = seed_user(&pool, "alice");
        for i in 0..4 {
            create_post(&pool, Some(&alice), &format!("/uploads/{}.png", i), None).unwrap();
        }

        let first = list_feed(&pool, None, &query(2, None)).unwrap();
        let seen: Vec<i64> = first.posts.iter().map(|p| p.id).collect();
        let fresh = create_post(&pool, Some(&alice), "/uploads/new.png", None).unwrap();

        let more = list_feed(&pool, None, &query(2, first.next_cursor.clone())).unwrap();
        let more_ids: Vec<i64> = more.posts.iter().map(|p| p.id).collect();
        assert!(!more_ids.contains(&fresh.id));
        assert!(more_ids.iter().all(|id| !seen.contains(id)));
        assert_eq!(more_ids.len(), 2);

        let refreshed = list_feed(&pool, None, &query(2, None)).unwrap();
        assert_eq!(refreshed.posts[0].id, fresh.id);
    }

    #[test]
    fn filter_by_user_and_liked_flag() {
        let pool = migrated_pool();
        let alice = seed_user(&pool, "alice");
        let bob = seed_user(&pool, "bob");
        let a1 = create_post(&pool, Some(&alice), "/uploads/a1.png", None).unwrap();
        create_post(&pool, Some(&bob), "/uploads/b1.png", None).unwrap();
        let a2 = create_post(&pool, Some(&alice), "/uploads/a2.png", None).unwrap();
        crate::social::likes::toggle_like(&pool, Some(&bob), a1.id).unwrap();

        let q = FeedQuery {
            limit: 10,
            cursor: None,
            user_id: Some(alice.clone()),
        };
        let page = list_feed(&pool, Some(&bob), &q).unwrap();
        let ids: Vec<i64> = page.posts.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![a2.id, a1.id]);
        assert!(!page.posts[0].liked);
        assert!(page.posts[1].liked);
        assert_eq!(page.posts[1].like_count, 1);

        let anonymous = list_feed(&pool, None, &q).unwrap();
        assert!(anonymous.posts.iter().all(|p| !p.liked));
    }

    #[test]
    fn malformed_cursor_is_invalid_argument() {
        let pool = migrated_pool();
        let result = list_feed(&pool, None, &query(5, Some("not-hex".into())));
        assert!(matches!(result, Err(AppError::InvalidArgument(_))));
    }
}
