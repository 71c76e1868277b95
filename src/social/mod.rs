//! The social core: posts, likes, comments and the feed, plus the
//! authorization rules they share.

pub mod comments;
pub mod feed;
pub mod guard;
pub mod likes;
pub mod posts;
pub mod users;
