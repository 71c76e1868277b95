//! Authorization decisions. Pure functions over ids, no storage access.
//!
//! Reads are public. Every mutation needs an actor; mutations of an existing
//! resource that belongs to someone else are reported as `Forbidden`, never
//! `NotFound`, for posts, comments and profiles alike.

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource<'a> {
    Post {
        owner_id: &'a str,
    },
    Comment {
        author_id: &'a str,
        post_owner_id: &'a str,
    },
    Profile {
        user_id: &'a str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Update,
    Delete,
    Like,
    Comment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Unauthenticated,
    Forbidden,
}

impl Decision {
    pub fn into_result(self) -> AppResult<()> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Unauthenticated => Err(AppError::Unauthorized),
            Decision::Forbidden => Err(AppError::Forbidden),
        }
    }
}

pub fn decide(actor: Option<&str>, resource: Resource<'_>, action: Action) -> Decision {
    if action == Action::Read {
        return Decision::Allow;
    }
    let Some(actor) = actor else {
        return Decision::Unauthenticated;
    };

    let allowed = match (resource, action) {
        (Resource::Post { .. }, Action::Like | Action::Comment) => true,
        (Resource::Post { owner_id }, Action::Update | Action::Delete) => actor == owner_id,
        // Post owners moderate the comments on their posts
        (
            Resource::Comment {
                author_id,
                post_owner_id,
            },
            Action::Delete,
        ) => actor == author_id || actor == post_owner_id,
        (Resource::Profile { user_id }, Action::Update | Action::Delete) => actor == user_id,
        _ => false,
    };

    if allowed {
        Decision::Allow
    } else {
        Decision::Forbidden
    }
}

pub fn authorize(actor: Option<&str>, resource: Resource<'_>, action: Action) -> AppResult<()> {
    decide(actor, resource, action).into_result()
}

/// Fails with `Unauthorized` when there is no actor.
pub fn require_actor(actor: Option<&str>) -> AppResult<&str> {
    actor.ok_or(AppError::Unauthorized)
}
