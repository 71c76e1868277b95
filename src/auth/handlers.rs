use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::auth::session;
use crate::config::AuthConfig;
use crate::db::models::User;
use crate::error::AppResult;
use crate::extractors::{session_token, CurrentUser};
use crate::social::users::{self, NewUser};
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct LoginRequest {
    /// Username or email
    pub login: String,
    pub password: String,
}

// -- Cookie helpers --

fn session_cookie(auth: &AuthConfig, token: &str) -> String {
    let max_age_secs = auth.session_hours * 3600;
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
        auth.cookie_name, token, max_age_secs
    )
}

fn clear_session_cookie(auth: &AuthConfig) -> String {
    format!(
        "{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0",
        auth.cookie_name
    )
}

fn signed_in(state: &AppState, status: StatusCode, user: User) -> AppResult<Response> {
    let token = session::create_session(&state.db, &user.id, state.config.auth.session_hours)?;
    Ok((
        status,
        [(header::SET_COOKIE, session_cookie(&state.config.auth, &token))],
        Json(serde_json::json!({ "user": user, "token": token })),
    )
        .into_response())
}

// -- Handlers --

/// POST /auth/register: create an account and sign it in
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<NewUser>,
) -> AppResult<Response> {
    let user = users::register(&state.db, &body, state.config.auth.bcrypt_cost)?;
    signed_in(&state, StatusCode::CREATED, user)
}

/// POST /auth/login: exchange credentials for a session
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> AppResult<Response> {
    let user = users::authenticate(
        &state.db,
        &body.login,
        &body.password,
        state.config.auth.bcrypt_cost,
    )?;
    tracing::debug!(user_id = %user.id, "User logged in");
    signed_in(&state, StatusCode::OK, user)
}

/// POST /auth/logout: revoke the current session
pub async fn logout(
    State(state): State<AppState>,
    _user: CurrentUser,
    headers: HeaderMap,
) -> AppResult<Response> {
    if let Some(token) = session_token(&headers, &state.config.auth.cookie_name) {
        session::delete_session(&state.db, token)?;
    }

    Ok((
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, clear_session_cookie(&state.config.auth))],
    )
        .into_response())
}
