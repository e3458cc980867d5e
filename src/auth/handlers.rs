use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rusqlite::params;
use serde::Deserialize;
use serde_json::json;

use crate::auth::session;
use crate::error::{AppError, AppResult};
use crate::extractors::{session_token, MaybeUser};
use crate::routes::success;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

// -- Cookie helpers --

fn session_cookie(name: &str, token: &str, max_age_hours: u64) -> String {
    let max_age_secs = max_age_hours * 3600;
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
        name, token, max_age_secs
    )
}

fn clear_session_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0", name)
}

// -- Handlers --

/// POST /auth/login: verify credentials and set the session cookie.
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> AppResult<Response> {
    if request.username.is_empty() || request.password.is_empty() {
        return Err(AppError::Forbidden(
            "You must enter a username and password.".to_string(),
        ));
    }

    // Opportunistically drop expired sessions
    if let Ok(purged) = session::purge_expired(&state.db) {
        if purged > 0 {
            tracing::debug!("Purged {} expired sessions", purged);
        }
    }

    let row = {
        let conn = state.db.get()?;
        let result = conn.query_row(
            "SELECT id, username, password_hash, is_admin FROM users WHERE username = ?1",
            params![request.username],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, bool>(3)?,
                ))
            },
        );
        match result {
            Ok(row) => Some(row),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        }
    };

    let denied = || AppError::Forbidden("Username and password do not match".to_string());
    let (user_id, username, password_hash, is_admin) = row.ok_or_else(denied)?;
    let password_hash = password_hash.ok_or_else(denied)?;

    if !bcrypt::verify(&request.password, &password_hash).unwrap_or(false) {
        return Err(denied());
    }

    let token = session::create_session(&state.db, &user_id, state.config.auth.session_hours)?;
    let cookie = session_cookie(
        &state.config.auth.cookie_name,
        &token,
        state.config.auth.session_hours,
    );

    tracing::info!("User {} logged in", username);

    Ok((
        [(header::SET_COOKIE, cookie)],
        success(json!({
            "user_id": user_id,
            "username": username,
            "is_admin": is_admin,
        })),
    )
        .into_response())
}

/// POST /auth/logout: drop the session and clear the cookie.
pub async fn logout(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> AppResult<Response> {
    let (parts, _body) = request.into_parts();

    if let Some(token) = session_token(&parts, &state.config.auth.cookie_name) {
        let _ = session::delete_session(&state.db, token);
    }

    Ok((
        [(
            header::SET_COOKIE,
            clear_session_cookie(&state.config.auth.cookie_name),
        )],
        success(json!(null)),
    )
        .into_response())
}

/// GET /auth/me: the current identity, or null when logged out.
pub async fn me(MaybeUser(user): MaybeUser) -> Response {
    match user {
        Some(user) => success(json!({
            "user_id": user.id,
            "username": user.username,
            "is_admin": user.is_admin,
        })),
        None => success(json!(null)),
    }
}
