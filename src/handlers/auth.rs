// src/handlers/auth.rs
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tower_cookies::Cookies;
use tracing::{info, warn};

use crate::{sessions, token::TokenSigner};

#[derive(Clone)]
pub struct AuthState {
    pub signer: TokenSigner,
    pub access_key: String,
}

#[derive(Deserialize)]
pub struct LoginBody {
    pub password: String,
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
}

// POST /api/login  { "password": "..." }
// Body is parsed by hand so a bad body looks exactly like a bad password.
pub async fn post_login(State(st): State<AuthState>, cookies: Cookies, body: Bytes) -> Response {
    let Ok(login) = serde_json::from_slice::<LoginBody>(&body) else {
        warn!("login rejected: unreadable body");
        return unauthorized();
    };

    if !sessions::password_matches(&st.access_key, &login.password) {
        warn!("login rejected: wrong password");
        return unauthorized();
    }

    sessions::start_session(&cookies, st.signer.issue());
    info!("login ok, session issued");
    Json(json!({ "success": true })).into_response()
}

// POST /api/logout
pub async fn post_logout(cookies: Cookies) -> impl IntoResponse {
    sessions::end_session(&cookies);
    Json(json!({ "success": true }))
}
