// src/middleware.rs
use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tower_cookies::Cookies;
use tracing::debug;

use crate::{sessions, token::TokenSigner};

pub const LOGIN_PATH: &str = "/api/login";
pub const API_PREFIX: &str = "/api/";
pub const PROXY_PREFIX: &str = "/files/";

#[derive(Clone)]
pub struct GateState {
    pub signer: TokenSigner,
}

/// Paths that answer 401 instead of the UI shell when the session is missing.
pub fn is_protected(path: &str) -> bool {
    path.starts_with(API_PREFIX) || path.starts_with(PROXY_PREFIX)
}

/// Session gate in front of every route.
///
/// Login passes untouched. Everything else needs a valid session cookie, except
/// that unauthenticated requests outside the API and proxy prefixes still reach
/// the router, which only serves the public UI shell there.
pub async fn require_session(
    State(st): State<GateState>,
    cookies: Cookies,
    req: Request,
    next: Next,
) -> Response {
    if req.method() == Method::POST && req.uri().path() == LOGIN_PATH {
        return next.run(req).await;
    }

    let authenticated = match sessions::current_token(&cookies) {
        Some(token) => match st.signer.check(&token, Utc::now().timestamp()) {
            Ok(()) => true,
            Err(reason) => {
                debug!(%reason, path = %req.uri().path(), "session rejected");
                false
            }
        },
        None => false,
    };

    if !authenticated && is_protected(req.uri().path()) {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    next.run(req).await
}
