//! Password-gated admin UI over an object bucket.
//!
//! One shared password unlocks a signed, stateless session cookie; with it the
//! browser can list, upload, delete and download objects, using `/`-delimited
//! key prefixes as folders.

pub mod codec;
pub mod config;
pub mod handlers;
pub mod middleware;
pub mod sessions;
pub mod storage;
pub mod token;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_cookies::CookieManagerLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::handlers::{
    api::{api_not_found, delete_object, list_objects, make_folder, upload_object, ApiState},
    auth::{post_login, post_logout, AuthState},
    pages::{fallback, index},
    proxy::{serve_object, ProxyState},
};
use crate::middleware::{require_session, GateState};
use crate::storage::Bucket;
use crate::token::TokenSigner;

/// Full application router: routes, session gate, cookies, request tracing.
pub fn router(cfg: &Config, bucket: Arc<Bucket>) -> anyhow::Result<Router> {
    let signer = TokenSigner::new(&cfg.session_secret)?;

    // ===== Pages & health =====
    let pages_router = Router::new()
        .route("/", get(index))
        .route("/health", get(|| async { "ok" }));

    // ===== Auth =====
    let auth_router = Router::new()
        .route("/api/login", post(post_login).fallback(api_not_found))
        .route("/api/logout", post(post_logout))
        .with_state(AuthState {
            signer: signer.clone(),
            access_key: cfg.access_key.clone(),
        });

    // ===== Upload (large bodies) =====
    let upload_router = Router::new()
        .route("/api/upload", post(upload_object))
        .with_state(ApiState { bucket: bucket.clone() })
        .layer(DefaultBodyLimit::max(
            cfg.max_upload_bytes.try_into().unwrap_or(usize::MAX),
        ));

    // ===== Storage API =====
    let api_router = Router::new()
        .route("/api/list", get(list_objects))
        .route("/api/delete", post(delete_object))
        .route("/api/mkdir", post(make_folder))
        .with_state(ApiState { bucket: bucket.clone() });

    // ===== Object proxy =====
    let proxy_router = Router::new()
        .route("/files/*key", get(serve_object))
        .with_state(ProxyState { bucket });

    // ===== Merge + gate + cookies =====
    // layers wrap outward: the gate needs the cookie jar installed before it runs
    let app = pages_router
        .merge(auth_router)
        .merge(upload_router)
        .merge(api_router)
        .merge(proxy_router)
        .fallback(fallback)
        .layer(from_fn_with_state(GateState { signer }, require_session))
        .layer(CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http());

    Ok(app)
}
