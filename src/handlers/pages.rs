// src/handlers/pages.rs
use axum::{
    http::{StatusCode, Uri},
    response::{Html, IntoResponse, Response},
};

use crate::handlers::api::api_not_found;
use crate::middleware::{API_PREFIX, PROXY_PREFIX};

const INDEX_HTML: &str = include_str!("../../public/index.html");

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Anything the route table does not know: 404 under the reserved prefixes,
/// the UI shell everywhere else.
pub async fn fallback(uri: Uri) -> Response {
    let path = uri.path();
    if path.starts_with(API_PREFIX) {
        return api_not_found().await.into_response();
    }
    if path.starts_with(PROXY_PREFIX) {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    }
    index().await.into_response()
}
