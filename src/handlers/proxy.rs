// src/handlers/proxy.rs
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;
use tracing::error;

use crate::storage::{Bucket, ObjectBody, ObjectStore, StorageError};

#[derive(Clone)]
pub struct ProxyState {
    pub bucket: Arc<Bucket>,
}

fn into_body(body: ObjectBody) -> Body {
    match body {
        ObjectBody::Bytes(bytes) => Body::from(bytes),
        ObjectBody::File(file) => Body::from_stream(ReaderStream::new(file)),
    }
}

/// GET /files/*key: object bytes with their stored metadata.
pub async fn serve_object(State(st): State<ProxyState>, Path(key): Path<String>) -> Response {
    let obj = match st.bucket.get(&key).await {
        Ok(Some(o)) => o,
        Ok(None) => return (StatusCode::NOT_FOUND, "Not found").into_response(),
        Err(StorageError::InvalidKey(_)) => return (StatusCode::BAD_REQUEST, "invalid key").into_response(),
        Err(e) => {
            error!(%key, error = %e, "object read failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Storage error").into_response();
        }
    };

    let meta = &obj.meta;
    let mut headers = HeaderMap::new();
    let ctype = HeaderValue::from_str(&meta.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, ctype);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size));
    if let Ok(etag) = HeaderValue::from_str(&format!("\"{}\"", meta.etag)) {
        headers.insert(header::ETAG, etag);
    }
    let last_modified = meta.uploaded.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    if let Ok(v) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, v);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=86400"));

    (StatusCode::OK, headers, into_body(obj.body)).into_response()
}
