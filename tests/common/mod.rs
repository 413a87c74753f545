// Test fixtures are allowed to use unwrap/expect for clear failure messages
#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

//! Shared helpers for the router-level integration tests.
//!
//! Every test builds its own router, usually over a fresh in-memory bucket, and
//! drives it with `tower::ServiceExt::oneshot`, so no sockets are involved.

use std::{path::Path, sync::Arc};

use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use bucket_admin::{
    config::Config,
    sessions::COOKIE_NAME,
    storage::{Bucket, BucketConfig, ObjectStore},
};
use bytes::Bytes;
use serde_json::{json, Value};
use tower::ServiceExt;

pub const PASSWORD: &str = "correct horse battery staple";
pub const SECRET: &str = "test-signing-secret";

pub fn test_config() -> Config {
    config_with(&[])
}

/// Test config with some variables replaced, e.g. `("MAX_UPLOAD_BYTES", "512")`.
pub fn config_with(overrides: &[(&str, &str)]) -> Config {
    Config::from_lookup(|name| {
        if let Some((_, value)) = overrides.iter().find(|(k, _)| *k == name) {
            return Some(value.to_string());
        }
        match name {
            "ACCESS_KEY" => Some(PASSWORD.to_string()),
            "JWT_SECRET" => Some(SECRET.to_string()),
            "STORAGE_BACKEND" => Some("memory".to_string()),
            _ => None,
        }
    })
    .unwrap()
}

pub struct TestApp {
    pub router: Router,
    pub bucket: Arc<Bucket>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with(test_config(), Bucket::memory())
    }

    pub fn with(cfg: Config, bucket: Bucket) -> Self {
        let bucket = Arc::new(bucket);
        let router = bucket_admin::router(&cfg, bucket.clone()).unwrap();
        Self { router, bucket }
    }

    /// App over a directory bucket rooted at `root`.
    pub async fn local(root: &Path, overrides: &[(&str, &str)]) -> Self {
        let bucket = Bucket::open(&BucketConfig::Local {
            root: root.to_path_buf(),
        })
        .await
        .unwrap();
        Self::with(config_with(overrides), bucket)
    }

    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(req).await.unwrap()
    }

    /// Logs in with the right password and returns the session token.
    pub async fn login(&self) -> String {
        let response = self.send(login_request(PASSWORD)).await;
        assert_eq!(response.status(), StatusCode::OK, "login should succeed");
        session_token(&response).expect("session cookie should be set")
    }

    pub async fn seed(&self, key: &str, body: &'static [u8]) {
        self.bucket
            .put(key, Bytes::from_static(body), Some("text/plain".into()))
            .await
            .unwrap();
    }
}

pub fn login_request(password: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "password": password }).to_string()))
        .unwrap()
}

pub fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    bodiless("GET", uri, token)
}

pub fn head(uri: &str, token: Option<&str>) -> Request<Body> {
    bodiless("HEAD", uri, token)
}

fn bodiless(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(t) = token {
        builder = builder.header(header::COOKIE, format!("{COOKIE_NAME}={t}"));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(t) = token {
        builder = builder.header(header::COOKIE, format!("{COOKIE_NAME}={t}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub const BOUNDARY: &str = "XBOUNDARYX";

/// multipart/form-data upload request; `None` omits that part.
pub fn upload_request(token: Option<&str>, key: Option<&str>, file: Option<(&str, &[u8])>) -> Request<Body> {
    let mut body: Vec<u8> = Vec::new();
    if let Some(k) = key {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"key\"\r\n\r\n{k}\r\n").as_bytes(),
        );
    }
    if let Some((ctype, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"blob\"\r\nContent-Type: {ctype}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"));
    if let Some(t) = token {
        builder = builder.header(header::COOKIE, format!("{COOKIE_NAME}={t}"));
    }
    builder.body(Body::from(body)).unwrap()
}

/// Value of the session cookie from a `Set-Cookie` header, if any.
pub fn session_token(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|s| s.split(';').next())
        .find_map(|pair| pair.strip_prefix(&format!("{COOKIE_NAME}=")).map(str::to_string))
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
