// src/handlers/api.rs
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::middleware::PROXY_PREFIX;
use crate::storage::{Bucket, ObjectStore, StagedObject, StorageError, DELIMITER, FOLDER_PLACEHOLDER};

#[derive(Clone)]
pub struct ApiState {
    pub bucket: Arc<Bucket>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub folder: Option<String>,
}

#[derive(Serialize)]
pub struct FileItem {
    pub key: String,
    pub name: String,
    pub size: u64,
    pub last_modified: String,
    pub url: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct DeleteBody {
    key: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct MkdirBody {
    folder: Option<String>,
}

fn storage_error(op: &str, e: StorageError) -> Response {
    match e {
        StorageError::InvalidKey(_) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        other => {
            error!(op, error = %other, "storage failure");
            (StatusCode::INTERNAL_SERVER_ERROR, "Storage error").into_response()
        }
    }
}

pub fn is_placeholder(key: &str) -> bool {
    key.rsplit(DELIMITER).next() == Some(FOLDER_PLACEHOLDER)
}

pub fn object_url(key: &str) -> String {
    format!("{PROXY_PREFIX}{}", urlencoding::encode(key))
}

// GET /api/list?folder=<path>
pub async fn list_objects(State(st): State<ApiState>, Query(q): Query<ListQuery>) -> Response {
    let mut prefix = q.folder.unwrap_or_default();
    if !prefix.is_empty() && !prefix.ends_with(DELIMITER) {
        prefix.push(DELIMITER);
    }

    let listing = match st.bucket.list(&prefix).await {
        Ok(l) => l,
        Err(e) => return storage_error("list", e),
    };

    let folders: Vec<String> = listing
        .common_prefixes
        .iter()
        .filter_map(|p| p.strip_prefix(prefix.as_str()))
        .map(|p| p.trim_end_matches(DELIMITER).to_string())
        .collect();

    let files: Vec<FileItem> = listing
        .objects
        .into_iter()
        .filter(|o| !is_placeholder(&o.key))
        .map(|o| FileItem {
            name: o.key[prefix.len()..].to_string(),
            size: o.size,
            last_modified: o.uploaded.to_rfc3339_opts(SecondsFormat::Millis, true),
            url: object_url(&o.key),
            key: o.key,
        })
        .collect();

    Json(json!({ "folders": folders, "files": files })).into_response()
}

// POST /api/upload  multipart: key=<full key>, file=<bytes>
//
// The file part goes straight into the bucket's staging area chunk by chunk
// and only becomes visible once the key is known and the commit succeeds.
pub async fn upload_object(State(st): State<ApiState>, mut mp: Multipart) -> Response {
    let mut key: Option<String> = None;
    let mut file: Option<(StagedObject, Option<String>)> = None;

    let failure = loop {
        let mut field = match mp.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break None,
            Err(e) => break Some((e.status(), e.body_text()).into_response()),
        };
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "key" => match field.text().await {
                Ok(text) => key = Some(text),
                Err(e) => break Some((e.status(), e.body_text()).into_response()),
            },
            "file" => {
                let content_type = field.content_type().map(str::to_owned);
                let mut staged = match st.bucket.stage().await {
                    Ok(s) => s,
                    Err(e) => break Some(storage_error("upload", e)),
                };
                let streamed = loop {
                    match field.chunk().await {
                        Ok(Some(chunk)) => {
                            if let Err(e) = staged.write(&chunk).await {
                                break Err(storage_error("upload", e));
                            }
                        }
                        Ok(None) => break Ok(()),
                        Err(e) => break Err((e.status(), e.body_text()).into_response()),
                    }
                };
                if let Err(response) = streamed {
                    staged.discard().await;
                    break Some(response);
                }
                if let Some((previous, _)) = file.replace((staged, content_type)) {
                    previous.discard().await;
                }
            }
            _ => {}
        }
    };

    if let Some(response) = failure {
        if let Some((staged, _)) = file {
            staged.discard().await;
        }
        return response;
    }

    let (key, (staged, content_type)) = match (key.filter(|k| !k.is_empty()), file) {
        (Some(key), Some(file)) => (key, file),
        (_, file) => {
            if let Some((staged, _)) = file {
                staged.discard().await;
            }
            return (StatusCode::BAD_REQUEST, "Missing key or file in form data").into_response();
        }
    };

    match st
        .bucket
        .commit(&key, staged, content_type.filter(|c| !c.is_empty()))
        .await
    {
        Ok(meta) => {
            info!(key = %meta.key, size = meta.size, "object uploaded");
            (StatusCode::OK, "OK").into_response()
        }
        Err(e) => storage_error("upload", e),
    }
}

// POST /api/delete  { "key": "..." }
pub async fn delete_object(State(st): State<ApiState>, body: Bytes) -> Response {
    let key = serde_json::from_slice::<DeleteBody>(&body)
        .ok()
        .and_then(|b| b.key)
        .filter(|k| !k.is_empty());
    let Some(key) = key else {
        return (StatusCode::BAD_REQUEST, "No key!").into_response();
    };

    match st.bucket.delete(&key).await {
        Ok(()) => {
            info!(%key, "object deleted");
            (StatusCode::OK, "OK").into_response()
        }
        Err(e) => storage_error("delete", e),
    }
}

// POST /api/mkdir  { "folder": "a/b" }
pub async fn make_folder(State(st): State<ApiState>, body: Bytes) -> Response {
    let folder = serde_json::from_slice::<MkdirBody>(&body)
        .ok()
        .and_then(|b| b.folder)
        .map(|f| f.trim_matches(DELIMITER).to_string())
        .filter(|f| !f.is_empty());
    let Some(folder) = folder else {
        return (StatusCode::BAD_REQUEST, "No folder!").into_response();
    };

    let key = format!("{folder}{DELIMITER}{FOLDER_PLACEHOLDER}");
    match st.bucket.put(&key, Bytes::from_static(&[0]), None).await {
        Ok(_) => {
            info!(%folder, "folder created");
            (StatusCode::OK, "OK").into_response()
        }
        Err(e) => storage_error("mkdir", e),
    }
}

pub async fn api_not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "API Not Found")
}
