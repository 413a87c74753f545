use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{
    group_listing, validate_key, validate_prefix, Listing, ObjectBody, ObjectMeta, ObjectStore, StagedBody,
    StagedObject, StorageError, StorageResult, StoredObject, DEFAULT_CONTENT_TYPE,
};

/// Keeps every object in memory. Used by tests and `STORAGE_BACKEND=memory`.
#[derive(Default)]
pub struct MemoryBucket {
    objects: RwLock<BTreeMap<String, (ObjectMeta, Bytes)>>,
}

impl MemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryBucket {
    async fn stage(&self) -> StorageResult<StagedObject> {
        Ok(StagedObject::in_memory())
    }

    async fn commit(&self, key: &str, staged: StagedObject, content_type: Option<String>) -> StorageResult<ObjectMeta> {
        if let Err(e) = validate_key(key) {
            staged.discard().await;
            return Err(e);
        }
        let (body, size, etag) = staged.finish();
        let body: Bytes = match body {
            StagedBody::Memory(buf) => buf.freeze(),
            other => {
                other.discard().await;
                return Err(StorageError::ForeignStaging);
            }
        };

        let meta = ObjectMeta {
            key: key.to_string(),
            size,
            etag,
            content_type: content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            uploaded: Utc::now(),
        };
        self.objects
            .write()
            .await
            .insert(key.to_string(), (meta.clone(), body));
        Ok(meta)
    }

    async fn get(&self, key: &str) -> StorageResult<Option<StoredObject>> {
        validate_key(key)?;
        let objects = self.objects.read().await;
        Ok(objects.get(key).map(|(meta, body)| StoredObject {
            meta: meta.clone(),
            body: ObjectBody::Bytes(body.clone()),
        }))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Listing> {
        validate_prefix(prefix)?;
        let objects = self.objects.read().await;
        let matching = objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, (meta, _))| meta.clone());
        Ok(group_listing(prefix, matching))
    }
}
