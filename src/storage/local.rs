use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    validate_key, validate_prefix, Listing, ObjectBody, ObjectMeta, ObjectStore, StagedBody, StagedObject,
    StorageError, StorageResult, StoredObject, DEFAULT_CONTENT_TYPE, DELIMITER,
};

/// Bucket backed by a directory:
///
/// ```text
/// <root>/objects/<key>             object bytes
/// <root>/meta/<sha256(key)>.json   ObjectMeta
/// <root>/tmp/                      staged uploads and sidecars
/// ```
///
/// Sidecar names are hashes, so no key can land on another key's metadata.
pub struct LocalBucket {
    root: PathBuf,
}

impl LocalBucket {
    pub async fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        for sub in ["objects", "meta", "tmp"] {
            fs::create_dir_all(root.join(sub)).await?;
        }
        let bucket = Self { root };
        bucket.clear_staging().await?;
        Ok(bucket)
    }

    fn objects_root(&self) -> PathBuf {
        self.root.join("objects")
    }

    fn meta_root(&self) -> PathBuf {
        self.root.join("meta")
    }

    fn tmp_root(&self) -> PathBuf {
        self.root.join("tmp")
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.objects_root().join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        let name = hex::encode(Sha256::digest(key.as_bytes()));
        self.meta_root().join(format!("{name}.json"))
    }

    /// Staged files left behind by a previous run can never be committed.
    async fn clear_staging(&self) -> StorageResult<()> {
        let mut entries = fs::read_dir(self.tmp_root()).await?;
        while let Some(entry) = entries.next_entry().await? {
            match fs::remove_file(entry.path()).await {
                Ok(()) => debug!(path = %entry.path().display(), "removed stale staged file"),
                Err(e) => warn!(path = %entry.path().display(), error = %e, "could not remove stale staged file"),
            }
        }
        Ok(())
    }

    /// Stored metadata when it still describes the file; otherwise metadata
    /// derived from the file itself.
    async fn read_meta(&self, key: &str, file_meta: &std::fs::Metadata) -> ObjectMeta {
        match fs::read(self.meta_path(key)).await {
            Ok(raw) => match serde_json::from_slice::<ObjectMeta>(&raw) {
                Ok(meta) if meta.key == key && meta.size == file_meta.len() => return meta,
                Ok(_) => debug!(%key, "stale metadata sidecar"),
                Err(e) => warn!(%key, error = %e, "unreadable metadata sidecar"),
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(%key, error = %e, "metadata sidecar read failed"),
        }
        derived_meta(key, file_meta)
    }

    /// Moves a staged file to `key` and its sidecar next to it. On failure
    /// neither the new bytes nor the new sidecar stay visible.
    async fn install(&self, key: &str, staged: &Path, meta: &ObjectMeta) -> StorageResult<()> {
        let sidecar = self.tmp_root().join(format!("{}.json", Uuid::new_v4()));
        fs::write(&sidecar, serde_json::to_vec(meta)?).await?;

        let target = self.object_path(key);
        let placed = async {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::rename(staged, &target).await
        }
        .await;
        if let Err(e) = placed {
            remove_quietly(&sidecar).await;
            return Err(e.into());
        }

        if let Err(e) = fs::rename(&sidecar, self.meta_path(key)).await {
            remove_quietly(&sidecar).await;
            remove_quietly(&target).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Removes now-empty directories from `start` up to (not including) `stop`.
    async fn prune_empty_dirs(start: Option<&Path>, stop: &Path) {
        let mut dir = start;
        while let Some(d) = dir {
            if d == stop || !d.starts_with(stop) {
                break;
            }
            if fs::remove_dir(d).await.is_err() {
                break;
            }
            debug!(dir = %d.display(), "pruned empty folder");
            dir = d.parent();
        }
    }
}

fn derived_meta(key: &str, file_meta: &std::fs::Metadata) -> ObjectMeta {
    let uploaded: DateTime<Utc> = file_meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    ObjectMeta {
        key: key.to_string(),
        size: file_meta.len(),
        etag: format!("{:x}-{:x}", file_meta.len(), uploaded.timestamp()),
        content_type: DEFAULT_CONTENT_TYPE.to_string(),
        uploaded,
    }
}

fn ignore_missing(res: std::io::Result<()>) -> std::io::Result<()> {
    match res {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = ignore_missing(fs::remove_file(path).await) {
        warn!(path = %path.display(), error = %e, "cleanup failed");
    }
}

#[async_trait]
impl ObjectStore for LocalBucket {
    async fn stage(&self) -> StorageResult<StagedObject> {
        let path = self.tmp_root().join(Uuid::new_v4().to_string());
        let file = fs::File::create(&path).await?;
        Ok(StagedObject::on_disk(file, path))
    }

    async fn commit(&self, key: &str, staged: StagedObject, content_type: Option<String>) -> StorageResult<ObjectMeta> {
        if let Err(e) = validate_key(key) {
            staged.discard().await;
            return Err(e);
        }
        let (body, size, etag) = staged.finish();
        let (mut file, path) = match body {
            StagedBody::File { file, path } => (file, path),
            other => {
                other.discard().await;
                return Err(StorageError::ForeignStaging);
            }
        };

        let flushed = file.flush().await;
        drop(file);
        let meta = ObjectMeta {
            key: key.to_string(),
            size,
            etag,
            content_type: content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            uploaded: Utc::now(),
        };
        let installed = match flushed {
            Ok(()) => self.install(key, &path, &meta).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = installed {
            remove_quietly(&path).await;
            return Err(e);
        }
        Ok(meta)
    }

    async fn get(&self, key: &str) -> StorageResult<Option<StoredObject>> {
        validate_key(key)?;
        let file = match fs::File::open(self.object_path(key)).await {
            Ok(f) => f,
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let file_meta = file.metadata().await?;
        if !file_meta.is_file() {
            // a folder prefix, not an object
            return Ok(None);
        }
        let meta = self.read_meta(key, &file_meta).await;
        Ok(Some(StoredObject {
            meta,
            body: ObjectBody::File(file),
        }))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let object = self.object_path(key);
        match fs::symlink_metadata(&object).await {
            // a folder prefix, not an object
            Ok(m) if m.is_dir() => return Ok(()),
            Ok(_) => ignore_missing(fs::remove_file(&object).await)?,
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {}
            Err(e) => return Err(e.into()),
        }
        ignore_missing(fs::remove_file(self.meta_path(key)).await)?;

        Self::prune_empty_dirs(object.parent(), &self.objects_root()).await;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Listing> {
        validate_prefix(prefix)?;
        let (dir_part, name_prefix) = match prefix.rfind(DELIMITER) {
            Some(idx) => prefix.split_at(idx + 1),
            None => ("", prefix),
        };

        let dir = self.objects_root().join(dir_part);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                return Ok(Listing::default())
            }
            Err(e) => return Err(e.into()),
        };

        let mut listing = Listing::default();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !name.starts_with(name_prefix) {
                continue;
            }
            let file_meta = entry.metadata().await?;
            if file_meta.is_dir() {
                listing.common_prefixes.push(format!("{dir_part}{name}{DELIMITER}"));
            } else if file_meta.is_file() {
                let key = format!("{dir_part}{name}");
                listing.objects.push(self.read_meta(&key, &file_meta).await);
            }
        }

        listing.objects.sort_by(|a, b| a.key.cmp(&b.key));
        listing.common_prefixes.sort();
        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::io::AsyncReadExt;

    fn staging_is_empty(root: &Path) -> bool {
        std::fs::read_dir(root.join("tmp")).unwrap().next().is_none()
    }

    async fn read_body(obj: StoredObject) -> Vec<u8> {
        match obj.body {
            ObjectBody::File(mut f) => {
                let mut buf = Vec::new();
                f.read_to_end(&mut buf).await.unwrap();
                buf
            }
            ObjectBody::Bytes(b) => b.to_vec(),
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips_content_and_meta() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = LocalBucket::open(dir.path()).await.unwrap();

        let meta = bucket
            .put("docs/readme.md", Bytes::from_static(b"# hi"), Some("text/markdown".into()))
            .await
            .unwrap();
        assert_eq!(meta.etag, hex::encode(Sha256::digest(b"# hi")));

        let obj = bucket.get("docs/readme.md").await.unwrap().unwrap();
        assert_eq!(obj.meta, meta);
        assert_eq!(read_body(obj).await, b"# hi");
        assert!(dir.path().join("objects/docs/readme.md").is_file());
    }

    #[tokio::test]
    async fn folder_prefix_is_not_an_object() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = LocalBucket::open(dir.path()).await.unwrap();
        bucket.put("docs/a", Bytes::from_static(b"a"), None).await.unwrap();
        assert!(bucket.get("docs").await.unwrap().is_none());
        assert!(bucket.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn listing_matches_delimiter_semantics() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = LocalBucket::open(dir.path()).await.unwrap();
        for key in ["b.txt", "a.txt", "docs/x.md", "docs/deep/y.md", "photos/p.png"] {
            bucket.put(key, Bytes::from_static(b"1"), None).await.unwrap();
        }

        let top = bucket.list("").await.unwrap();
        let keys: Vec<_> = top.objects.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, ["a.txt", "b.txt"]);
        assert_eq!(top.common_prefixes, ["docs/", "photos/"]);

        let docs = bucket.list("docs/").await.unwrap();
        assert_eq!(docs.objects.len(), 1);
        assert_eq!(docs.objects[0].key, "docs/x.md");
        assert_eq!(docs.common_prefixes, ["docs/deep/"]);

        let partial = bucket.list("ph").await.unwrap();
        assert!(partial.objects.is_empty());
        assert_eq!(partial.common_prefixes, ["photos/"]);

        assert_eq!(bucket.list("nope/").await.unwrap(), Listing::default());
        assert!(bucket.list("../").await.is_err());
    }

    #[tokio::test]
    async fn delete_prunes_empty_folders() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = LocalBucket::open(dir.path()).await.unwrap();
        bucket.put("a/b/c.txt", Bytes::from_static(b"c"), None).await.unwrap();
        bucket.put("a/keep.txt", Bytes::from_static(b"k"), None).await.unwrap();

        bucket.delete("a/b/c.txt").await.unwrap();
        assert!(!dir.path().join("objects/a/b").exists());
        assert!(dir.path().join("objects/a").is_dir());

        bucket.delete("a/keep.txt").await.unwrap();
        assert!(!dir.path().join("objects/a").exists());
        assert!(dir.path().join("objects").is_dir());

        // deleting again is fine
        bucket.delete("a/keep.txt").await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path().join("meta")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn deleting_a_folder_prefix_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = LocalBucket::open(dir.path()).await.unwrap();
        bucket.put("docs/a", Bytes::from_static(b"a"), None).await.unwrap();
        bucket.delete("docs").await.unwrap();
        assert!(bucket.get("docs/a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sidecar_names_never_collide_with_keys() {
        for order in [["a", "a.json/x"], ["a.json/x", "a"]] {
            let dir = tempfile::tempdir().unwrap();
            let bucket = LocalBucket::open(dir.path()).await.unwrap();
            for key in order {
                bucket.put(key, Bytes::from(key.as_bytes().to_vec()), Some("text/plain".into())).await.unwrap();
            }

            let top = bucket.list("").await.unwrap();
            assert_eq!(top.objects.len(), 1);
            assert_eq!(top.objects[0].key, "a");
            assert_eq!(top.objects[0].content_type, "text/plain");
            assert_eq!(top.common_prefixes, ["a.json/"]);

            let inner = bucket.list("a.json/").await.unwrap();
            assert_eq!(inner.objects[0].key, "a.json/x");
            assert!(bucket.get("a").await.unwrap().is_some());
            assert!(bucket.get("a.json/x").await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn object_and_folder_with_one_name_fail_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = LocalBucket::open(dir.path()).await.unwrap();

        bucket.put("a", Bytes::from_static(b"file"), None).await.unwrap();
        assert!(bucket.put("a/x", Bytes::from_static(b"nested"), None).await.is_err());
        assert!(bucket.get("a/x").await.unwrap().is_none());
        assert!(bucket.list("a/").await.unwrap().objects.is_empty());

        bucket.put("d/x", Bytes::from_static(b"nested"), None).await.unwrap();
        assert!(bucket.put("d", Bytes::from_static(b"file"), None).await.is_err());
        assert!(bucket.get("d").await.unwrap().is_none());

        let top = bucket.list("").await.unwrap();
        let keys: Vec<_> = top.objects.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, ["a"]);
        assert_eq!(top.common_prefixes, ["d/"]);
        assert!(staging_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn unreadable_sidecar_falls_back_to_file_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = LocalBucket::open(dir.path()).await.unwrap();
        bucket.put("k.txt", Bytes::from_static(b"12345"), Some("text/plain".into())).await.unwrap();
        std::fs::write(bucket.meta_path("k.txt"), b"{not json").unwrap();

        let listing = bucket.list("").await.unwrap();
        assert_eq!(listing.objects[0].size, 5);
        assert_eq!(listing.objects[0].content_type, DEFAULT_CONTENT_TYPE);
        assert!(bucket.get("k.txt").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn staged_upload_streams_to_disk_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = LocalBucket::open(dir.path()).await.unwrap();

        let mut staged = bucket.stage().await.unwrap();
        staged.write(b"chunk-1 ").await.unwrap();
        staged.write(b"chunk-2").await.unwrap();
        assert!(!staging_is_empty(dir.path()));
        assert!(bucket.list("").await.unwrap().objects.is_empty());

        let meta = bucket.commit("up/data.bin", staged, None).await.unwrap();
        assert_eq!(meta.size, 15);
        assert_eq!(meta.etag, hex::encode(Sha256::digest(b"chunk-1 chunk-2")));
        let obj = bucket.get("up/data.bin").await.unwrap().unwrap();
        assert_eq!(read_body(obj).await, b"chunk-1 chunk-2");
        assert!(staging_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn discarded_or_rejected_uploads_leave_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = LocalBucket::open(dir.path()).await.unwrap();

        let mut staged = bucket.stage().await.unwrap();
        staged.write(b"abandoned").await.unwrap();
        staged.discard().await;
        assert!(staging_is_empty(dir.path()));

        let mut staged = bucket.stage().await.unwrap();
        staged.write(b"bad key").await.unwrap();
        assert!(bucket.commit("../escape", staged, None).await.is_err());
        assert!(staging_is_empty(dir.path()));
        assert_eq!(bucket.list("").await.unwrap(), Listing::default());
    }

    #[tokio::test]
    async fn reopening_clears_stale_staged_files() {
        let dir = tempfile::tempdir().unwrap();
        LocalBucket::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("tmp/leftover"), b"half an upload").unwrap();

        LocalBucket::open(dir.path()).await.unwrap();
        assert!(staging_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn hand_placed_files_get_derived_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = LocalBucket::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("objects/manual.bin"), b"12345").unwrap();

        let listing = bucket.list("").await.unwrap();
        assert_eq!(listing.objects.len(), 1);
        assert_eq!(listing.objects[0].size, 5);
        assert_eq!(listing.objects[0].content_type, DEFAULT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = LocalBucket::open(dir.path()).await.unwrap();
        assert!(bucket.put("../escape", Bytes::new(), None).await.is_err());
        assert!(bucket.get("a/../../etc/passwd").await.is_err());
        assert!(bucket.delete("/abs").await.is_err());
    }
}
