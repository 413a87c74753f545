// src/config.rs
use std::{env, path::PathBuf};

use anyhow::{anyhow, bail, Result};
use tracing::info;

use crate::storage::BucketConfig;

#[derive(Clone, Debug)]
pub struct Config {
    // ===== Server =====
    pub bind: String,

    // ===== Secrets =====
    pub access_key: String,
    pub session_secret: Vec<u8>,

    // ===== Storage =====
    pub bucket: BucketConfig,
    pub max_upload_bytes: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let cfg = Self::from_lookup(|name| env::var(name).ok())?;
        cfg.log_summary();
        Ok(cfg)
    }

    /// Builds the config from any variable source; `from_env` passes the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| -> Result<String> {
            match lookup(name) {
                Some(v) if !v.is_empty() => Ok(v),
                _ => Err(anyhow!("{name} must be set to a non-empty value")),
            }
        };

        let access_key = required("ACCESS_KEY")?;
        let session_secret = required("JWT_SECRET")?.into_bytes();

        let bind = lookup("BIND").unwrap_or_else(|| "0.0.0.0:8080".into());

        let bucket_dir = lookup("BUCKET_DIR").unwrap_or_else(|| "bucket".into());
        let bucket = match lookup("STORAGE_BACKEND").as_deref().unwrap_or("local") {
            "local" => BucketConfig::Local {
                root: PathBuf::from(bucket_dir),
            },
            "memory" => BucketConfig::Memory,
            other => bail!("unknown STORAGE_BACKEND {other:?} (expected \"local\" or \"memory\")"),
        };

        let max_upload_bytes = lookup("MAX_UPLOAD_BYTES")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(1_024 * 1_024 * 1_024);

        Ok(Self {
            bind,
            access_key,
            session_secret,
            bucket,
            max_upload_bytes,
        })
    }

    fn log_summary(&self) {
        let storage = match &self.bucket {
            BucketConfig::Memory => "memory".to_string(),
            BucketConfig::Local { root } => format!("local:{}", root.display()),
        };
        info!(
            bind = %self.bind,
            storage = %storage,
            max_upload_mb = self.max_upload_bytes / (1024 * 1024),
            access_key = "***",
            jwt_secret = "***",
            "[config] loaded"
        );
    }
}
