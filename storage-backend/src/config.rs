use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Where persisted configurations live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StorageConfig {
    /// Directory on the local filesystem, created on first use.
    Local {
        path: PathBuf,
    },
    /// S3 or an S3-compatible endpoint. The store must support conditional
    /// puts; version blobs are written create-only.
    S3 {
        bucket: String,
        region: Option<String>,
        endpoint: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        allow_http: bool,
    },
    /// In-process only. Served by `MemoryClient`.
    Memory,
}

impl StorageConfig {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::Local { path: path.into() }
    }

    pub fn s3(
        bucket: impl Into<String>,
        region: Option<String>,
        endpoint: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        allow_http: bool,
    ) -> Self {
        Self::S3 {
            bucket: bucket.into(),
            region,
            endpoint,
            access_key_id,
            secret_access_key,
            allow_http,
        }
    }

    /// Reads `STORAGE_BACKEND` (`local` by default). `local` takes
    /// `STORAGE_PATH`; `s3` requires `AWS_BUCKET` and reads the optional
    /// `AWS_REGION`, `AWS_ENDPOINT`, credentials and `AWS_ALLOW_HTTP`.
    pub fn from_env() -> anyhow::Result<Self> {
        let backend = std::env::var("STORAGE_BACKEND").unwrap_or_else(|_| "local".to_string());

        match backend.as_str() {
            "local" => {
                let path = std::env::var("STORAGE_PATH").unwrap_or_else(|_| "./data".to_string());
                Ok(Self::local(path))
            }
            "s3" => {
                let bucket = std::env::var("AWS_BUCKET")
                    .map_err(|_| anyhow::anyhow!("AWS_BUCKET is required for S3 backend"))?;
                let region = std::env::var("AWS_REGION").ok();
                let endpoint = std::env::var("AWS_ENDPOINT").ok();
                let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok();
                let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok();
                let allow_http = std::env::var("AWS_ALLOW_HTTP")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse::<bool>()
                    .unwrap_or(false);

                Ok(Self::s3(
                    bucket,
                    region,
                    endpoint,
                    access_key_id,
                    secret_access_key,
                    allow_http,
                ))
            }
            "memory" => Ok(Self::Memory),
            _ => anyhow::bail!(
                "Unknown storage backend: {}. Must be 'local', 's3' or 'memory'",
                backend
            ),
        }
    }
}

/// Polling behaviour of watch streams on stores without change
/// notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSettings {
    pub poll_interval: Duration,
    /// Consecutive failed polls after which the stream gives up.
    pub max_poll_failures: u32,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_poll_failures: 5,
        }
    }
}

impl WatchSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut settings = Self::default();

        if let Ok(ms) = std::env::var("STORAGE_POLL_INTERVAL_MS") {
            let ms = ms
                .parse::<u64>()
                .map_err(|e| anyhow::anyhow!("Invalid STORAGE_POLL_INTERVAL_MS '{ms}': {e}"))?;
            settings.poll_interval = Duration::from_millis(ms);
        }
        if let Ok(max) = std::env::var("STORAGE_MAX_POLL_FAILURES") {
            settings.max_poll_failures = max
                .parse::<u32>()
                .map_err(|e| anyhow::anyhow!("Invalid STORAGE_MAX_POLL_FAILURES '{max}': {e}"))?;
        }

        Ok(settings)
    }
}
