use serde::{Deserialize, Serialize};
use std::env;

/// Default region when neither `S3_REGION` nor `AWS_REGION` is set
pub const DEFAULT_S3_REGION: &str = "us-east-1";

/// Default bucket holding the exported documents
pub const DEFAULT_S3_BUCKET: &str = "voicelog-exports";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3SourceConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    /// Key prefix listed by `run` when no `--prefix` is given
    pub prefix: String,
    /// Static credentials; `None` falls back to the default provider chain
    pub access_key: Option<String>,
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl S3SourceConfig {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var("S3_ENDPOINT").ok().filter(|v| !v.is_empty()),
            region: env::var("S3_REGION")
                .or_else(|_| env::var("AWS_REGION"))
                .unwrap_or_else(|_| DEFAULT_S3_REGION.to_string()),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| DEFAULT_S3_BUCKET.to_string()),
            prefix: env::var("S3_PREFIX").unwrap_or_default(),
            access_key: env::var("S3_ACCESS_KEY").ok().filter(|v| !v.is_empty()),
            secret_key: env::var("S3_SECRET_KEY").ok().filter(|v| !v.is_empty()),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: DEFAULT_S3_REGION.to_string(),
            bucket: bucket.into(),
            prefix: String::new(),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
        }
    }

    /// Both halves of a static key pair, if configured
    pub fn static_credentials(&self) -> Option<(&str, &str)> {
        match (&self.access_key, &self.secret_key) {
            (Some(access), Some(secret)) => Some((access.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

impl Default for S3SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: DEFAULT_S3_REGION.to_string(),
            bucket: DEFAULT_S3_BUCKET.to_string(),
            prefix: String::new(),
            access_key: None,
            secret_key: None,
            path_style: false,
        }
    }
}
