//! Configuration management

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::normalize::{IdentifierPolicy, IdentifierPrecedence};
use crate::reconcile::DuplicatePolicy;
use crate::source::S3SourceConfig;
use crate::store::RetryPolicy;

// ============================================================================
// Store Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/voicelog";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

/// Default number of objects processed at once.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Default number of succeeded objects between progress log lines.
pub const DEFAULT_PROGRESS_EVERY: u64 = 100;

/// Ingestion configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    pub source: SourceConfig,
    pub store: StoreConfig,
    pub pipeline: PipelineConfig,
}

/// Where export documents are read from
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    /// When set, documents are read from this directory instead of S3
    pub local_dir: Option<PathBuf>,
    pub s3: S3SourceConfig,
}

/// Aggregate store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(skip_serializing)]
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub retry: RetryPolicy,
}

/// Per-run processing options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub concurrency: usize,
    pub progress_every: u64,
    pub duplicate_policy: DuplicatePolicy,
    pub identifier_policy: IdentifierPolicy,
    pub identifier_precedence: IdentifierPrecedence,
    /// Reject objects whose file name timestamp does not parse, before
    /// fetching them
    pub strict_timestamps: bool,
}

impl IngestConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = IngestConfig {
            source: SourceConfig {
                local_dir: std::env::var("VOICELOG_LOCAL_DIR")
                    .ok()
                    .filter(|v| !v.is_empty())
                    .map(PathBuf::from),
                s3: S3SourceConfig::from_env(),
            },
            store: StoreConfig {
                database_url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_or("DATABASE_IDLE_TIMEOUT", DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
                retry: RetryPolicy {
                    max_attempts: env_or("STORE_RETRY_MAX_ATTEMPTS", RetryPolicy::default().max_attempts),
                    base_delay_ms: env_or("STORE_RETRY_BASE_DELAY_MS", RetryPolicy::default().base_delay_ms),
                    max_delay_ms: env_or("STORE_RETRY_MAX_DELAY_MS", RetryPolicy::default().max_delay_ms),
                },
            },
            pipeline: PipelineConfig {
                concurrency: env_or("VOICELOG_CONCURRENCY", DEFAULT_CONCURRENCY),
                progress_every: env_or("VOICELOG_PROGRESS_EVERY", DEFAULT_PROGRESS_EVERY),
                duplicate_policy: env_policy("VOICELOG_DUPLICATE_POLICY")?.unwrap_or_default(),
                identifier_policy: env_policy("VOICELOG_IDENTIFIER_POLICY")?.unwrap_or_default(),
                identifier_precedence: env_policy("VOICELOG_IDENTIFIER_PRECEDENCE")?
                    .unwrap_or_default(),
                strict_timestamps: env_or("VOICELOG_STRICT_TIMESTAMPS", false),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pipeline.concurrency == 0 {
            anyhow::bail!("Pipeline concurrency must be greater than 0");
        }

        if self.pipeline.progress_every == 0 {
            anyhow::bail!("Progress interval must be greater than 0");
        }

        if self.store.database_url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.store.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.store.min_connections > self.store.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.store.min_connections,
                self.store.max_connections
            );
        }

        if self.store.retry.max_attempts == 0 {
            anyhow::bail!("Store retry max_attempts must be at least 1");
        }

        if self.source.local_dir.is_none() && self.source.s3.bucket.is_empty() {
            anyhow::bail!("Either a local export directory or an S3 bucket is required");
        }

        if self.pipeline.concurrency as u32 > self.store.max_connections {
            tracing::warn!(
                concurrency = self.pipeline.concurrency,
                max_connections = self.store.max_connections,
                "Concurrency exceeds the database pool size; workers will queue for connections"
            );
        }

        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            retry: RetryPolicy::default(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            progress_every: DEFAULT_PROGRESS_EVERY,
            duplicate_policy: DuplicatePolicy::default(),
            identifier_policy: IdentifierPolicy::default(),
            identifier_precedence: IdentifierPrecedence::default(),
            strict_timestamps: false,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Policy values are rejected rather than silently defaulted
fn env_policy<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {}", name)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config_is_valid() {
        IngestConfig::default().validate().unwrap();
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let mut config = IngestConfig::default();
        config.pipeline.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pool_bounds_are_checked() {
        let mut config = IngestConfig::default();
        config.store.min_connections = 20;
        config.store.max_connections = 5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_connections"));
    }

    #[test]
    #[serial]
    fn test_load_reads_pipeline_policies() {
        std::env::set_var("VOICELOG_DUPLICATE_POLICY", "skip-existing");
        std::env::set_var("VOICELOG_IDENTIFIER_POLICY", "strip_plus");
        std::env::set_var("VOICELOG_CONCURRENCY", "3");

        let config = IngestConfig::load().unwrap();
        assert_eq!(config.pipeline.duplicate_policy, DuplicatePolicy::SkipExisting);
        assert_eq!(config.pipeline.identifier_policy, IdentifierPolicy::StripPlus);
        assert_eq!(
            config.pipeline.identifier_precedence,
            IdentifierPrecedence::MarkupFirst
        );
        assert_eq!(config.pipeline.concurrency, 3);

        std::env::remove_var("VOICELOG_DUPLICATE_POLICY");
        std::env::remove_var("VOICELOG_IDENTIFIER_POLICY");
        std::env::remove_var("VOICELOG_CONCURRENCY");
    }

    #[test]
    #[serial]
    fn test_load_rejects_unknown_policy() {
        std::env::set_var("VOICELOG_DUPLICATE_POLICY", "overwrite");
        let result = IngestConfig::load();
        std::env::remove_var("VOICELOG_DUPLICATE_POLICY");

        assert!(result.is_err());
    }
}
