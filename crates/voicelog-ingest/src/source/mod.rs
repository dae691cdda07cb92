//! Object sources: where export documents come from
//!
//! The driver only sees `ObjectSource`. Production runs read an S3 bucket,
//! local runs walk an unpacked export directory, and tests use
//! `MemorySource`.

use async_trait::async_trait;
use voicelog_common::types::RawObjectRef;

use crate::error::FetchError;

pub mod config;
pub mod local;
pub mod memory;
pub mod s3;

pub use config::S3SourceConfig;
pub use local::LocalDirSource;
pub use memory::MemorySource;
pub use s3::S3ObjectSource;

/// Read-only access to a keyed collection of export documents
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Every object whose key starts with `prefix`, fully paginated
    async fn list(&self, prefix: &str) -> Result<Vec<RawObjectRef>, FetchError>;

    /// Raw bytes of one object
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, FetchError>;

    /// Human readable location, for logs
    fn describe(&self) -> String;
}
