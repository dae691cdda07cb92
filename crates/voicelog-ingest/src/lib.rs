//! Voicelog Ingest Library
//!
//! Turns a phone-service export (one HTML document per conversation event)
//! into per-identifier conversation aggregates.
//!
//! # Pipeline
//!
//! - **filename**: object key → identifier, category, received flag, timestamp
//! - **markup**: document bytes → extracted records plus skipped fragments
//! - **normalize**: metadata + extracted record → canonical record
//! - **reconcile**: canonical record + stored aggregate → action
//! - **driver**: runs the above over many objects concurrently
//!
//! Objects come from an [`source::ObjectSource`] (S3 or a local directory)
//! and aggregates live in an [`store::AggregateStore`] (Postgres or memory).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use voicelog_ingest::config::PipelineConfig;
//! use voicelog_ingest::driver::IngestionDriver;
//! use voicelog_ingest::source::LocalDirSource;
//! use voicelog_ingest::store::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let driver = IngestionDriver::new(
//!         Arc::new(LocalDirSource::new("./Takeout/Voice/Calls")),
//!         Arc::new(MemoryStore::new()),
//!         PipelineConfig::default(),
//!     )?;
//!     let summary = driver.run_prefix("", CancellationToken::new()).await?;
//!     println!("{} objects ingested", summary.succeeded);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod filename;
pub mod markup;
pub mod normalize;
pub mod reconcile;
pub mod source;
pub mod store;

pub use driver::{IngestionDriver, Summary};
pub use error::{FetchError, IngestError, Result, StoreError};
