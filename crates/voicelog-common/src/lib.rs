//! Voicelog Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the voicelog workspace.
//!
//! # Overview
//!
//! - **Types**: the record shapes that flow through the ingestion pipeline
//!   (file metadata, extracted records, canonical records, stored aggregates)
//! - **Logging**: centralized `tracing` subscriber setup
//! - **Error Handling**: shared error and result types
//!
//! # Example
//!
//! ```no_run
//! use voicelog_common::types::RecordKind;
//!
//! fn main() -> voicelog_common::Result<()> {
//!     let kind: RecordKind = "missed_call".parse()?;
//!     assert!(kind.is_call());
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, VoicelogError};
