//! Merging file metadata and extracted markup into canonical records
//!
//! Two sources can disagree about who a record belongs to: the file name and
//! the markup. The winner is chosen by `IdentifierPrecedence`, and then one
//! `IdentifierPolicy` is applied to it, so the stored key never depends on
//! which source happened to win.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use voicelog_common::types::{CanonicalRecord, Category, ExtractedRecord, FileMetadata, RecordKind};
use voicelog_common::VoicelogError;

use crate::error::{IngestError, Result};
use crate::markup::UNKNOWN_IDENTIFIER;

/// Canonical timestamp format stored in every aggregate
pub const CANONICAL_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Zone-less layouts seen in exports, interpreted as UTC
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%b %d, %Y %I:%M:%S %p",
    "%b %d, %Y, %I:%M:%S %p",
];

/// How identifiers are written before they become store keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierPolicy {
    /// Keep the number exactly as exported (`+15551234567`)
    #[default]
    Verbatim,
    /// Drop leading `+` signs (`15551234567`)
    StripPlus,
}

impl IdentifierPolicy {
    pub fn apply(&self, identifier: &str) -> String {
        match self {
            IdentifierPolicy::Verbatim => identifier.to_string(),
            IdentifierPolicy::StripPlus => identifier.trim_start_matches('+').to_string(),
        }
    }
}

impl std::str::FromStr for IdentifierPolicy {
    type Err = VoicelogError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "verbatim" => Ok(IdentifierPolicy::Verbatim),
            "strip-plus" => Ok(IdentifierPolicy::StripPlus),
            _ => Err(VoicelogError::invalid("identifier policy", s)),
        }
    }
}

/// Which identifier wins when the file name and the markup disagree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierPrecedence {
    /// Use the markup phone number unless it is missing or `"Unknown"`
    #[default]
    MarkupFirst,
    /// Use the file name phone number unless it is empty
    FilenameFirst,
}

impl std::str::FromStr for IdentifierPrecedence {
    type Err = VoicelogError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "markup" | "markup-first" => Ok(IdentifierPrecedence::MarkupFirst),
            "filename" | "filename-first" => Ok(IdentifierPrecedence::FilenameFirst),
            _ => Err(VoicelogError::invalid("identifier precedence", s)),
        }
    }
}

/// Reconciles file metadata with extracted records
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordNormalizer {
    policy: IdentifierPolicy,
    precedence: IdentifierPrecedence,
}

impl RecordNormalizer {
    pub fn new(policy: IdentifierPolicy, precedence: IdentifierPrecedence) -> Self {
        Self { policy, precedence }
    }

    pub fn normalize(&self, meta: &FileMetadata, raw: ExtractedRecord) -> Result<CanonicalRecord> {
        let identifier = self.resolve_identifier(meta, &raw)?;
        let kind = resolve_kind(meta, raw.kind);
        let timestamp = canonical_timestamp(&raw.timestamp)?;

        let received = match kind {
            RecordKind::ReceivedCall => Some(true),
            RecordKind::MissedCall => Some(false),
            _ => meta.received_flag,
        };

        Ok(CanonicalRecord {
            identifier,
            timestamp,
            kind,
            content: raw.content,
            duration: raw.duration,
            received,
            source_key: meta.key.clone(),
        })
    }

    fn resolve_identifier(&self, meta: &FileMetadata, raw: &ExtractedRecord) -> Result<String> {
        let from_markup = Some(raw.identifier.trim())
            .filter(|id| !id.is_empty() && *id != UNKNOWN_IDENTIFIER);
        let from_filename = Some(meta.identifier.trim()).filter(|id| !id.is_empty());

        if let (Some(markup), Some(filename)) = (from_markup, from_filename) {
            if self.policy.apply(markup) != self.policy.apply(filename) {
                debug!(
                    key = %meta.key,
                    markup,
                    filename,
                    precedence = ?self.precedence,
                    "Identifier disagreement between file name and markup"
                );
            }
        }

        let chosen = match self.precedence {
            IdentifierPrecedence::MarkupFirst => from_markup.or(from_filename),
            IdentifierPrecedence::FilenameFirst => from_filename.or(from_markup),
        };

        chosen
            .map(|id| self.policy.apply(id))
            .ok_or_else(|| IngestError::MissingIdentifier {
                key: meta.key.clone(),
            })
    }
}

/// Markup kind wins; the file name only refines call direction or fills in
/// for markup that could not classify itself
fn resolve_kind(meta: &FileMetadata, markup: RecordKind) -> RecordKind {
    let directed_call = |fallback: RecordKind| match (meta.category, meta.received_flag) {
        (Category::Call, Some(true)) => RecordKind::ReceivedCall,
        (Category::Call, Some(false)) => RecordKind::MissedCall,
        _ => fallback,
    };

    match markup {
        RecordKind::Text => RecordKind::Text,
        RecordKind::ReceivedCall | RecordKind::MissedCall | RecordKind::Call => directed_call(markup),
        RecordKind::Unknown => match meta.category {
            Category::Text => RecordKind::Text,
            Category::Call => directed_call(RecordKind::Call),
            Category::Unknown => RecordKind::Unknown,
        },
    }
}

/// Convert an export timestamp to `YYYY-MM-DDTHH:MM:SSZ`
pub fn canonical_timestamp(raw: &str) -> Result<String> {
    let trimmed = raw.trim();

    let parsed = DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NAIVE_TIMESTAMP_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
                .map(|naive| naive.and_utc())
        })
        .ok_or_else(|| IngestError::TimestampFormat {
            value: raw.to_string(),
        })?;

    Ok(parsed.format(CANONICAL_TIMESTAMP_FORMAT).to_string())
}
