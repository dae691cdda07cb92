//! Record types shared across the voicelog pipeline
//!
//! The flow is `RawObjectRef` → `FileMetadata` + `ExtractedRecord` →
//! `CanonicalRecord` → `StoredAggregate`. Only the aggregate is durable.

use serde::{Deserialize, Serialize};

use crate::error::{Result, VoicelogError};

/// One document in the external object store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawObjectRef {
    pub key: String,
    pub content_type: Option<String>,
}

impl RawObjectRef {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Conversation category encoded in an export file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Text,
    Call,
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Text => "text",
            Category::Call => "call",
            Category::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata derived from an object key, without touching its content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Object key the metadata was derived from
    pub key: String,
    /// Phone number exactly as it appears in the file name
    pub identifier: String,
    pub category: Category,
    /// `Some(true)` for texts and received calls, `Some(false)` for missed calls
    pub received_flag: Option<bool>,
    /// `YYYY-MM-DDTHH:MM:SSZ` after suffix strip and `_` → `:` translation
    pub raw_timestamp: String,
}

/// Kind of a communication event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Text,
    ReceivedCall,
    MissedCall,
    /// A call whose direction is not known yet
    Call,
    Unknown,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Text => "text",
            RecordKind::ReceivedCall => "received_call",
            RecordKind::MissedCall => "missed_call",
            RecordKind::Call => "call",
            RecordKind::Unknown => "unknown",
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(
            self,
            RecordKind::ReceivedCall | RecordKind::MissedCall | RecordKind::Call
        )
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordKind {
    type Err = VoicelogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(RecordKind::Text),
            "received_call" | "received call" => Ok(RecordKind::ReceivedCall),
            "missed_call" | "missed call" => Ok(RecordKind::MissedCall),
            "call" => Ok(RecordKind::Call),
            "unknown" => Ok(RecordKind::Unknown),
            _ => Err(VoicelogError::invalid("record kind", s)),
        }
    }
}

/// One record pulled out of a document's markup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    /// Phone number from the markup with the `tel:` scheme removed, or
    /// `"Unknown"` when the fragment carries none
    pub identifier: String,
    /// Timestamp text as found in the markup
    pub timestamp: String,
    pub kind: RecordKind,
    pub content: Option<String>,
    pub duration: Option<String>,
}

/// Storage-ready record for one message or call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub identifier: String,
    /// Always `YYYY-MM-DDTHH:MM:SSZ`
    pub timestamp: String,
    pub kind: RecordKind,
    pub content: Option<String>,
    pub duration: Option<String>,
    pub received: Option<bool>,
    pub source_key: String,
}

/// One event inside a stored aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: String,
    pub kind: RecordKind,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_key: Option<String>,
}

impl HistoryEntry {
    /// Whether both entries describe the same event
    ///
    /// Identity is `(timestamp, kind, content)`; duration and provenance are
    /// ignored so a re-export with different file names still de-duplicates.
    pub fn same_event(&self, other: &HistoryEntry) -> bool {
        self.timestamp == other.timestamp && self.kind == other.kind && self.content == other.content
    }

    /// JSON object holding only the identity fields
    pub fn identity(&self) -> serde_json::Value {
        serde_json::json!({
            "timestamp": self.timestamp,
            "kind": self.kind,
            "content": self.content,
        })
    }
}

impl From<&CanonicalRecord> for HistoryEntry {
    fn from(record: &CanonicalRecord) -> Self {
        Self {
            timestamp: record.timestamp.clone(),
            kind: record.kind,
            content: record.content.clone(),
            duration: record.duration.clone(),
            source_key: Some(record.source_key.clone()),
        }
    }
}

/// Everything stored for one identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAggregate {
    pub identifier: String,
    /// Append-only, in arrival order
    pub entries: Vec<HistoryEntry>,
}

impl StoredAggregate {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            entries: Vec::new(),
        }
    }

    pub fn from_record(record: &CanonicalRecord) -> Self {
        Self {
            identifier: record.identifier.clone(),
            entries: vec![HistoryEntry::from(record)],
        }
    }

    pub fn contains(&self, entry: &HistoryEntry) -> bool {
        self.entries.iter().any(|existing| existing.same_event(entry))
    }

    /// Append unless the event is already present; returns whether it was added
    pub fn push_unique(&mut self, entry: HistoryEntry) -> bool {
        if self.contains(&entry) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
