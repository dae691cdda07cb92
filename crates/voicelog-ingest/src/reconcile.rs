//! Deciding what a new record does to stored state
//!
//! The engine is pure: it looks at a canonical record and the aggregate
//! currently stored for its identifier and returns an `Action`. Performing
//! the action is the driver's job, against whichever `AggregateStore` it
//! was given.

use serde::{Deserialize, Serialize};
use voicelog_common::types::{CanonicalRecord, HistoryEntry, StoredAggregate};
use voicelog_common::VoicelogError;

/// What to do when an identifier already has stored state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep every distinct event for the identifier
    #[default]
    History,
    /// The first record seen for an identifier is the only one kept
    SkipExisting,
}

impl std::str::FromStr for DuplicatePolicy {
    type Err = VoicelogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "history" => Ok(DuplicatePolicy::History),
            "skip-existing" => Ok(DuplicatePolicy::SkipExisting),
            _ => Err(VoicelogError::invalid("duplicate policy", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The same `(timestamp, kind, content)` is already in the history
    AlreadyRecorded,
    /// `SkipExisting` and the identifier already has an aggregate
    IdentifierExists,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "detail", rename_all = "snake_case")]
pub enum Action {
    Insert(StoredAggregate),
    AppendHistory {
        identifier: String,
        entry: HistoryEntry,
    },
    SkipDuplicate(SkipReason),
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Insert(_) => "insert",
            Action::AppendHistory { .. } => "append_history",
            Action::SkipDuplicate(_) => "skip_duplicate",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconciliationEngine {
    policy: DuplicatePolicy,
}

impl ReconciliationEngine {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    pub fn reconcile(
        &self,
        record: &CanonicalRecord,
        existing: Option<&StoredAggregate>,
    ) -> Action {
        let Some(existing) = existing else {
            return Action::Insert(StoredAggregate::from_record(record));
        };

        match self.policy {
            DuplicatePolicy::SkipExisting => Action::SkipDuplicate(SkipReason::IdentifierExists),
            DuplicatePolicy::History => {
                let entry = HistoryEntry::from(record);
                if existing.contains(&entry) {
                    Action::SkipDuplicate(SkipReason::AlreadyRecorded)
                } else {
                    Action::AppendHistory {
                        identifier: record.identifier.clone(),
                        entry,
                    }
                }
            }
        }
    }
}

/// In-memory application of an `Action` to an aggregate
pub trait ApplyAction {
    /// Returns whether the aggregate changed
    fn apply(&mut self, action: &Action) -> bool;
}

impl ApplyAction for StoredAggregate {
    fn apply(&mut self, action: &Action) -> bool {
        match action {
            Action::Insert(inserted) if inserted.identifier == self.identifier => inserted
                .entries
                .iter()
                .fold(false, |changed, entry| self.push_unique(entry.clone()) || changed),
            Action::AppendHistory { identifier, entry } if *identifier == self.identifier => {
                self.push_unique(entry.clone())
            }
            _ => false,
        }
    }
}

impl ApplyAction for Option<StoredAggregate> {
    fn apply(&mut self, action: &Action) -> bool {
        if let Some(aggregate) = self {
            return aggregate.apply(action);
        }

        let created = match action {
            Action::Insert(inserted) => inserted.clone(),
            Action::AppendHistory { identifier, entry } => {
                let mut aggregate = StoredAggregate::new(identifier.clone());
                aggregate.entries.push(entry.clone());
                aggregate
            }
            Action::SkipDuplicate(_) => return false,
        };
        *self = Some(created);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicelog_common::types::RecordKind;

    fn record(timestamp: &str, content: &str) -> CanonicalRecord {
        CanonicalRecord {
            identifier: "+15551234567".to_string(),
            timestamp: timestamp.to_string(),
            kind: RecordKind::Text,
            content: Some(content.to_string()),
            duration: None,
            received: Some(true),
            source_key: "+15551234567 - Text - 2023-03-01T10_15_00Z.html".to_string(),
        }
    }

    #[test]
    fn test_no_aggregate_inserts() {
        let first = record("2023-03-01T10:15:00Z", "hello");
        let action = ReconciliationEngine::default().reconcile(&first, None);
        assert_eq!(action, Action::Insert(StoredAggregate::from_record(&first)));
    }

    #[test]
    fn test_same_record_twice_appends_then_skips() {
        let engine = ReconciliationEngine::default();
        let mut stored = StoredAggregate::from_record(&record("2023-03-01T10:15:00Z", "hello"));
        let second = record("2023-03-01T10:16:00Z", "again");

        let action = engine.reconcile(&second, Some(&stored));
        assert!(matches!(action, Action::AppendHistory { .. }));
        assert!(stored.apply(&action));
        let after_first = stored.clone();

        let action = engine.reconcile(&second, Some(&stored));
        assert_eq!(action, Action::SkipDuplicate(SkipReason::AlreadyRecorded));
        assert!(!stored.apply(&action));
        assert_eq!(stored, after_first);
        assert_eq!(stored.len(), 2);
    }

    #[test]
    fn test_applying_an_append_twice_is_idempotent() {
        let mut stored = StoredAggregate::from_record(&record("2023-03-01T10:15:00Z", "hello"));
        let action = ReconciliationEngine::default()
            .reconcile(&record("2023-03-01T10:16:00Z", "again"), Some(&stored));

        stored.apply(&action);
        let once = stored.clone();
        stored.apply(&action);
        assert_eq!(stored, once);
    }

    #[test]
    fn test_skip_existing_policy() {
        let engine = ReconciliationEngine::new(DuplicatePolicy::SkipExisting);
        let stored = StoredAggregate::from_record(&record("2023-03-01T10:15:00Z", "hello"));
        let action = engine.reconcile(&record("2023-03-01T10:16:00Z", "again"), Some(&stored));
        assert_eq!(action, Action::SkipDuplicate(SkipReason::IdentifierExists));
    }

    #[test]
    fn test_provenance_does_not_defeat_dedup() {
        let stored = StoredAggregate::from_record(&record("2023-03-01T10:15:00Z", "hello"));
        let mut renamed = record("2023-03-01T10:15:00Z", "hello");
        renamed.source_key = "other/export.html".to_string();
        let action = ReconciliationEngine::default().reconcile(&renamed, Some(&stored));
        assert_eq!(action, Action::SkipDuplicate(SkipReason::AlreadyRecorded));
    }

    #[test]
    fn test_apply_to_missing_aggregate() {
        let first = record("2023-03-01T10:15:00Z", "hello");
        let mut slot: Option<StoredAggregate> = None;
        assert!(slot.apply(&Action::Insert(StoredAggregate::from_record(&first))));
        assert!(!slot.apply(&Action::Insert(StoredAggregate::from_record(&first))));
        assert_eq!(slot.map(|a| a.len()), Some(1));
    }

    #[test]
    fn test_action_serializes_with_tag() {
        let json = serde_json::to_value(Action::SkipDuplicate(SkipReason::IdentifierExists)).unwrap();
        assert_eq!(json["action"], "skip_duplicate");
    }
}
