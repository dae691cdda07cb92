//! Export file name parsing
//!
//! Export files are named `"<identifier> - <Text|Received|Missed> - <YYYY-MM-DD>T<HH>_<MM>_<SS>Z.html"`.
//! Colons are not allowed in the exported file names, so the time portion
//! uses `_` and has to be translated back before it is a timestamp.

use chrono::{DateTime, NaiveDateTime, Utc};
use voicelog_common::types::{Category, FileMetadata};

use crate::error::{IngestError, Result};

/// Separator between the three name segments
pub const SEGMENT_SEPARATOR: &str = " - ";

/// Suffix every export document carries
pub const DOCUMENT_SUFFIX: &str = ".html";

/// Format of the translated filename timestamp
pub const FILENAME_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Derives `FileMetadata` from object keys
#[derive(Debug, Clone, Copy, Default)]
pub struct FileNameParser;

impl FileNameParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse an object key into file metadata
    ///
    /// Directory components are ignored. An unrecognised category is not an
    /// error; it yields `Category::Unknown` and the caller decides whether to
    /// skip the object.
    pub fn parse(&self, key: &str) -> Result<FileMetadata> {
        let file_name = key.rsplit('/').next().unwrap_or(key);
        let segments: Vec<&str> = file_name.split(SEGMENT_SEPARATOR).collect();

        let &[identifier, category, timestamp] = segments.as_slice() else {
            return Err(IngestError::MalformedKey {
                key: key.to_string(),
                reason: format!(
                    "expected 3 {:?}-separated segments, found {}",
                    SEGMENT_SEPARATOR,
                    segments.len()
                ),
            });
        };

        let (category, received_flag) = classify(category);
        let raw_timestamp = timestamp
            .strip_suffix(DOCUMENT_SUFFIX)
            .unwrap_or(timestamp)
            .replace('_', ":");

        Ok(FileMetadata {
            key: key.to_string(),
            identifier: identifier.to_string(),
            category,
            received_flag,
            raw_timestamp,
        })
    }

    /// Parse the metadata's raw timestamp against the fixed filename format
    pub fn timestamp(&self, meta: &FileMetadata) -> Result<DateTime<Utc>> {
        parse_filename_timestamp(&meta.raw_timestamp)
    }
}

/// Fixed three-way category table
fn classify(segment: &str) -> (Category, Option<bool>) {
    match segment {
        "Text" => (Category::Text, Some(true)),
        "Received" => (Category::Call, Some(true)),
        "Missed" => (Category::Call, Some(false)),
        _ => (Category::Unknown, None),
    }
}

pub fn parse_filename_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, FILENAME_TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| IngestError::TimestampFormat {
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};
    use proptest::prelude::*;

    #[test]
    fn test_parse_text_key() {
        let meta = FileNameParser::new()
            .parse("+15551234567 - Text - 2023-03-01T10_15_00Z.html")
            .unwrap();

        assert_eq!(meta.identifier, "+15551234567");
        assert_eq!(meta.category, Category::Text);
        assert_eq!(meta.received_flag, Some(true));
        assert_eq!(meta.raw_timestamp, "2023-03-01T10:15:00Z");
    }

    #[test]
    fn test_parse_call_keys() {
        let parser = FileNameParser::new();

        let missed = parser
            .parse("+15551234567 - Missed - 2023-03-01T10_15_00Z.html")
            .unwrap();
        assert_eq!(missed.category, Category::Call);
        assert_eq!(missed.received_flag, Some(false));

        let received = parser
            .parse("+15551234567 - Received - 2023-03-01T10_15_00Z.html")
            .unwrap();
        assert_eq!(received.category, Category::Call);
        assert_eq!(received.received_flag, Some(true));
    }

    #[test]
    fn test_unknown_category_is_not_an_error() {
        let meta = FileNameParser::new()
            .parse("+15551234567 - Voicemail - 2023-03-01T10_15_00Z.html")
            .unwrap();
        assert_eq!(meta.category, Category::Unknown);
        assert_eq!(meta.received_flag, None);
    }

    #[test]
    fn test_category_match_is_case_sensitive() {
        let meta = FileNameParser::new()
            .parse("+15551234567 - text - 2023-03-01T10_15_00Z.html")
            .unwrap();
        assert_eq!(meta.category, Category::Unknown);
    }

    #[test]
    fn test_directory_prefix_is_ignored() {
        let meta = FileNameParser::new()
            .parse("Takeout/Voice/Calls/+15551234567 - Received - 2023-03-01T10_15_00Z.html")
            .unwrap();
        assert_eq!(meta.identifier, "+15551234567");
        assert_eq!(meta.category, Category::Call);
    }

    #[test]
    fn test_wrong_segment_count_is_malformed() {
        let parser = FileNameParser::new();
        for key in [
            "",
            "+15551234567.html",
            "+15551234567 - Text.html",
            "Group Conversation - +1555 - Text - 2023-03-01T10_15_00Z.html",
        ] {
            let err = parser.parse(key).unwrap_err();
            assert!(
                matches!(err, IngestError::MalformedKey { .. }),
                "{key:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_timestamp_parse() {
        let parser = FileNameParser::new();
        let meta = parser
            .parse("+15551234567 - Text - 2023-03-01T10_15_00Z.html")
            .unwrap();
        let ts = parser.timestamp(&meta).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2023, 3, 1, 10, 15, 0).unwrap());
    }

    #[test]
    fn test_timestamp_format_error_is_distinct() {
        let parser = FileNameParser::new();
        let meta = parser
            .parse("+15551234567 - Text - March first.html")
            .unwrap();
        let err = parser.timestamp(&meta).unwrap_err();
        assert!(matches!(err, IngestError::TimestampFormat { ref value } if value == "March first"));
    }

    proptest! {
        #[test]
        fn prop_category_table(
            identifier in "\\+?[0-9]{7,15}",
            category in prop::sample::select(vec!["Text", "Received", "Missed", "Voicemail", "Placed", "Recorded"]),
        ) {
            let key = format!("{identifier} - {category} - 2023-03-01T10_15_00Z.html");
            let meta = FileNameParser::new().parse(&key).unwrap();
            let expected = match category {
                "Text" => (Category::Text, Some(true)),
                "Received" => (Category::Call, Some(true)),
                "Missed" => (Category::Call, Some(false)),
                _ => (Category::Unknown, None),
            };
            prop_assert_eq!((meta.category, meta.received_flag), expected);
            prop_assert_eq!(meta.identifier, identifier);
        }

        #[test]
        fn prop_non_three_segments_fail(segments in prop::collection::vec("[A-Za-z0-9+]{1,8}", 0..7usize)) {
            prop_assume!(segments.len() != 3);
            let key = format!("{}.html", segments.join(SEGMENT_SEPARATOR));
            let result = FileNameParser::new().parse(&key);
            let is_malformed = matches!(result, Err(IngestError::MalformedKey { .. }));
            prop_assert!(is_malformed);
        }

        #[test]
        fn prop_timestamp_round_trip(secs in 0i64..4_102_444_800i64) {
            let original = DateTime::<Utc>::from_timestamp(secs, 0).unwrap();
            let key = format!(
                "+15551234567 - Text - {}.html",
                original.format("%Y-%m-%dT%H_%M_%SZ")
            );
            let parser = FileNameParser::new();
            let meta = parser.parse(&key).unwrap();
            let parsed = parser.timestamp(&meta).unwrap();
            prop_assert_eq!(parsed, original);
            prop_assert_eq!(parsed.year(), original.year());
            prop_assert_eq!(parsed.second(), original.second());
        }
    }
}
