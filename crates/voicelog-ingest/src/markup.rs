//! Conversation markup extraction
//!
//! Export documents come in three shapes:
//!
//! - **message log**: repeated `div.message` fragments with an `abbr.dt`
//!   timestamp, a `cite.sender a.tel` sender and the text in a `q` element
//! - **call log**: repeated `div.haudio` fragments with an `abbr.published`
//!   timestamp, an `a.tel` phone link and an optional `abbr.duration`
//! - **generic div** (newer exports): one `.timestamp` node plus either a
//!   `.message-content` node or a `.duration` node
//!
//! A fragment missing a required field is skipped and reported; its siblings
//! are still extracted. Only an undecodable document or one with no
//! recognisable shape fails the whole call.

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::{debug, warn};
use voicelog_common::types::{Category, ExtractedRecord, RecordKind};

use crate::error::{IngestError, Result};

/// Scheme prefix on telephone links
pub const TEL_SCHEME: &str = "tel:";

/// Identifier used when a fragment carries no phone number
pub const UNKNOWN_IDENTIFIER: &str = "Unknown";

/// Duration recorded for calls whose markup has none
pub const MISSING_DURATION: &str = "Unknown";

/// Content recorded for messages whose markup has no quoted text
pub const MISSING_MESSAGE: &str = "No message";

/// Markup layout a document was recognised as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentShape {
    MessageLog,
    CallLog,
    GenericDiv,
}

impl DocumentShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentShape::MessageLog => "message_log",
            DocumentShape::CallLog => "call_log",
            DocumentShape::GenericDiv => "generic_div",
        }
    }

    /// Shapes to try for a filename category, in order
    fn candidates(category: Category) -> &'static [DocumentShape] {
        match category {
            Category::Text => &[DocumentShape::MessageLog, DocumentShape::GenericDiv],
            Category::Call => &[DocumentShape::CallLog, DocumentShape::GenericDiv],
            Category::Unknown => &[
                DocumentShape::MessageLog,
                DocumentShape::CallLog,
                DocumentShape::GenericDiv,
            ],
        }
    }
}

/// A fragment that could not be turned into a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FragmentSkip {
    /// Position of the fragment within the document
    pub index: usize,
    pub shape: DocumentShape,
    pub reason: String,
}

/// Everything one document yielded
#[derive(Debug, Clone, Serialize)]
pub struct Extraction {
    pub shape: DocumentShape,
    pub records: Vec<ExtractedRecord>,
    pub skips: Vec<FragmentSkip>,
}

struct Selectors {
    message: Selector,
    message_time: Selector,
    message_sender: Selector,
    message_text: Selector,
    call: Selector,
    call_time: Selector,
    call_duration: Selector,
    tel: Selector,
    generic_time: Selector,
    generic_content: Selector,
    generic_duration: Selector,
}

impl Selectors {
    fn compile() -> Result<Self> {
        let parse = |css: &str| {
            Selector::parse(css)
                .map_err(|e| IngestError::Config(format!("Invalid selector {:?}: {}", css, e)))
        };

        Ok(Self {
            message: parse("div.message")?,
            message_time: parse("abbr.dt")?,
            message_sender: parse("cite.sender a.tel")?,
            message_text: parse("q")?,
            call: parse("div.haudio")?,
            call_time: parse("abbr.published")?,
            call_duration: parse("abbr.duration")?,
            tel: parse("a.tel")?,
            generic_time: parse(".timestamp")?,
            generic_content: parse(".message-content")?,
            generic_duration: parse(".duration")?,
        })
    }
}

/// Parses export documents into extracted records
pub struct MarkupExtractor {
    selectors: Selectors,
}

impl MarkupExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            selectors: Selectors::compile()?,
        })
    }

    /// Extract every record from one document
    ///
    /// Re-parses the bytes on every call.
    pub fn extract(&self, bytes: &[u8], category: Category) -> Result<Extraction> {
        let text = decode(bytes)?;
        let document = Html::parse_document(text);

        let shape = DocumentShape::candidates(category)
            .iter()
            .copied()
            .find(|shape| self.has_shape(&document, *shape))
            .ok_or_else(|| {
                IngestError::DocumentParse(format!(
                    "no recognisable conversation markup for category {}",
                    category
                ))
            })?;

        let outcomes: Vec<std::result::Result<ExtractedRecord, String>> = match shape {
            DocumentShape::MessageLog => document
                .select(&self.selectors.message)
                .map(|fragment| self.message(fragment))
                .collect(),
            DocumentShape::CallLog => document
                .select(&self.selectors.call)
                .map(|fragment| self.call(fragment))
                .collect(),
            DocumentShape::GenericDiv => vec![self.generic(&document)],
        };

        let mut records = Vec::with_capacity(outcomes.len());
        let mut skips = Vec::new();

        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(record) => records.push(record),
                Err(reason) => {
                    warn!(
                        index,
                        shape = shape.as_str(),
                        reason = %reason,
                        "Skipping fragment"
                    );
                    skips.push(FragmentSkip {
                        index,
                        shape,
                        reason,
                    });
                }
            }
        }

        debug!(
            shape = shape.as_str(),
            records = records.len(),
            skipped = skips.len(),
            "Extracted document"
        );

        Ok(Extraction {
            shape,
            records,
            skips,
        })
    }

    fn has_shape(&self, document: &Html, shape: DocumentShape) -> bool {
        let selector = match shape {
            DocumentShape::MessageLog => &self.selectors.message,
            DocumentShape::CallLog => &self.selectors.call,
            DocumentShape::GenericDiv => &self.selectors.generic_time,
        };
        document.select(selector).next().is_some()
    }

    fn message(&self, fragment: ElementRef<'_>) -> std::result::Result<ExtractedRecord, String> {
        let timestamp = first(fragment, &self.selectors.message_time)
            .and_then(|abbr| non_empty_attr(abbr, "title"))
            .ok_or("message has no abbr.dt timestamp")?;

        let identifier = first(fragment, &self.selectors.message_sender)
            .and_then(tel_number)
            .ok_or("message has no sender telephone link")?;

        let content = first(fragment, &self.selectors.message_text)
            .map(text_of)
            .unwrap_or_else(|| MISSING_MESSAGE.to_string());

        Ok(ExtractedRecord {
            identifier,
            timestamp,
            kind: RecordKind::Text,
            content: Some(content),
            duration: None,
        })
    }

    fn call(&self, fragment: ElementRef<'_>) -> std::result::Result<ExtractedRecord, String> {
        let timestamp = first(fragment, &self.selectors.call_time)
            .and_then(|abbr| non_empty_attr(abbr, "title"))
            .ok_or("call has no abbr.published timestamp")?;

        let identifier = first(fragment, &self.selectors.tel)
            .and_then(tel_number)
            .ok_or("call has no telephone link")?;

        let duration = first(fragment, &self.selectors.call_duration)
            .map(text_of)
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| MISSING_DURATION.to_string());

        Ok(ExtractedRecord {
            identifier,
            timestamp,
            kind: RecordKind::ReceivedCall,
            content: None,
            duration: Some(duration),
        })
    }

    fn generic(&self, document: &Html) -> std::result::Result<ExtractedRecord, String> {
        let root = document.root_element();

        let timestamp = first(root, &self.selectors.generic_time)
            .and_then(|node| non_empty_attr(node, "title").or_else(|| non_empty(text_of(node))))
            .ok_or("timestamp node is empty")?;

        let identifier = first(root, &self.selectors.tel)
            .and_then(tel_number)
            .unwrap_or_else(|| UNKNOWN_IDENTIFIER.to_string());

        let content = first(root, &self.selectors.generic_content).map(text_of);
        let duration = first(root, &self.selectors.generic_duration).map(text_of);

        let (kind, content, duration) = match (content, duration) {
            (Some(content), _) => (RecordKind::Text, Some(content), None),
            (None, Some(duration)) => (RecordKind::Call, None, Some(duration)),
            (None, None) => (RecordKind::Unknown, None, None),
        };

        Ok(ExtractedRecord {
            identifier,
            timestamp,
            kind,
            content,
            duration,
        })
    }
}

fn decode(bytes: &[u8]) -> Result<&str> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| IngestError::DocumentParse(format!("document is not valid UTF-8: {}", e)))?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text))
}

fn first<'a>(scope: ElementRef<'a>, selector: &Selector) -> Option<ElementRef<'a>> {
    scope.select(selector).next()
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

fn non_empty_attr(element: ElementRef<'_>, name: &str) -> Option<String> {
    element
        .value()
        .attr(name)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Phone number from an `a.tel` link, without the `tel:` scheme
fn tel_number(link: ElementRef<'_>) -> Option<String> {
    let href = link.value().attr("href")?.trim();
    let number = href.strip_prefix(TEL_SCHEME).unwrap_or(href).trim();
    (!number.is_empty()).then(|| number.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_fragment(title: &str, href: &str, text: &str) -> String {
        format!(
            r#"<div class="message"><abbr class="dt" title="{title}">{title}</abbr>:
<cite class="sender vcard"><a class="tel" href="{href}"><span class="fn">Alex</span></a></cite>:
<q>{text}</q></div>"#
        )
    }

    fn document(body: &str) -> Vec<u8> {
        format!(
            r#"<?xml version="1.0" ?><!DOCTYPE html><html><head><title>Alex</title></head><body><div class="hChatLog hfeed">{body}</div></body></html>"#
        )
        .into_bytes()
    }

    #[test]
    fn test_message_fragment() {
        let html = document(&message_fragment(
            "Mar 1, 2023 10:15:00 AM",
            "tel:+15551234567",
            "hello",
        ));
        let extraction = MarkupExtractor::new()
            .unwrap()
            .extract(&html, Category::Text)
            .unwrap();

        assert_eq!(extraction.shape, DocumentShape::MessageLog);
        assert!(extraction.skips.is_empty());
        assert_eq!(
            extraction.records,
            vec![ExtractedRecord {
                identifier: "+15551234567".to_string(),
                timestamp: "Mar 1, 2023 10:15:00 AM".to_string(),
                kind: RecordKind::Text,
                content: Some("hello".to_string()),
                duration: None,
            }]
        );
    }

    #[test]
    fn test_bad_fragment_does_not_abort_siblings() {
        let body = format!(
            "{}{}",
            message_fragment("Mar 1, 2023 10:15:00 AM", "tel:+15551234567", "hello"),
            r#"<div class="message"><cite class="sender vcard"><a class="tel" href="tel:+15551234567"></a></cite><q>no time</q></div>"#
        );
        let extraction = MarkupExtractor::new()
            .unwrap()
            .extract(&document(&body), Category::Text)
            .unwrap();

        assert_eq!(extraction.records.len(), 1);
        assert_eq!(extraction.skips.len(), 1);
        assert_eq!(extraction.skips[0].index, 1);
        assert_eq!(extraction.skips[0].shape, DocumentShape::MessageLog);
    }

    #[test]
    fn test_message_without_sender_is_skipped() {
        let body = r#"<div class="message"><abbr class="dt" title="2023-03-01T10:15:00.000-05:00">x</abbr><q>hi</q></div>"#;
        let extraction = MarkupExtractor::new()
            .unwrap()
            .extract(&document(body), Category::Text)
            .unwrap();
        assert!(extraction.records.is_empty());
        assert_eq!(extraction.skips.len(), 1);
    }

    #[test]
    fn test_message_without_text_gets_placeholder() {
        let body = r#"<div class="message"><abbr class="dt" title="2023-03-01T10:15:00Z">x</abbr><cite class="sender vcard"><a class="tel" href="tel:+15551234567">Alex</a></cite></div>"#;
        let extraction = MarkupExtractor::new()
            .unwrap()
            .extract(&document(body), Category::Text)
            .unwrap();
        assert_eq!(extraction.records.len(), 1);
        assert_eq!(extraction.records[0].content.as_deref(), Some(MISSING_MESSAGE));
        assert!(extraction.skips.is_empty());
    }

    #[test]
    fn test_call_fragments() {
        let body = r#"
<div class="haudio">
  <span class="fn">Alex</span>
  <abbr class="published" title="2023-03-01T10:15:00.000-05:00">Mar 1, 2023</abbr>
  <a class="tel" href="tel:+15551234567">+1 555-123-4567</a>
  <abbr class="duration" title="PT1M2S">(00:01:02)</abbr>
</div>
<div class="haudio">
  <abbr class="published" title="2023-03-02T09:00:00.000-05:00">Mar 2, 2023</abbr>
  <a class="tel" href="tel:+15551234567">+1 555-123-4567</a>
</div>
<div class="haudio"><a class="tel" href="tel:+15551234567">no time</a></div>"#;

        let extraction = MarkupExtractor::new()
            .unwrap()
            .extract(&document(body), Category::Call)
            .unwrap();

        assert_eq!(extraction.shape, DocumentShape::CallLog);
        assert_eq!(extraction.records.len(), 2);
        assert_eq!(extraction.skips.len(), 1);

        let first = &extraction.records[0];
        assert_eq!(first.identifier, "+15551234567");
        assert_eq!(first.kind, RecordKind::ReceivedCall);
        assert_eq!(first.duration.as_deref(), Some("(00:01:02)"));
        assert_eq!(
            extraction.records[1].duration.as_deref(),
            Some(MISSING_DURATION)
        );
    }

    #[test]
    fn test_generic_div_shapes() {
        let extractor = MarkupExtractor::new().unwrap();

        let text = document(
            r#"<div class="timestamp" title="2024-05-01T08:00:00Z">May 1</div><div class="message-content"> see you </div>"#,
        );
        let record = &extractor.extract(&text, Category::Text).unwrap().records[0];
        assert_eq!(record.kind, RecordKind::Text);
        assert_eq!(record.content.as_deref(), Some("see you"));
        assert_eq!(record.identifier, UNKNOWN_IDENTIFIER);

        let call = document(
            r#"<div class="timestamp">2024-05-01T08:00:00Z</div><a class="tel" href="tel:+15550001111">x</a><div class="duration">00:03:00</div>"#,
        );
        let record = &extractor.extract(&call, Category::Call).unwrap().records[0];
        assert_eq!(record.kind, RecordKind::Call);
        assert_eq!(record.identifier, "+15550001111");
        assert_eq!(record.timestamp, "2024-05-01T08:00:00Z");
        assert_eq!(record.duration.as_deref(), Some("00:03:00"));

        let neither = document(r#"<div class="timestamp">2024-05-01T08:00:00Z</div>"#);
        let extraction = extractor.extract(&neither, Category::Text).unwrap();
        assert_eq!(extraction.records.len(), 1);
        assert_eq!(extraction.records[0].kind, RecordKind::Unknown);
        assert_eq!(extraction.records[0].content, None);
    }

    #[test]
    fn test_unrecognised_document_fails() {
        let err = MarkupExtractor::new()
            .unwrap()
            .extract(b"<html><body><p>nothing here</p></body></html>", Category::Text)
            .unwrap_err();
        assert!(matches!(err, IngestError::DocumentParse(_)));
    }

    #[test]
    fn test_call_markup_in_text_document_is_not_guessed() {
        let body = r#"<div class="haudio"><abbr class="published" title="2023-03-01T10:15:00Z">x</abbr><a class="tel" href="tel:+1">x</a></div>"#;
        let extractor = MarkupExtractor::new().unwrap();
        assert!(extractor.extract(&document(body), Category::Text).is_err());
        assert_eq!(
            extractor
                .extract(&document(body), Category::Unknown)
                .unwrap()
                .shape,
            DocumentShape::CallLog
        );
    }

    #[test]
    fn test_invalid_utf8_fails_whole_document() {
        let err = MarkupExtractor::new()
            .unwrap()
            .extract(&[0x3c, 0xff, 0xfe, 0x3e], Category::Text)
            .unwrap_err();
        assert!(matches!(err, IngestError::DocumentParse(_)));
    }

    #[test]
    fn test_byte_order_mark_is_tolerated() {
        let mut html = vec![0xef, 0xbb, 0xbf];
        html.extend(document(&message_fragment("2023-03-01T10:15:00Z", "tel:+15551234567", "hi")));
        let extraction = MarkupExtractor::new()
            .unwrap()
            .extract(&html, Category::Text)
            .unwrap();
        assert_eq!(extraction.records.len(), 1);
    }
}
