//! Annotation data model and the remote payload parse step.
//!
//! [`AnnotationRecord`] is the canonical shape the reconciler works with.
//! Remote services have historically returned the same data under several
//! field names; [`AnnotationRecord::from_remote_value`] accepts those aliases
//! and either yields a canonical record or a typed [`AnnotationParseError`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{trace, warn};
use uuid::Uuid;

use crate::error::{AnnotationParseError, Error, Result};

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// =============================================================================
// ANNOTATION KIND / COLOR
// =============================================================================

/// Categorical tag describing what an annotation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    #[default]
    Highlight,
    Note,
    Bookmark,
}

impl AnnotationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationKind::Highlight => "highlight",
            AnnotationKind::Note => "note",
            AnnotationKind::Bookmark => "bookmark",
        }
    }
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnnotationKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "highlight" => Ok(AnnotationKind::Highlight),
            "note" | "comment" => Ok(AnnotationKind::Note),
            "bookmark" => Ok(AnnotationKind::Bookmark),
            other => Err(format!("unknown annotation kind '{}'", other)),
        }
    }
}

/// Highlight color. Unknown values are preserved verbatim as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AnnotationColor {
    #[default]
    Yellow,
    Green,
    Blue,
    Pink,
    Purple,
    Orange,
    Custom(String),
}

impl AnnotationColor {
    pub fn as_str(&self) -> &str {
        match self {
            AnnotationColor::Yellow => "yellow",
            AnnotationColor::Green => "green",
            AnnotationColor::Blue => "blue",
            AnnotationColor::Pink => "pink",
            AnnotationColor::Purple => "purple",
            AnnotationColor::Orange => "orange",
            AnnotationColor::Custom(c) => c,
        }
    }
}

impl From<String> for AnnotationColor {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "yellow" => AnnotationColor::Yellow,
            "green" => AnnotationColor::Green,
            "blue" => AnnotationColor::Blue,
            "pink" => AnnotationColor::Pink,
            "purple" => AnnotationColor::Purple,
            "orange" => AnnotationColor::Orange,
            _ => AnnotationColor::Custom(s),
        }
    }
}

impl From<AnnotationColor> for String {
    fn from(c: AnnotationColor) -> Self {
        c.as_str().to_string()
    }
}

// =============================================================================
// ANNOTATION RECORD
// =============================================================================

/// Identity used when reconciling records from different sources.
///
/// Two records with the same key are the same logical annotation even when
/// their `id`s differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MergeKey<'a> {
    pub document_id: &'a str,
    pub location_key: &'a str,
}

/// A reading annotation anchored at a CFI within one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationRecord {
    /// Stable identifier, unique within the document's annotation set.
    pub id: String,
    /// Owning document.
    pub document_id: String,
    /// CFI anchor; the natural merge key.
    pub location_key: String,
    /// Highlighted excerpt.
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default)]
    pub kind: AnnotationKind,
    #[serde(default)]
    pub color: AnnotationColor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spine_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spine_title: Option<String>,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds. Bumped on every edit.
    pub updated_at: i64,
}

impl AnnotationRecord {
    /// Create a fresh highlight with a time-ordered id and both timestamps set to now.
    pub fn new(
        document_id: impl Into<String>,
        location_key: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::now_v7().to_string(),
            document_id: document_id.into(),
            location_key: location_key.into(),
            text: text.into(),
            note: None,
            kind: AnnotationKind::Highlight,
            color: AnnotationColor::default(),
            spine_index: None,
            spine_title: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self.kind = AnnotationKind::Note;
        self
    }

    pub fn with_kind(mut self, kind: AnnotationKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_color(mut self, color: AnnotationColor) -> Self {
        self.color = color;
        self
    }

    pub fn with_spine(mut self, index: u32, title: impl Into<String>) -> Self {
        self.spine_index = Some(index);
        self.spine_title = Some(title.into());
        self
    }

    pub fn with_timestamps(mut self, created_at: i64, updated_at: i64) -> Self {
        self.created_at = created_at;
        self.updated_at = updated_at;
        self
    }

    pub fn merge_key(&self) -> MergeKey<'_> {
        MergeKey {
            document_id: &self.document_id,
            location_key: &self.location_key,
        }
    }

    /// Mark the record as edited. `updated_at` always moves strictly forward,
    /// even when the clock has not advanced since the last edit.
    pub fn touch(&mut self) {
        self.updated_at = now_millis().max(self.updated_at + 1);
    }

    /// Parse one loosely-shaped remote entry into a canonical record.
    ///
    /// `document_id` is the document the entry was fetched for; it fills in a
    /// missing document field, and an entry naming a different document is
    /// rejected.
    pub fn from_remote_value(
        value: &JsonValue,
        document_id: &str,
    ) -> std::result::Result<Self, AnnotationParseError> {
        let obj = value.as_object().ok_or(AnnotationParseError::NotAnObject)?;

        let id = string_field(obj, "id", &["id", "_id", "annotationId", "annotation_id"])?
            .ok_or(AnnotationParseError::MissingField("id"))?;

        let location_key = string_field(
            obj,
            "locationKey",
            &["locationKey", "location_key", "cfi", "cfiRange", "cfi_range"],
        )?
        .filter(|s| !s.trim().is_empty())
        .ok_or(AnnotationParseError::MissingField("locationKey"))?;

        let owner = string_field(
            obj,
            "documentId",
            &["documentId", "document_id", "bookId", "book_id"],
        )?;
        if let Some(ref owner) = owner {
            if owner != document_id {
                return Err(AnnotationParseError::InvalidField {
                    field: "documentId",
                    reason: format!("belongs to '{}', expected '{}'", owner, document_id),
                });
            }
        }

        let text = string_field(obj, "text", &["text", "quote", "excerpt"])?.unwrap_or_default();
        let note = string_field(obj, "note", &["note", "comment"])?;

        let kind = match string_field(obj, "kind", &["kind", "type"])? {
            Some(raw) => raw
                .parse::<AnnotationKind>()
                .map_err(|reason| AnnotationParseError::InvalidField {
                    field: "kind",
                    reason,
                })?,
            None if note.as_deref().is_some_and(|n| !n.is_empty()) => AnnotationKind::Note,
            None => AnnotationKind::Highlight,
        };

        let color = string_field(obj, "color", &["color", "colour"])?
            .map(AnnotationColor::from)
            .unwrap_or_default();

        let spine_index = match first_present(obj, &["spineIndex", "spine_index", "chapterIndex"])
        {
            Some(v) => Some(parse_index(v)?),
            None => None,
        };
        let spine_title = string_field(
            obj,
            "spineTitle",
            &["spineTitle", "spine_title", "chapterTitle"],
        )?;

        let created_at = match first_present(obj, &["createdAt", "created_at"]) {
            Some(v) => Some(parse_timestamp("createdAt", v)?),
            None => None,
        };
        let updated_at = match first_present(obj, &["updatedAt", "updated_at", "modifiedAt"]) {
            Some(v) => Some(parse_timestamp("updatedAt", v)?),
            None => None,
        };
        let (created_at, updated_at) = match (created_at, updated_at) {
            (Some(c), Some(u)) => (c, u),
            (Some(c), None) => (c, c),
            (None, Some(u)) => (u, u),
            (None, None) => return Err(AnnotationParseError::MissingField("updatedAt")),
        };

        Ok(Self {
            id,
            document_id: document_id.to_string(),
            location_key,
            text,
            note,
            kind,
            color,
            spine_index,
            spine_title,
            created_at,
            updated_at,
        })
    }
}

/// Parse a remote annotation listing for `document_id`.
///
/// Accepts a bare array or an object wrapping the array under `annotations`,
/// `data` or `items`. Entries that fail the parse step are skipped with a
/// warning, so a single malformed entry never blocks the rest of the set.
pub fn parse_remote_annotations(
    payload: &JsonValue,
    document_id: &str,
) -> Result<Vec<AnnotationRecord>> {
    let items = match payload {
        JsonValue::Array(items) => items,
        JsonValue::Object(obj) => ["annotations", "data", "items"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(JsonValue::as_array))
            .ok_or_else(|| {
                Error::Parse(AnnotationParseError::InvalidField {
                    field: "annotations",
                    reason: "no annotation array in response".to_string(),
                })
            })?,
        _ => return Err(Error::Parse(AnnotationParseError::NotAnObject)),
    };

    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match AnnotationRecord::from_remote_value(item, document_id) {
            Ok(record) => {
                trace!(index, location_key = %record.location_key, "Parsed remote annotation");
                records.push(record);
            }
            Err(e) => {
                warn!(
                    document_id,
                    index,
                    error = %e,
                    "Skipping malformed remote annotation"
                );
            }
        }
    }
    Ok(records)
}

fn first_present<'a>(obj: &'a Map<String, JsonValue>, names: &[&str]) -> Option<&'a JsonValue> {
    names
        .iter()
        .filter_map(|n| obj.get(*n))
        .find(|v| !v.is_null())
}

fn string_field(
    obj: &Map<String, JsonValue>,
    field: &'static str,
    names: &[&str],
) -> std::result::Result<Option<String>, AnnotationParseError> {
    match first_present(obj, names) {
        None => Ok(None),
        Some(JsonValue::String(s)) => Ok(Some(s.clone())),
        Some(JsonValue::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(AnnotationParseError::InvalidField {
            field,
            reason: format!("expected string, got {}", json_kind(other)),
        }),
    }
}

fn parse_index(value: &JsonValue) -> std::result::Result<u32, AnnotationParseError> {
    let invalid = |reason: String| AnnotationParseError::InvalidField {
        field: "spineIndex",
        reason,
    };
    let raw = match value {
        JsonValue::Number(n) => n
            .as_u64()
            .ok_or_else(|| invalid(format!("{} is not a non-negative integer", n)))?,
        JsonValue::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|e| invalid(e.to_string()))?,
        other => return Err(invalid(format!("expected integer, got {}", json_kind(other)))),
    };
    u32::try_from(raw).map_err(|_| invalid(format!("{} out of range", raw)))
}

/// Epoch milliseconds from an integer, a float, a numeric string or RFC 3339.
fn parse_timestamp(
    field: &'static str,
    value: &JsonValue,
) -> std::result::Result<i64, AnnotationParseError> {
    let invalid = |reason: String| AnnotationParseError::InvalidField { field, reason };
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .ok_or_else(|| invalid(format!("{} is not a timestamp", n))),
        JsonValue::String(s) => {
            if let Ok(ms) = s.trim().parse::<i64>() {
                return Ok(ms);
            }
            DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| dt.timestamp_millis())
                .map_err(|e| invalid(format!("'{}': {}", s, e)))
        }
        other => Err(invalid(format!(
            "expected timestamp, got {}",
            json_kind(other)
        ))),
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
