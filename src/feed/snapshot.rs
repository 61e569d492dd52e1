use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

use super::types::{parse_timestamp, MetadataField, MetadataValue};

/// The only persisted state layout this build reads or writes.
pub const STATE_VERSION: i64 = 1;

/// Errors raised while encoding or decoding persisted feed state.
#[derive(Debug, Error)]
pub enum StateError {
    /// The payload's `version` is absent or not [`STATE_VERSION`]
    #[error("unsupported {kind} state version: found {found:?}, expected 1")]
    UnsupportedStateVersion {
        kind: &'static str,
        found: Option<i64>,
    },
    #[error("malformed state: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid timestamp in state: {0:?}")]
    InvalidTimestamp(String),
}

/// Changed metadata values, keyed by field.
pub type MetadataChanges = BTreeMap<MetadataField, MetadataValue>;

// ============================================================================
// Metadata
// ============================================================================

/// Feed-level descriptive attributes, all optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedMetadata {
    pub title: Option<String>,
    pub link: Option<String>,
    pub icon: Option<String>,
    pub generator: Option<String>,
    pub copyright: Option<String>,
    pub categories: Option<Vec<String>>,
    pub updated: Option<DateTime<FixedOffset>>,
}

impl FeedMetadata {
    pub fn get(&self, field: MetadataField) -> Option<MetadataValue> {
        match field {
            MetadataField::Title => self.title.clone().map(MetadataValue::Text),
            MetadataField::Link => self.link.clone().map(MetadataValue::Text),
            MetadataField::Icon => self.icon.clone().map(MetadataValue::Text),
            MetadataField::Generator => self.generator.clone().map(MetadataValue::Text),
            MetadataField::Copyright => self.copyright.clone().map(MetadataValue::Text),
            MetadataField::Categories => self.categories.clone().map(MetadataValue::List),
            MetadataField::Updated => self.updated.map(MetadataValue::Timestamp),
        }
    }

    fn text_slot(&mut self, field: MetadataField) -> Option<&mut Option<String>> {
        match field {
            MetadataField::Title => Some(&mut self.title),
            MetadataField::Link => Some(&mut self.link),
            MetadataField::Icon => Some(&mut self.icon),
            MetadataField::Generator => Some(&mut self.generator),
            MetadataField::Copyright => Some(&mut self.copyright),
            MetadataField::Categories | MetadataField::Updated => None,
        }
    }

    /// Store `value` in `field`. Returns false, leaving the field untouched,
    /// when the value's shape does not fit the field.
    pub fn set(&mut self, field: MetadataField, value: MetadataValue) -> bool {
        match (field, value) {
            (MetadataField::Categories, MetadataValue::List(list)) => {
                self.categories = Some(list);
                true
            }
            (MetadataField::Updated, MetadataValue::Timestamp(ts)) => {
                self.updated = Some(ts);
                true
            }
            (field, MetadataValue::Text(text)) => match self.text_slot(field) {
                Some(slot) => {
                    *slot = Some(text);
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    /// Compare values reported by a parser against the current ones.
    ///
    /// Keys that name no [`MetadataField`] are ignored. A value whose shape
    /// does not fit its field is logged and ignored.
    pub fn diff(&self, reported: &BTreeMap<String, MetadataValue>) -> MetadataChanges {
        let mut changes = MetadataChanges::new();
        for (key, value) in reported {
            let Ok(field) = key.parse::<MetadataField>() else {
                continue;
            };
            let Some(value) = coerce(field, value) else {
                tracing::warn!(field = %field, value = ?value, "Ignoring metadata value of the wrong type");
                continue;
            };
            if self.get(field).as_ref() != Some(&value) {
                changes.insert(field, value);
            }
        }
        changes
    }

    pub fn apply(&mut self, changes: &MetadataChanges) {
        for (field, value) in changes {
            self.set(*field, value.clone());
        }
    }

    fn to_record(&self) -> MetadataRecord {
        MetadataRecord {
            version: Some(STATE_VERSION),
            categories: self.categories.clone(),
            icon: self.icon.clone(),
            title: self.title.clone(),
            link: self.link.clone(),
            generator: self.generator.clone(),
            copyright: self.copyright.clone(),
            updated: self.updated.map(|ts| ts.to_rfc3339()),
        }
    }

    /// Versioned JSON form: only the fields that are set, plus `version`.
    pub fn to_state(&self) -> Result<Value, StateError> {
        Ok(serde_json::to_value(self.to_record())?)
    }

    /// Inverse of [`FeedMetadata::to_state`]. Unknown keys are ignored.
    pub fn from_state(state: &Value) -> Result<Self, StateError> {
        check_version("metadata", state)?;
        let record: MetadataRecord = serde_json::from_value(state.clone())?;
        let updated = match record.updated {
            Some(text) => Some(parse_timestamp(&text).ok_or(StateError::InvalidTimestamp(text))?),
            None => None,
        };

        Ok(Self {
            title: record.title,
            link: record.link,
            icon: record.icon,
            generator: record.generator,
            copyright: record.copyright,
            categories: record.categories,
            updated,
        })
    }
}

/// Fit a reported value to the shape `field` stores. Text timestamps are parsed.
fn coerce(field: MetadataField, value: &MetadataValue) -> Option<MetadataValue> {
    match (field, value) {
        (MetadataField::Categories, MetadataValue::List(_)) => Some(value.clone()),
        (MetadataField::Categories, _) => None,
        (MetadataField::Updated, MetadataValue::Timestamp(_)) => Some(value.clone()),
        (MetadataField::Updated, MetadataValue::Text(text)) => {
            parse_timestamp(text).map(MetadataValue::Timestamp)
        }
        (MetadataField::Updated, _) => None,
        (_, MetadataValue::Text(_)) => Some(value.clone()),
        _ => None,
    }
}

fn check_version(kind: &'static str, state: &Value) -> Result<(), StateError> {
    let found = state.get("version").and_then(Value::as_i64);
    if found != Some(STATE_VERSION) {
        return Err(StateError::UnsupportedStateVersion { kind, found });
    }
    Ok(())
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct MetadataRecord {
    version: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    categories: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    copyright: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated: Option<String>,
}

// ============================================================================
// Snapshot
// ============================================================================

/// What a session has seen: known entry ids and current metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedSnapshot {
    pub seen_entry_ids: HashSet<String>,
    pub metadata: FeedMetadata,
}

#[derive(Serialize)]
struct SnapshotOut<'a> {
    version: i64,
    #[serde(rename = "seenEntryIds")]
    seen_entry_ids: Vec<&'a str>,
    metadata: MetadataRecord,
}

#[derive(Deserialize)]
struct SnapshotIn {
    #[serde(rename = "seenEntryIds", alias = "seen_entry_ids", default)]
    seen_entry_ids: Vec<String>,
    metadata: Option<Value>,
}

impl FeedSnapshot {
    /// Serialize to the persisted JSON layout. Ids are written sorted.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StateError> {
        let mut ids: Vec<&str> = self.seen_entry_ids.iter().map(String::as_str).collect();
        ids.sort_unstable();
        let out = SnapshotOut {
            version: STATE_VERSION,
            seen_entry_ids: ids,
            metadata: self.metadata.to_record(),
        };
        Ok(serde_json::to_vec(&out)?)
    }

    /// Decode the persisted layout. Absent `seenEntryIds` or `metadata` decode as empty.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StateError> {
        let state: Value = serde_json::from_slice(bytes)?;
        check_version("snapshot", &state)?;
        let decoded: SnapshotIn = serde_json::from_value(state)?;
        let metadata = match &decoded.metadata {
            Some(state) => FeedMetadata::from_state(state)?,
            None => FeedMetadata::default(),
        };

        Ok(Self {
            seen_entry_ids: decoded.seen_entry_ids.into_iter().collect(),
            metadata,
        })
    }

    /// Replace this snapshot with the decoded payload.
    ///
    /// On error `self` is left as it was.
    pub fn restore(&mut self, bytes: &[u8]) -> Result<(), StateError> {
        *self = Self::from_bytes(bytes)?;
        Ok(())
    }
}
