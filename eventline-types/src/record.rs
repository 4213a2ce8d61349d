//! Remote records and the key/value view events are encoded through.
//!
//! A `Record` mirrors one entry in the remote record store: a type tag, an
//! id placed in a zone, a schema-flexible field map and the metadata the
//! server assigns on save. The store owns records; the engine only reads and
//! writes fields by key.

use crate::{RecordError, RecordResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// A named partition of the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(String);

impl ZoneId {
    /// Creates a zone ID from its name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the zone name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a record: its name, unique within the zone it lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub name: String,
    pub zone: ZoneId,
}

impl RecordId {
    /// Creates a record ID.
    #[must_use]
    pub fn new(name: impl Into<String>, zone: ZoneId) -> Self {
        Self {
            name: name.into(),
            zone,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.zone, self.name)
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    String(String),
    Int(i64),
    Double(f64),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    /// A file-like blob, referenced by a local path.
    Asset(PathBuf),
    StringList(Vec<String>),
}

impl FieldValue {
    /// Short name of the variant, used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Int(_) => "int",
            Self::Double(_) => "double",
            Self::Bytes(_) => "bytes",
            Self::Timestamp(_) => "timestamp",
            Self::Asset(_) => "asset",
            Self::StringList(_) => "string_list",
        }
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<PathBuf> for FieldValue {
    fn from(v: PathBuf) -> Self {
        Self::Asset(v)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(v: Vec<String>) -> Self {
        Self::StringList(v)
    }
}

/// One record as seen by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record name and zone placement.
    pub id: RecordId,
    /// Record-type tag. Event records use the event's type identifier.
    pub record_type: String,
    /// Schema-flexible field map.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    /// Server-assigned creation time. `None` until the record is saved.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Server-assigned version tag.
    #[serde(default)]
    pub change_tag: Option<String>,
}

impl Record {
    /// Creates an unsaved record with no fields.
    #[must_use]
    pub fn new(record_type: impl Into<String>, id: RecordId) -> Self {
        Self {
            id,
            record_type: record_type.into(),
            fields: BTreeMap::new(),
            created_at: None,
            change_tag: None,
        }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Returns the zone this record lives in.
    #[must_use]
    pub fn zone(&self) -> &ZoneId {
        &self.id.zone
    }
}

/// Minimal key/value view over one record.
///
/// Events encode and decode themselves exclusively through this trait, so
/// they never depend on how a particular store represents records.
pub trait RecordAdapter {
    /// The record-type tag.
    fn record_type(&self) -> &str;

    /// The record name. Event records are named after their event id.
    fn record_name(&self) -> &str;

    /// Returns a field, if present.
    fn field(&self, key: &str) -> Option<&FieldValue>;

    /// Sets a field, replacing any previous value.
    fn set_field(&mut self, key: &str, value: FieldValue);

    /// Removes a field, returning its previous value.
    fn remove_field(&mut self, key: &str) -> Option<FieldValue>;

    /// Returns a required field.
    fn require(&self, key: &str) -> RecordResult<&FieldValue> {
        self.field(key)
            .ok_or_else(|| RecordError::MissingField(key.to_string()))
    }

    fn string(&self, key: &str) -> RecordResult<&str> {
        match self.require(key)? {
            FieldValue::String(s) => Ok(s),
            other => Err(wrong_type(key, "string", other)),
        }
    }

    fn int(&self, key: &str) -> RecordResult<i64> {
        match self.require(key)? {
            FieldValue::Int(v) => Ok(*v),
            other => Err(wrong_type(key, "int", other)),
        }
    }

    fn double(&self, key: &str) -> RecordResult<f64> {
        match self.require(key)? {
            FieldValue::Double(v) => Ok(*v),
            FieldValue::Int(v) => Ok(*v as f64),
            other => Err(wrong_type(key, "double", other)),
        }
    }

    fn bytes(&self, key: &str) -> RecordResult<&[u8]> {
        match self.require(key)? {
            FieldValue::Bytes(v) => Ok(v),
            other => Err(wrong_type(key, "bytes", other)),
        }
    }

    fn timestamp(&self, key: &str) -> RecordResult<DateTime<Utc>> {
        match self.require(key)? {
            FieldValue::Timestamp(v) => Ok(*v),
            other => Err(wrong_type(key, "timestamp", other)),
        }
    }

    fn asset(&self, key: &str) -> RecordResult<&Path> {
        match self.require(key)? {
            FieldValue::Asset(p) => Ok(p),
            other => Err(wrong_type(key, "asset", other)),
        }
    }

    fn string_list(&self, key: &str) -> RecordResult<&[String]> {
        match self.require(key)? {
            FieldValue::StringList(v) => Ok(v),
            other => Err(wrong_type(key, "string_list", other)),
        }
    }

    /// Reads a string field holding JSON.
    fn json(&self, key: &str) -> RecordResult<serde_json::Value> {
        Ok(serde_json::from_str(self.string(key)?)?)
    }

    /// Stores a JSON value as a string field.
    fn set_json(&mut self, key: &str, value: &serde_json::Value) -> RecordResult<()> {
        self.set_field(key, FieldValue::String(serde_json::to_string(value)?));
        Ok(())
    }
}

fn wrong_type(key: &str, expected: &'static str, actual: &FieldValue) -> RecordError {
    RecordError::WrongType {
        field: key.to_string(),
        expected,
        actual: actual.type_name(),
    }
}

impl RecordAdapter for Record {
    fn record_type(&self) -> &str {
        &self.record_type
    }

    fn record_name(&self) -> &str {
        &self.id.name
    }

    fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    fn set_field(&mut self, key: &str, value: FieldValue) {
        self.fields.insert(key.to_string(), value);
    }

    fn remove_field(&mut self, key: &str) -> Option<FieldValue> {
        self.fields.remove(key)
    }
}
