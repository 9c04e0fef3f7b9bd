//! Document values
//!
//! A `Document` is a JSON object with a required `_id` field. The wrapper
//! keeps the raw `serde_json::Value` and adds the accessors the rest of the
//! system needs: id extraction, field lookup, and conversion of scalar
//! fields into orderable `KeyValue`s for shard keys and ids.

use crate::error::{Error, Result};
use crate::types::DocumentId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Orderable scalar used for `_id`s and shard keys
///
/// The variant declaration order defines the cross-type bracket order:
/// MinKey < integers < strings < MaxKey. Within a variant the natural order
/// of the payload applies. Floats are deliberately absent; keys are
/// restricted to integers and strings so that `Ord`/`Eq`/`Hash` are exact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyValue {
    /// Sentinel below every real value
    MinKey,
    Int(i64),
    Str(String),
    /// Sentinel above every real value
    MaxKey,
}

impl KeyValue {
    /// Convert a JSON scalar into a key value. Non-integral numbers,
    /// booleans, nulls, arrays, and objects are not valid key material.
    pub fn from_json(value: &Value) -> Option<KeyValue> {
        match value {
            Value::Number(n) => n.as_i64().map(KeyValue::Int),
            Value::String(s) => Some(KeyValue::Str(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            KeyValue::MinKey => Value::String("$minKey".to_string()),
            KeyValue::MaxKey => Value::String("$maxKey".to_string()),
            KeyValue::Int(v) => Value::from(*v),
            KeyValue::Str(s) => Value::from(s.clone()),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::MinKey => write!(f, "MinKey"),
            KeyValue::MaxKey => write!(f, "MaxKey"),
            KeyValue::Int(v) => write!(f, "{v}"),
            KeyValue::Str(s) => write!(f, "\"{s}\""),
        }
    }
}

/// A JSON document with a required scalar `_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document(Value);

impl Document {
    /// Wrap a JSON value. Must be an object with a scalar `_id`.
    pub fn new(value: Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::InvalidDocument("document must be a JSON object".into()))?;
        let id = obj
            .get("_id")
            .ok_or_else(|| Error::InvalidDocument("document is missing _id".into()))?;
        if KeyValue::from_json(id).is_none() {
            return Err(Error::InvalidDocument(
                "_id must be an integer or string".into(),
            ));
        }
        Ok(Self(value))
    }

    /// Parse a document from JSON text.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| Error::Serialization(e.to_string()))?;
        Self::new(value)
    }

    /// The document's `_id`.
    ///
    /// Construction validated the field, so this cannot fail for a
    /// `Document` built through `new`/`parse`.
    pub fn id(&self) -> DocumentId {
        let value = self
            .0
            .as_object()
            .and_then(|o| o.get("_id"))
            .and_then(KeyValue::from_json)
            .unwrap_or(KeyValue::Int(0));
        DocumentId(value)
    }

    /// Raw field lookup (top-level only).
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.as_object().and_then(|o| o.get(field))
    }

    /// Field lookup as orderable key material.
    pub fn get_key(&self, field: &str) -> Option<KeyValue> {
        self.get(field).and_then(KeyValue::from_json)
    }

    /// Replace or insert a top-level field, returning the updated document.
    pub fn with_field(&self, field: &str, value: Value) -> Result<Document> {
        if field == "_id" {
            return Err(Error::InvalidDocument("_id is immutable".into()));
        }
        let mut copy = self.0.clone();
        if let Some(obj) = copy.as_object_mut() {
            obj.insert(field.to_string(), value);
        }
        Document::new(copy)
    }

    pub fn as_json(&self) -> &Value {
        &self.0
    }

    pub fn into_json(self) -> Value {
        self.0
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
