//! Sparse field maps.
//!
//! Partition tables differ per product line, so records are carried as ordered
//! `column -> Option<FieldValue>` maps instead of typed models. The set of names a
//! map may hold is checked later, at the statement builder boundary
//! (see [`crate::schema`] and [`crate::predicate`]).

use chrono::{NaiveDate, NaiveDateTime};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// A single column value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Calendar date (`DATE` columns)
    Date(NaiveDate),
    /// Timestamp without time zone
    Timestamp(NaiveDateTime),
    /// Any integer column, widened to `i64`
    Int(i64),
    /// Text-like columns
    Text(String),
}

impl FieldValue {
    /// Returns `true` for text values that are empty after trimming.
    ///
    /// Blank text is treated as "not supplied" by every statement builder.
    pub fn is_blank(&self) -> bool {
        matches!(self, FieldValue::Text(s) if s.trim().is_empty())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            FieldValue::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        FieldValue::Date(value)
    }
}

impl From<NaiveDateTime> for FieldValue {
    fn from(value: NaiveDateTime) -> Self {
        FieldValue::Timestamp(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

/// Ordered mapping from field name to optional value.
///
/// Insertion order is preserved and re-inserting a name replaces its value in place.
/// `None` means "present but null" when read from storage, and "not supplied" when
/// passed into a builder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    entries: Vec<(String, Option<FieldValue>)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value, returning the previous one.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: Option<FieldValue>,
    ) -> Option<Option<FieldValue>> {
        let name = name.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((name, value));
                None
            }
        }
    }

    /// Builder-style insert of a present value.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(name, Some(value.into()));
        self
    }

    /// Builder-style insert of an explicit null.
    pub fn with_null(mut self, name: impl Into<String>) -> Self {
        self.insert(name, None);
        self
    }

    /// Value for `name`; `None` if the name is absent or the value is null.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| v.as_ref())
    }

    /// Text value for `name`, if present and textual.
    pub fn get_text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_text)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Option<FieldValue>> {
        let idx = self.entries.iter().position(|(k, _)| k == name)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&FieldValue>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose value is present and not blank text.
    pub fn supplied(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().filter_map(|(k, v)| match v {
            Some(v) if !v.is_blank() => Some((k.as_str(), v)),
            _ => None,
        })
    }
}

impl<K: Into<String>> FromIterator<(K, Option<FieldValue>)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (K, Option<FieldValue>)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl Serialize for FieldMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}
