use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use neo4rs::{BoltBoolean, BoltFloat, BoltInteger, BoltMap, BoltNull, BoltString, BoltType};
use serde::Serialize;

use covidgraph_common::Count;

/// Attribute map of a node or relationship.
pub type Properties = BTreeMap<String, PropertyValue>;

/// A property value as the pipeline writes it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    /// A value read back from the store that has no counterpart above,
    /// kept in its debug rendering.
    Opaque(String),
}

impl PropertyValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_bolt(&self) -> BoltType {
        match self {
            PropertyValue::Null => BoltType::Null(BoltNull),
            PropertyValue::Bool(b) => BoltType::Boolean(BoltBoolean::new(*b)),
            PropertyValue::Int(i) => BoltType::Integer(BoltInteger::new(*i)),
            PropertyValue::Float(f) => BoltType::Float(BoltFloat::new(*f)),
            PropertyValue::String(s) | PropertyValue::Opaque(s) => {
                BoltType::String(BoltString::from(s.as_str()))
            }
            PropertyValue::Date(d) => BoltType::from(*d),
            PropertyValue::DateTime(dt) => BoltType::from(*dt),
        }
    }

    pub fn from_bolt(value: &BoltType) -> Self {
        match value {
            BoltType::Null(_) => PropertyValue::Null,
            BoltType::Boolean(b) => PropertyValue::Bool(b.value),
            BoltType::Integer(i) => PropertyValue::Int(i.value),
            BoltType::Float(f) => PropertyValue::Float(f.value),
            BoltType::String(s) => PropertyValue::String(s.value.clone()),
            other => PropertyValue::Opaque(format!("{other:?}")),
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

impl From<NaiveDate> for PropertyValue {
    fn from(v: NaiveDate) -> Self {
        PropertyValue::Date(v)
    }
}

impl From<NaiveDateTime> for PropertyValue {
    fn from(v: NaiveDateTime) -> Self {
        PropertyValue::DateTime(v)
    }
}

impl From<Count> for PropertyValue {
    fn from(c: Count) -> Self {
        match c {
            Count::Value(v) => PropertyValue::Int(v),
            Count::NotAvailable => PropertyValue::String(covidgraph_common::NOT_AVAILABLE.to_string()),
        }
    }
}

impl<T: Into<PropertyValue>> From<Option<T>> for PropertyValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(PropertyValue::Null)
    }
}

/// Convert a property map into a Bolt map parameter.
pub fn properties_to_bolt(props: &Properties) -> BoltType {
    BoltType::Map(BoltMap::from_iter(
        props
            .iter()
            .map(|(k, v)| (BoltString::from(k.as_str()), v.to_bolt())),
    ))
}

/// Build a `Properties` map from `(name, value)` pairs.
pub fn props<K, V, I>(pairs: I) -> Properties
where
    K: Into<String>,
    V: Into<PropertyValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
