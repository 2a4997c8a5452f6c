//! Metadata payloads attached to records, and post-filter predicates over them.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Maximum number of keys in one metadata payload.
pub const MAX_METADATA_KEYS: usize = 64;
/// Maximum length in bytes of a metadata key.
pub const MAX_KEY_LEN: usize = 256;
/// Maximum length in bytes of a string metadata value.
pub const MAX_STRING_LEN: usize = 8192;

/// A primitive metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl MetadataValue {
    fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Integer(i) => Some(*i as f64),
            MetadataValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Order two values when they are comparable. Integers and floats compare
    /// numerically with each other; strings compare lexicographically.
    pub fn compare(&self, other: &MetadataValue) -> Option<Ordering> {
        match (self, other) {
            (MetadataValue::String(a), MetadataValue::String(b)) => Some(a.cmp(b)),
            (MetadataValue::Bool(a), MetadataValue::Bool(b)) => Some(a.cmp(b)),
            (MetadataValue::Integer(a), MetadataValue::Integer(b)) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }

    fn validate(&self, key: &str) -> Result<()> {
        match self {
            MetadataValue::Float(f) if !f.is_finite() => Err(EngineError::InvalidMetadata {
                key: key.to_string(),
                reason: "float values must be finite".to_string(),
            }),
            MetadataValue::String(s) if s.len() > MAX_STRING_LEN => {
                Err(EngineError::InvalidMetadata {
                    key: key.to_string(),
                    reason: format!("string value exceeds {} bytes", MAX_STRING_LEN),
                })
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => write!(f, "{}", s),
            MetadataValue::Integer(i) => write!(f, "{}", i),
            MetadataValue::Float(x) => write!(f, "{}", x),
            MetadataValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::String(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Integer(i)
    }
}

impl From<f64> for MetadataValue {
    fn from(f: f64) -> Self {
        MetadataValue::Float(f)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

impl TryFrom<&serde_json::Value> for MetadataValue {
    type Error = String;

    fn try_from(value: &serde_json::Value) -> std::result::Result<Self, Self::Error> {
        match value {
            serde_json::Value::String(s) => Ok(MetadataValue::String(s.clone())),
            serde_json::Value::Bool(b) => Ok(MetadataValue::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(MetadataValue::Integer)
                .or_else(|| n.as_f64().map(MetadataValue::Float))
                .ok_or_else(|| format!("unrepresentable number {}", n)),
            other => Err(format!("expected a primitive value, got {}", other)),
        }
    }
}

/// Metadata associated with a record: string keys mapped to primitive values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Metadata {
    fields: BTreeMap<String, MetadataValue>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.fields.get(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.fields.iter()
    }

    /// Check key and value constraints before a payload is stored.
    pub fn validate(&self) -> Result<()> {
        if self.fields.len() > MAX_METADATA_KEYS {
            return Err(EngineError::InvalidMetadata {
                key: String::new(),
                reason: format!(
                    "{} keys exceeds the limit of {}",
                    self.fields.len(),
                    MAX_METADATA_KEYS
                ),
            });
        }
        for (key, value) in &self.fields {
            if key.trim().is_empty() {
                return Err(EngineError::InvalidMetadata {
                    key: key.clone(),
                    reason: "keys must be non-empty".to_string(),
                });
            }
            if key.len() > MAX_KEY_LEN {
                return Err(EngineError::InvalidMetadata {
                    key: key.clone(),
                    reason: format!("key exceeds {} bytes", MAX_KEY_LEN),
                });
            }
            value.validate(key)?;
        }
        Ok(())
    }

    /// Build metadata from a JSON object, rejecting nested values.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let object = match value {
            serde_json::Value::Null => return Ok(Metadata::new()),
            serde_json::Value::Object(map) => map,
            other => {
                return Err(EngineError::InvalidMetadata {
                    key: String::new(),
                    reason: format!("expected an object, got {}", other),
                })
            }
        };
        let mut metadata = Metadata::new();
        for (key, raw) in object {
            let value = MetadataValue::try_from(raw).map_err(|reason| {
                EngineError::InvalidMetadata {
                    key: key.clone(),
                    reason,
                }
            })?;
            metadata.insert(key.clone(), value);
        }
        Ok(metadata)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .fields
            .iter()
            .map(|(k, v)| {
                let json = match v {
                    MetadataValue::String(s) => serde_json::Value::from(s.clone()),
                    MetadataValue::Integer(i) => serde_json::Value::from(*i),
                    MetadataValue::Float(f) => serde_json::Value::from(*f),
                    MetadataValue::Bool(b) => serde_json::Value::from(*b),
                };
                (k.clone(), json)
            })
            .collect();
        serde_json::Value::Object(map)
    }
}

impl<K: Into<String>, V: Into<MetadataValue>> FromIterator<(K, V)> for Metadata {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut metadata = Metadata::new();
        for (k, v) in iter {
            metadata.insert(k, v);
        }
        metadata
    }
}

/// A predicate over metadata, applied to search candidates after ranking.
#[derive(Clone)]
pub enum Filter {
    Eq(String, MetadataValue),
    Ne(String, MetadataValue),
    Gt(String, MetadataValue),
    Lt(String, MetadataValue),
    In(String, Vec<MetadataValue>),
    Exists(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Custom(Arc<dyn Fn(&Metadata) -> bool + Send + Sync>),
}

impl Filter {
    pub fn eq(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Filter::Eq(key.into(), value.into())
    }

    pub fn custom(f: impl Fn(&Metadata) -> bool + Send + Sync + 'static) -> Self {
        Filter::Custom(Arc::new(f))
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        let ordering = |key: &str, value: &MetadataValue| {
            metadata.get(key).and_then(|found| found.compare(value))
        };
        match self {
            Filter::Eq(key, value) => ordering(key, value) == Some(Ordering::Equal),
            // absent keys are "not equal"
            Filter::Ne(key, value) => ordering(key, value) != Some(Ordering::Equal),
            Filter::Gt(key, value) => ordering(key, value) == Some(Ordering::Greater),
            Filter::Lt(key, value) => ordering(key, value) == Some(Ordering::Less),
            Filter::In(key, values) => values
                .iter()
                .any(|v| ordering(key, v) == Some(Ordering::Equal)),
            Filter::Exists(key) => metadata.get(key).is_some(),
            Filter::And(filters) => filters.iter().all(|f| f.matches(metadata)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(metadata)),
            Filter::Not(inner) => !inner.matches(metadata),
            Filter::Custom(f) => f(metadata),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Eq(k, v) => write!(f, "{} == {:?}", k, v),
            Filter::Ne(k, v) => write!(f, "{} != {:?}", k, v),
            Filter::Gt(k, v) => write!(f, "{} > {:?}", k, v),
            Filter::Lt(k, v) => write!(f, "{} < {:?}", k, v),
            Filter::In(k, vs) => write!(f, "{} in {:?}", k, vs),
            Filter::Exists(k) => write!(f, "exists({})", k),
            Filter::And(fs) => f.debug_tuple("And").field(fs).finish(),
            Filter::Or(fs) => f.debug_tuple("Or").field(fs).finish(),
            Filter::Not(inner) => f.debug_tuple("Not").field(inner).finish(),
            Filter::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Metadata {
        Metadata::new()
            .with("source", "guideline")
            .with("page", 12i64)
            .with("score", 0.75)
            .with("reviewed", true)
    }

    #[test]
    fn test_validate_accepts_primitives() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_payloads() {
        let nan = Metadata::new().with("score", f64::NAN);
        assert!(matches!(
            nan.validate(),
            Err(EngineError::InvalidMetadata { key, .. }) if key == "score"
        ));

        let empty_key = Metadata::new().with(" ", 1i64);
        assert!(empty_key.validate().is_err());

        let too_many: Metadata = (0..=MAX_METADATA_KEYS)
            .map(|i| (format!("k{}", i), i as i64))
            .collect();
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn test_from_json_rejects_nested() {
        let ok = serde_json::json!({"a": 1, "b": "x", "c": 1.5, "d": false});
        let metadata = Metadata::from_json(&ok).unwrap();
        assert_eq!(metadata.get("a"), Some(&MetadataValue::Integer(1)));
        assert_eq!(metadata.get("c"), Some(&MetadataValue::Float(1.5)));
        assert_eq!(metadata.to_json(), ok);

        let nested = serde_json::json!({"a": {"b": 1}});
        assert!(Metadata::from_json(&nested).is_err());
        let array = serde_json::json!([1, 2]);
        assert!(Metadata::from_json(&array).is_err());
    }

    #[test]
    fn test_filter_comparisons() {
        let m = sample();
        assert!(Filter::eq("source", "guideline").matches(&m));
        assert!(!Filter::eq("source", "faq").matches(&m));
        assert!(Filter::Gt("page".into(), MetadataValue::Float(11.5)).matches(&m));
        assert!(Filter::Lt("score".into(), MetadataValue::Integer(1)).matches(&m));
        assert!(Filter::Ne("missing".into(), 1i64.into()).matches(&m));
        assert!(!Filter::Gt("source".into(), 1i64.into()).matches(&m));
        assert!(Filter::In("page".into(), vec![1i64.into(), 12i64.into()]).matches(&m));
        assert!(Filter::Exists("reviewed".into()).matches(&m));
    }

    #[test]
    fn test_filter_combinators() {
        let m = sample();
        let f = Filter::And(vec![
            Filter::eq("reviewed", true),
            Filter::Not(Box::new(Filter::Exists("draft".into()))),
            Filter::Or(vec![Filter::eq("page", 1i64), Filter::eq("page", 12i64)]),
        ]);
        assert!(f.matches(&m));

        let custom = Filter::custom(|m| m.len() == 4);
        assert!(custom.matches(&m));
        assert_eq!(format!("{:?}", custom), "Custom(..)");
    }
}
