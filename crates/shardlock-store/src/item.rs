//! The item model of the conditional-write key-value store.
//!
//! An [`Item`] is a row addressed by a composite [`ItemKey`] (partition plus
//! sort key) carrying named [`AttributeValue`]s. A [`Condition`] is a
//! predicate over the *current* item at a key, or over its absence.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Composite primary key of an item.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    pub partition: String,
    pub sort: String,
}

impl ItemKey {
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition, self.sort)
    }
}

/// A single attribute value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Num(i64),
    Str(String),
}

impl From<i64> for AttributeValue {
    fn from(n: i64) -> Self {
        Self::Num(n)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

/// A row in the item store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub key: ItemKey,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Item {
    pub fn new(key: ItemKey) -> Self {
        Self {
            key,
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Read a string attribute. `Ok(None)` if absent, error if not a string.
    pub fn get_str(&self, name: &str) -> StoreResult<Option<&str>> {
        match self.attributes.get(name) {
            None => Ok(None),
            Some(AttributeValue::Str(s)) => Ok(Some(s.as_str())),
            Some(AttributeValue::Num(_)) => Err(StoreError::AttributeType {
                name: name.to_string(),
                expected: "string",
            }),
        }
    }

    /// Read a numeric attribute. `Ok(None)` if absent, error if not a number.
    pub fn get_num(&self, name: &str) -> StoreResult<Option<i64>> {
        match self.attributes.get(name) {
            None => Ok(None),
            Some(AttributeValue::Num(n)) => Ok(Some(*n)),
            Some(AttributeValue::Str(_)) => Err(StoreError::AttributeType {
                name: name.to_string(),
                expected: "number",
            }),
        }
    }

    /// Read a string attribute that must be present.
    pub fn require_str(&self, name: &str) -> StoreResult<&str> {
        self.get_str(name)?.ok_or_else(|| StoreError::MissingAttribute {
            key: self.key.to_string(),
            name: name.to_string(),
        })
    }
}

/// Predicate evaluated against the current item at the written key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Condition {
    /// The item exists and the attribute equals the value.
    Equals(String, AttributeValue),
    /// The item exists and the numeric attribute is strictly below the bound.
    LessThan(String, i64),
    /// No item exists at the key.
    NotExists,
    /// Either side holds.
    Or(Box<Condition>, Box<Condition>),
}

impl Condition {
    pub fn equals(name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::Equals(name.into(), value.into())
    }

    pub fn less_than(name: impl Into<String>, bound: i64) -> Self {
        Self::LessThan(name.into(), bound)
    }

    pub fn or(self, other: Condition) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    /// Evaluate against the current item (`None` when the key is absent).
    pub fn evaluate(&self, current: Option<&Item>) -> bool {
        match self {
            Condition::Equals(name, value) => {
                current.and_then(|item| item.get(name)) == Some(value)
            }
            Condition::LessThan(name, bound) => matches!(
                current.and_then(|item| item.get(name)),
                Some(AttributeValue::Num(n)) if n < bound
            ),
            Condition::NotExists => current.is_none(),
            Condition::Or(a, b) => a.evaluate(current) || b.evaluate(current),
        }
    }
}
