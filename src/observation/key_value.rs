//! Tag key-values derived from an observation context.

use std::collections::BTreeMap;
use std::fmt;

/// A single tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// A documented tag name.
pub trait KeyName {
    fn as_str(&self) -> &'static str;

    fn with_value(&self, value: impl Into<String>) -> KeyValue
    where
        Self: Sized,
    {
        KeyValue::new(self.as_str(), value)
    }
}

/// Set of tags keyed by unique name, iterated in name order.
///
/// Adding a key that is already present replaces its value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValues {
    entries: BTreeMap<String, String>,
}

impl KeyValues {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn and(mut self, kv: KeyValue) -> Self {
        self.insert(kv);
        self
    }

    pub fn insert(&mut self, kv: KeyValue) {
        self.entries.insert(kv.key, kv.value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<KeyValue> for KeyValues {
    fn from_iter<I: IntoIterator<Item = KeyValue>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::and)
    }
}

impl fmt::Display for KeyValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        write!(f, "]")
    }
}
