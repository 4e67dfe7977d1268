//! The decoded tree of a structured response body.

use std::collections::BTreeMap;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// A decoded markup tree: mapping, sequence, or text.
///
/// A child tag seen once collapses to a bare value; a repeated child tag
/// becomes a [`StructuredValue::Sequence`] in document order. Callers that
/// read list-like fields should go through [`StructuredValue::items`], which
/// treats both shapes uniformly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuredValue {
    /// Text content of a leaf element.
    Text(String),
    /// Repeated occurrences of one child tag.
    Sequence(Vec<StructuredValue>),
    /// Child tag name to value.
    Mapping(BTreeMap<String, StructuredValue>),
}

impl StructuredValue {
    /// Looks up `key` in a mapping.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Mapping(map) => map.get(key),
            _ => None,
        }
    }

    /// Follows a chain of mapping keys.
    #[must_use]
    pub fn path(&self, keys: &[&str]) -> Option<&Self> {
        keys.iter().try_fold(self, |value, key| value.get(key))
    }

    /// Returns the text of a leaf value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the text found at `keys`, if the path ends at a leaf.
    #[must_use]
    pub fn text_at(&self, keys: &[&str]) -> Option<&str> {
        self.path(keys).and_then(Self::as_text)
    }

    /// Returns the entries of a mapping.
    #[must_use]
    pub fn as_mapping(&self) -> Option<&BTreeMap<String, Self>> {
        match self {
            Self::Mapping(map) => Some(map),
            _ => None,
        }
    }

    /// Returns the occurrences of a possibly-collapsed field.
    ///
    /// A sequence yields its elements; any other value yields itself.
    #[must_use]
    pub fn items(&self) -> Vec<&Self> {
        match self {
            Self::Sequence(items) => items.iter().collect(),
            other => vec![other],
        }
    }

    /// Name of the single top-level element of a decoded document.
    #[must_use]
    pub fn root_name(&self) -> Option<&str> {
        match self {
            Self::Mapping(map) if map.len() == 1 => map.keys().next().map(String::as_str),
            _ => None,
        }
    }
}

impl From<&str> for StructuredValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl Serialize for StructuredValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Text(text) => serializer.serialize_str(text),
            Self::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Mapping(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
        }
    }
}
