use std::collections::BTreeMap;
use std::fmt;

/// Tag holding the metric name of a series
pub const METRIC_NAME_TAG: &str = "__name__";

/// Sorted key-value pairs identifying a series
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    /// Creates an empty tag set
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Adds a tag, returning the updated set
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns the metric name if one is tagged
    pub fn name(&self) -> Option<&str> {
        self.get(METRIC_NAME_TAG)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns a deterministic identifier built from the sorted tags.
    ///
    /// Two tag sets produce the same id if and only if they hold the same pairs.
    pub fn id(&self) -> String {
        let mut id = String::new();
        for (k, v) in &self.0 {
            if !id.is_empty() {
                id.push(',');
            }
            push_escaped(&mut id, k);
            id.push('=');
            push_escaped(&mut id, v);
        }
        id
    }
}

/// Escapes the separators used in series ids
fn push_escaped(out: &mut String, s: &str) {
    for c in s.chars() {
        if matches!(c, '\\' | ',' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{}={}", k, v)?;
            first = false;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Tags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A series known to a storage, returned by tag searches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metric {
    pub namespace: String,
    pub id: String,
    pub tags: Tags,
}
