use serde::{Deserialize, Serialize};

/// HTTP headers: an insertion-ordered map of header name to one or more values.
///
/// Names are normalized to `Title-Case` on insertion and lookups ignore case,
/// so `content-type` and `Content-Type` address the same entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
}

impl Headers {
    /// Create an empty header map
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize a header name, e.g. `x-forwarded-for` -> `X-Forwarded-For`
    pub fn normalize_name(name: &str) -> String {
        name.trim()
            .split('-')
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => {
                        first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                    }
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join("-")
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name.trim()))
    }

    /// Replace all values of a header with a single value
    pub fn insert<K: AsRef<str>, V: Into<String>>(&mut self, name: K, value: V) {
        let value = value.into();
        match self.position(name.as_ref()) {
            Some(idx) => self.entries[idx].1 = vec![value],
            None => self
                .entries
                .push((Self::normalize_name(name.as_ref()), vec![value])),
        }
    }

    /// Add a value to a header, keeping the existing ones
    pub fn append<K: AsRef<str>, V: Into<String>>(&mut self, name: K, value: V) {
        let value = value.into();
        match self.position(name.as_ref()) {
            Some(idx) => self.entries[idx].1.push(value),
            None => self
                .entries
                .push((Self::normalize_name(name.as_ref()), vec![value])),
        }
    }

    /// Get the last value of a header
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name)
            .and_then(|idx| self.entries[idx].1.last())
            .map(String::as_str)
    }

    /// Get all values of a header
    pub fn get_all(&self, name: &str) -> &[String] {
        match self.position(name) {
            Some(idx) => &self.entries[idx].1,
            None => &[],
        }
    }

    /// Check whether a header is present
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Remove a header, returning its values
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.position(name).map(|idx| self.entries.remove(idx).1)
    }

    /// Iterate over `(name, values)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(key, values)| (key.as_str(), values.as_slice()))
    }

    /// Number of distinct header names
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no headers
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compare two header maps ignoring the order of names
    pub fn same_entries(&self, other: &Headers) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(name, values)| other.get_all(name) == values)
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}
