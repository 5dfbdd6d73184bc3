//! Samples-file record.
//!
//! A [`SamplesFile`] is one unit of data moved between the SDR pipeline and
//! this crate: a logical file name, an ordered `key=value` header, and the
//! complex samples in file order. The on-disk text layout lives in
//! [`format`].

pub mod format;

use serde::{Deserialize, Serialize};

use crate::complex::ComplexSample;

/// Ordered header mapping with unique keys.
///
/// Iteration follows first-insertion order so a written header section is
/// reproduced line for line. Inserting an existing key replaces its value in
/// place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Header {
    entries: Vec<(String, String)>,
}

impl Header {
    /// Create an empty header.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite `key`. Returns the previous value, if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Look up the value stored for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the header has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Header {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut header = Header::new();
        for (key, value) in iter {
            header.insert(key, value);
        }
        header
    }
}

/// In-memory contents of one samples file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplesFile {
    /// Logical file name (not necessarily the path it was read from)
    pub file_name: String,
    /// Header metadata
    pub header: Header,
    /// Samples in file order
    pub samples: Vec<ComplexSample>,
}

impl SamplesFile {
    /// Create an empty samples file with the given logical name.
    #[must_use]
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            header: Header::new(),
            samples: Vec::new(),
        }
    }

    /// Builder-style header insertion.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.insert(key, value);
        self
    }

    /// Builder-style sample extension.
    #[must_use]
    pub fn with_samples(mut self, samples: impl IntoIterator<Item = ComplexSample>) -> Self {
        self.samples.extend(samples);
        self
    }
}
