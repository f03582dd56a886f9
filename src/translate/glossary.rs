//! Glossary storage and the derived lookup index.
//! The glossary is a plain source-term → translation mapping with merge
//! semantics; `GlossaryIndex` is rebuilt from it in full on every change.

use std::cmp::Reverse;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::normalize::normalize_for_match;

/// User-supplied dictionary of source term → preferred translation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Glossary {
    entries: BTreeMap<String, String>,
}

impl Glossary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a single entry.
    pub fn insert(&mut self, source: impl Into<String>, target: impl Into<String>) {
        self.entries.insert(source.into(), target.into());
    }

    /// Merge `other` into `self`. Entries from `other` overwrite same-key
    /// entries; everything else is retained. Returns the number of entries
    /// taken from `other`.
    pub fn merge(&mut self, other: Glossary) -> usize {
        let count = other.entries.len();
        self.entries.extend(other.entries);
        count
    }

    pub fn get(&self, source: &str) -> Option<&str> {
        self.entries.get(source).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Glossary {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Read-only lookup structures derived from one glossary generation.
#[derive(Debug, Default)]
pub struct GlossaryIndex {
    generation: u64,
    exact: HashMap<String, String>,
    normalized: HashMap<String, String>,
    /// Normalized keys in fuzzy scan order (ascending).
    normalized_keys: Vec<String>,
    /// Raw keys, longest first; ties ascending.
    ordered_terms: Vec<String>,
}

impl GlossaryIndex {
    /// Build all three lookup structures. Entries with an empty key or value
    /// are skipped. When two raw keys normalize to the same key, the longer
    /// raw key wins; equal lengths go to the lexicographically smaller one.
    pub fn build(glossary: &Glossary, generation: u64) -> Self {
        let mut exact = HashMap::with_capacity(glossary.len());
        let mut winners: HashMap<String, (&str, &str)> = HashMap::with_capacity(glossary.len());
        let mut ordered_terms = Vec::with_capacity(glossary.len());

        for (key, value) in glossary.iter() {
            if key.is_empty() || value.is_empty() {
                continue;
            }
            exact.insert(key.to_string(), value.to_string());
            ordered_terms.push(key.to_string());

            let norm = normalize_for_match(key);
            if norm.is_empty() {
                continue;
            }
            match winners.entry(norm) {
                Entry::Vacant(slot) => {
                    slot.insert((key, value));
                }
                Entry::Occupied(mut slot) => {
                    if prefers(key, slot.get().0) {
                        slot.insert((key, value));
                    }
                }
            }
        }

        // Glossary iterates in ascending key order, so a stable sort keeps
        // equal-length terms ascending.
        ordered_terms.sort_by_key(|t| Reverse(t.chars().count()));

        let normalized: HashMap<String, String> = winners
            .into_iter()
            .map(|(norm, (_, value))| (norm, value.to_string()))
            .collect();
        let mut normalized_keys: Vec<String> = normalized.keys().cloned().collect();
        normalized_keys.sort_unstable();

        Self {
            generation,
            exact,
            normalized,
            normalized_keys,
            ordered_terms,
        }
    }

    pub fn exact_lookup(&self, term: &str) -> Option<&str> {
        self.exact.get(term).map(String::as_str)
    }

    pub fn normalized_lookup(&self, normalized_term: &str) -> Option<&str> {
        self.normalized.get(normalized_term).map(String::as_str)
    }

    pub fn normalized_keys(&self) -> impl Iterator<Item = &str> {
        self.normalized_keys.iter().map(String::as_str)
    }

    pub fn ordered_terms(&self) -> &[String] {
        &self.ordered_terms
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of usable (non-empty) entries.
    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }
}

fn prefers(candidate: &str, incumbent: &str) -> bool {
    let (c, i) = (candidate.chars().count(), incumbent.chars().count());
    c > i || (c == i && candidate < incumbent)
}

#[derive(Debug)]
pub enum GlossaryError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Sqlite(rusqlite::Error),
    /// The file parsed but has a shape we cannot import.
    UnsupportedStructure(String),
}

impl std::fmt::Display for GlossaryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GlossaryError::Io(e) => write!(f, "glossary IO error: {e}"),
            GlossaryError::Parse(e) => write!(f, "glossary parse error: {e}"),
            GlossaryError::Sqlite(e) => write!(f, "glossary table error: {e}"),
            GlossaryError::UnsupportedStructure(msg) => {
                write!(f, "unsupported glossary structure: {msg}")
            }
        }
    }
}

impl std::error::Error for GlossaryError {}

impl From<std::io::Error> for GlossaryError {
    fn from(e: std::io::Error) -> Self {
        GlossaryError::Io(e)
    }
}

impl From<serde_json::Error> for GlossaryError {
    fn from(e: serde_json::Error) -> Self {
        GlossaryError::Parse(e)
    }
}

impl From<rusqlite::Error> for GlossaryError {
    fn from(e: rusqlite::Error) -> Self {
        GlossaryError::Sqlite(e)
    }
}
