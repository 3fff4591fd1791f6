//! Synonym-based query expansion for the lexical half of hybrid scoring.

use std::collections::HashMap;

/// Trim, case-fold and collapse whitespace. Used as the cache key and as the
/// text actually searched, so equal keys always mean equal searches.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Default)]
pub struct SynonymTable {
    map: HashMap<String, Vec<String>>,
}

impl SynonymTable {
    pub fn new(entries: &[(String, Vec<String>)]) -> Self {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (term, synonyms) in entries {
            let slot = map.entry(term.to_lowercase()).or_default();
            for s in synonyms {
                let s = s.to_lowercase();
                if !slot.contains(&s) {
                    slot.push(s);
                }
            }
        }
        Self { map }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Query terms followed by their synonyms, deduplicated, first-seen order.
    pub fn expand(&self, query: &str) -> Vec<String> {
        let terms: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric() && c != '$')
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();

        let mut out: Vec<String> = Vec::with_capacity(terms.len() * 2);
        for term in &terms {
            if !out.contains(term) {
                out.push(term.clone());
            }
        }
        for term in &terms {
            if let Some(synonyms) = self.map.get(term) {
                for s in synonyms {
                    if !out.contains(s) {
                        out.push(s.clone());
                    }
                }
            }
        }
        out
    }

    /// Expanded terms joined into a single lexical query string.
    pub fn expanded_query(&self, query: &str) -> String {
        self.expand(query).join(" ")
    }
}
