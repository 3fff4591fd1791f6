//! Content-type-aware distance adjustment.
//!
//! Scoring is a pure function of the candidate: the raw distance is never
//! touched, callers get the adjusted value back.

use crate::config::BoostConfig;
use crate::models::{Candidate, Metadata};

/// Lowercased words of a keyword or expert name, matched as a unit.
type Phrase = Vec<String>;

#[derive(Debug, Clone)]
pub struct BoostRules {
    general_offset: f32,
    expert_offset: f32,
    category_keywords: Vec<Phrase>,
    expert_names: Vec<Phrase>,
}

impl BoostRules {
    pub fn new(config: &BoostConfig) -> Self {
        let phrases = |items: &[String]| -> Vec<Phrase> {
            items
                .iter()
                .map(|s| {
                    let folded = s.to_lowercase();
                    words(&folded).map(str::to_string).collect::<Phrase>()
                })
                .filter(|phrase| !phrase.is_empty())
                .collect()
        };
        Self {
            general_offset: config.general_offset,
            expert_offset: config.expert_offset,
            category_keywords: phrases(&config.category_keywords),
            expert_names: phrases(&config.expert_names),
        }
    }

    /// Rules that leave every distance unchanged.
    pub fn none() -> Self {
        Self {
            general_offset: 0.0,
            expert_offset: 0.0,
            category_keywords: Vec::new(),
            expert_names: Vec::new(),
        }
    }

    /// Adjusted distance for `candidate` (lower = promoted).
    pub fn score(&self, candidate: &Candidate) -> f32 {
        candidate.raw_distance - self.offset(&candidate.metadata)
    }

    /// Offset earned by this metadata. The larger matching offset wins;
    /// offsets never stack.
    ///
    /// Keywords and names match whole words, so `book` finds `Books` and
    /// `business-books` but not `facebook` or `bookings`.
    pub fn offset(&self, metadata: &Metadata) -> f32 {
        let mut offset = 0.0f32;

        let is_category = ["type", "source", "category"].iter().any(|key| {
            folded(metadata, key).is_some_and(|value| contains_any(&value, &self.category_keywords))
        });
        if is_category {
            offset = offset.max(self.general_offset);
        }

        let is_expert = folded(metadata, "title")
            .is_some_and(|title| contains_any(&title, &self.expert_names));
        if is_expert {
            offset = offset.max(self.expert_offset);
        }

        offset
    }
}

impl Default for BoostRules {
    fn default() -> Self {
        Self::new(&BoostConfig::default())
    }
}

/// Case-folded string value of a metadata key; non-string scalars are rendered.
fn folded(metadata: &Metadata, key: &str) -> Option<String> {
    match metadata.get(key)? {
        serde_json::Value::String(s) => Some(s.to_lowercase()),
        serde_json::Value::Null => None,
        other => Some(other.to_string().to_lowercase()),
    }
}

/// Alphanumeric runs. `$` stays part of a word so `$100m` is one token.
fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '$'))
        .filter(|w| !w.is_empty())
}

fn contains_any(text: &str, phrases: &[Phrase]) -> bool {
    if phrases.is_empty() {
        return false;
    }
    let tokens: Vec<&str> = words(text).collect();
    phrases.iter().any(|phrase| contains_phrase(&tokens, phrase))
}

/// `phrase` appears as consecutive tokens; its last word may be plural.
fn contains_phrase(tokens: &[&str], phrase: &[String]) -> bool {
    let Some((last, head)) = phrase.split_last() else {
        return false;
    };
    tokens.windows(phrase.len()).any(|window| {
        let (window_last, window_head) = (window[head.len()], &window[..head.len()]);
        window_head.iter().zip(head).all(|(t, w)| *t == w.as_str())
            && is_word_form(window_last, last)
    })
}

fn is_word_form(token: &str, word: &str) -> bool {
    match token.strip_prefix(word) {
        Some(rest) => matches!(rest, "" | "s" | "es"),
        None => false,
    }
}
