//! Glossary matching cascade: exact → normalized → fuzzy substring →
//! term substitution → no match. Runs synchronously to completion; the
//! worker thread in `worker.rs` owns the engine.

use serde::{Deserialize, Serialize};

use super::glossary::{Glossary, GlossaryIndex};
use super::normalize::normalize_for_match;

/// Which strategy produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchMethod {
    #[serde(rename = "Exact")]
    Exact,
    #[serde(rename = "Normalized")]
    Normalized,
    #[serde(rename = "Fuzzy (Key in OCR)")]
    FuzzyKeyInText,
    #[serde(rename = "Fuzzy (OCR in Key)")]
    FuzzyTextInKey,
    #[serde(rename = "Substitution")]
    Substitution,
}

impl std::fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchMethod::Exact => write!(f, "Exact"),
            MatchMethod::Normalized => write!(f, "Normalized"),
            MatchMethod::FuzzyKeyInText => write!(f, "Fuzzy (Key in OCR)"),
            MatchMethod::FuzzyTextInKey => write!(f, "Fuzzy (OCR in Key)"),
            MatchMethod::Substitution => write!(f, "Substitution"),
        }
    }
}

/// Outcome of one match request. Exactly one variant per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    /// The whole input resolved locally.
    Full { translated: String, method: MatchMethod },
    /// Known terms were replaced; the rest still needs remote translation.
    Partial { text: String, method: MatchMethod },
    NoMatch,
}

/// Tuning for the fuzzy stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Fuzzy matching only runs when the normalized input is longer than this.
    pub min_fuzzy_len: usize,
    /// Containment ratio (shorter / longer) that must be exceeded.
    pub min_ratio: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            min_fuzzy_len: 2,
            min_ratio: 0.6,
        }
    }
}

/// Owns the current glossary and its index.
pub struct MatcherEngine {
    config: MatcherConfig,
    glossary: Glossary,
    index: GlossaryIndex,
    generation: u64,
}

impl MatcherEngine {
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            config,
            glossary: Glossary::new(),
            index: GlossaryIndex::default(),
            generation: 0,
        }
    }

    /// Merge `incoming` into the owned glossary and rebuild the index in full.
    /// Returns the merged glossary size.
    pub fn load(&mut self, incoming: Glossary) -> usize {
        self.glossary.merge(incoming);
        self.generation += 1;
        self.index = GlossaryIndex::build(&self.glossary, self.generation);
        self.glossary.len()
    }

    pub fn generation(&self) -> u64 {
        self.index.generation()
    }

    pub fn match_text(&self, text: &str) -> MatchResult {
        let trimmed = text.trim();

        if let Some(translated) = self.index.exact_lookup(trimmed) {
            return full(translated, MatchMethod::Exact);
        }

        let normalized = normalize_for_match(trimmed);
        if let Some(translated) = self.index.normalized_lookup(&normalized) {
            return full(translated, MatchMethod::Normalized);
        }

        if let Some(result) = self.fuzzy(&normalized) {
            return result;
        }

        self.substitute(text)
    }

    fn fuzzy(&self, input: &str) -> Option<MatchResult> {
        let input_len = input.chars().count();
        if input_len <= self.config.min_fuzzy_len {
            return None;
        }

        for key in self.index.normalized_keys() {
            let key_len = key.chars().count();

            // Case A: noisy text is a superset of a short key
            if key_len < input_len
                && ratio(key_len, input_len) > self.config.min_ratio
                && input.contains(key)
            {
                return self.fuzzy_hit(key, MatchMethod::FuzzyKeyInText);
            }

            // Case B: key is a superset of the (truncated) text
            if input_len < key_len
                && ratio(input_len, key_len) > self.config.min_ratio
                && key.contains(input)
            {
                return self.fuzzy_hit(key, MatchMethod::FuzzyTextInKey);
            }
        }
        None
    }

    fn fuzzy_hit(&self, key: &str, method: MatchMethod) -> Option<MatchResult> {
        self.index
            .normalized_lookup(key)
            .map(|translated| full(translated, method))
    }

    /// Occurrences are located in `text` only, so a translation inserted
    /// for one term is never matched by a later term.
    fn substitute(&self, text: &str) -> MatchResult {
        let mut spans: Vec<(usize, usize, &str)> = Vec::new();

        for term in self.index.ordered_terms() {
            if term.is_empty() {
                continue;
            }
            let Some(translation) = self.index.exact_lookup(term) else {
                continue;
            };
            let mut from = 0;
            while let Some(offset) = text[from..].find(term.as_str()) {
                let start = from + offset;
                let end = start + term.len();
                if spans.iter().any(|&(s, e, _)| start < e && s < end) {
                    // claimed by a longer term, retry one char further on
                    from = start + text[start..].chars().next().map_or(1, char::len_utf8);
                } else {
                    spans.push((start, end, translation));
                    from = end;
                }
            }
        }

        if spans.is_empty() {
            return MatchResult::NoMatch;
        }

        spans.sort_unstable_by_key(|&(start, _, _)| start);
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for (start, end, translation) in spans {
            out.push_str(&text[cursor..start]);
            out.push_str(translation);
            cursor = end;
        }
        out.push_str(&text[cursor..]);

        MatchResult::Partial {
            text: out,
            method: MatchMethod::Substitution,
        }
    }
}

#[inline]
fn ratio(part: usize, whole: usize) -> f64 {
    part as f64 / whole as f64
}

fn full(translated: &str, method: MatchMethod) -> MatchResult {
    MatchResult::Full {
        translated: translated.to_string(),
        method,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(pairs: &[(&str, &str)]) -> MatcherEngine {
        let mut engine = MatcherEngine::new(MatcherConfig::default());
        engine.load(pairs.iter().map(|&(k, v)| (k, v)).collect());
        engine
    }

    fn full_of(result: MatchResult) -> (String, MatchMethod) {
        match result {
            MatchResult::Full { translated, method } => (translated, method),
            other => panic!("expected Full, got {other:?}"),
        }
    }

    #[test]
    fn empty_glossary_is_no_match() {
        let engine = MatcherEngine::new(MatcherConfig::default());
        assert_eq!(engine.match_text("anything at all"), MatchResult::NoMatch);
        assert_eq!(engine.match_text(""), MatchResult::NoMatch);
    }

    #[test]
    fn exact_beats_everything() {
        // "Apple" would also match normalized ("apple") and substitution.
        let engine = engine(&[("Apple", "苹果"), ("apple", "other"), ("App", "应用")]);
        assert_eq!(
            full_of(engine.match_text("  Apple ")),
            ("苹果".to_string(), MatchMethod::Exact)
        );
    }

    #[test]
    fn normalized_lookup_ignores_case_space_punctuation() {
        let engine = engine(&[("Hello World", "A")]);
        assert_eq!(
            full_of(engine.match_text("  hello   world  ")),
            ("A".to_string(), MatchMethod::Normalized)
        );
        assert_eq!(
            full_of(engine.match_text("HELLO, world!")),
            ("A".to_string(), MatchMethod::Normalized)
        );
    }

    #[test]
    fn fuzzy_text_in_key() {
        let engine = engine(&[("New York City", "X")]);
        assert_eq!(
            full_of(engine.match_text("New York Cit")),
            ("X".to_string(), MatchMethod::FuzzyTextInKey)
        );
    }

    #[test]
    fn fuzzy_key_in_text() {
        let engine = engine(&[("Game Over", "游戏结束")]);
        // "gameover" (8) inside "gameover1" (9): 8/9 > 0.6
        assert_eq!(
            full_of(engine.match_text("GAME OVER 1")),
            ("游戏结束".to_string(), MatchMethod::FuzzyKeyInText)
        );
    }

    #[test]
    fn fuzzy_ratio_must_exceed_threshold() {
        let engine = engine(&[("abcdef", "X")]);
        // "abc" / "abcdef" = 0.5, not enough, and "abc" is not a raw term.
        assert_eq!(engine.match_text("abc"), MatchResult::NoMatch);
    }

    #[test]
    fn short_input_skips_fuzzy() {
        let engine = engine(&[("New York City", "X")]);
        assert_eq!(engine.match_text("NY"), MatchResult::NoMatch);
    }

    #[test]
    fn fuzzy_thresholds_are_configurable() {
        let mut engine = MatcherEngine::new(MatcherConfig {
            min_fuzzy_len: 2,
            min_ratio: 0.4,
        });
        engine.load([("abcdef", "X")].into_iter().collect());
        assert_eq!(
            full_of(engine.match_text("abc")),
            ("X".to_string(), MatchMethod::FuzzyTextInKey)
        );
    }

    #[test]
    fn substitution_is_greedy_and_multi_term() {
        let engine = engine(&[("foo", "F"), ("foobar", "FB")]);
        assert_eq!(
            engine.match_text("foobar baz foo"),
            MatchResult::Partial {
                text: "FB baz F".to_string(),
                method: MatchMethod::Substitution,
            }
        );
    }

    #[test]
    fn substitution_replaces_every_occurrence_in_original_case() {
        let engine = engine(&[("Rust", "锈")]);
        assert_eq!(
            engine.match_text("I like Rust, rust and Rust."),
            MatchResult::Partial {
                text: "I like 锈, rust and 锈.".to_string(),
                method: MatchMethod::Substitution,
            }
        );
    }

    #[test]
    fn substituted_translations_are_not_rescanned() {
        let engine = engine(&[("cat", "dog"), ("dog", "狗")]);
        assert_eq!(
            engine.match_text("a cat sat"),
            MatchResult::Partial {
                text: "a dog sat".to_string(),
                method: MatchMethod::Substitution,
            }
        );
        assert_eq!(
            engine.match_text("cat chases dog"),
            MatchResult::Partial {
                text: "dog chases 狗".to_string(),
                method: MatchMethod::Substitution,
            }
        );
    }

    #[test]
    fn shorter_term_matches_outside_longer_term() {
        let engine = engine(&[("New York", "纽约"), ("York", "约克")]);
        assert_eq!(
            engine.match_text("New York and York"),
            MatchResult::Partial {
                text: "纽约 and 约克".to_string(),
                method: MatchMethod::Substitution,
            }
        );
    }

    #[test]
    fn reload_overwrites_same_key() {
        let mut engine = engine(&[("A", "B")]);
        assert_eq!(
            full_of(engine.match_text("A")),
            ("B".to_string(), MatchMethod::Exact)
        );
        engine.load([("A", "C")].into_iter().collect());
        assert_eq!(
            full_of(engine.match_text("A")),
            ("C".to_string(), MatchMethod::Exact)
        );
        assert_eq!(engine.generation(), 2);
    }
}
