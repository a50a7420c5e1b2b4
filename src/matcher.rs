//! Fuzzy filename matcher (4.C).
//!
//! Resolves a model-returned string back to one of the authoritative input
//! filenames, in five decreasing-confidence tiers: exact, normalized,
//! prefix, token-Jaccard, none. A batched precomputation amortizes
//! normalization and tokenization across many lookups against the same
//! input set.

use std::collections::{HashMap, HashSet};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "tiff", "tif", "bmp", "webp"];
const REF_SUFFIX: &str = ".ref.json";
const PREFIX_MIN_RATIO: f64 = 0.6;
const PREFIX_MIN_LEN: usize = 4;
const TOKEN_MIN_SIMILARITY: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    None,
    Token,
    Prefix,
    Normalized,
    Exact,
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: Option<String>,
    pub confidence: Confidence,
}

/// Lowercase, strip a trailing `.ref.json`, then strip a trailing image
/// extension, collapse runs of whitespace, and trim.
pub fn normalize(input: &str) -> String {
    let mut value = input.to_lowercase();

    if let Some(stripped) = value.strip_suffix(REF_SUFFIX) {
        value = stripped.to_string();
    }

    for ext in IMAGE_EXTENSIONS {
        let suffix = format!(".{ext}");
        if let Some(stripped) = value.strip_suffix(&suffix) {
            value = stripped.to_string();
            break;
        }
    }

    let collapsed: String = value.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim().to_string()
}

fn tokenize(normalized: &str) -> HashSet<String> {
    normalized
        .split(|c: char| c == ' ' || c == '_' || c == '-' || c == '.')
        .filter(|token| !token.is_empty())
        .map(|token| token.to_string())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// A matcher precomputed over a fixed set of authoritative input names.
/// Lookups are O(|inputs|).
pub struct FuzzyMatcher {
    /// Original names in insertion order, for stable tie-breaking.
    names: Vec<String>,
    normalized: Vec<String>,
    tokens: Vec<HashSet<String>>,
    exact_index: HashMap<String, usize>,
}

impl FuzzyMatcher {
    pub fn new<'a>(inputs: impl IntoIterator<Item = &'a str>) -> Self {
        let names: Vec<String> = inputs.into_iter().map(|s| s.to_string()).collect();
        let normalized: Vec<String> = names.iter().map(|n| normalize(n)).collect();
        let tokens: Vec<HashSet<String>> = normalized.iter().map(|n| tokenize(n)).collect();

        let mut exact_index = HashMap::new();
        for (idx, name) in names.iter().enumerate() {
            exact_index.entry(name.clone()).or_insert(idx);
        }

        Self {
            names,
            normalized,
            tokens,
            exact_index,
        }
    }

    pub fn resolve(&self, candidate: &str) -> MatchResult {
        if let Some(&idx) = self.exact_index.get(candidate) {
            return MatchResult {
                matched: Some(self.names[idx].clone()),
                confidence: Confidence::Exact,
            };
        }

        let candidate_norm = normalize(candidate);

        if let Some(idx) = self
            .normalized
            .iter()
            .position(|norm| *norm == candidate_norm)
        {
            return MatchResult {
                matched: Some(self.names[idx].clone()),
                confidence: Confidence::Normalized,
            };
        }

        if candidate_norm.len() >= PREFIX_MIN_LEN {
            if let Some(idx) = self.best_prefix_match(&candidate_norm) {
                return MatchResult {
                    matched: Some(self.names[idx].clone()),
                    confidence: Confidence::Prefix,
                };
            }
        }

        let candidate_tokens = tokenize(&candidate_norm);
        if let Some(idx) = self.best_token_match(&candidate_tokens) {
            return MatchResult {
                matched: Some(self.names[idx].clone()),
                confidence: Confidence::Token,
            };
        }

        MatchResult {
            matched: None,
            confidence: Confidence::None,
        }
    }

    fn best_prefix_match(&self, candidate_norm: &str) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None; // (idx, longer_len) smaller longer_len preferred on tie

        for (idx, norm) in self.normalized.iter().enumerate() {
            if norm.len() < PREFIX_MIN_LEN {
                continue;
            }

            let (shorter, longer) = if candidate_norm.len() <= norm.len() {
                (candidate_norm, norm.as_str())
            } else {
                (norm.as_str(), candidate_norm)
            };

            if !longer.starts_with(shorter) {
                continue;
            }

            let ratio = shorter.len() as f64 / longer.len() as f64;
            if ratio < PREFIX_MIN_RATIO {
                continue;
            }

            match best {
                None => best = Some((idx, longer.len())),
                Some((_, best_longer)) if longer.len() < best_longer => {
                    best = Some((idx, longer.len()))
                }
                _ => {}
            }
        }

        best.map(|(idx, _)| idx)
    }

    fn best_token_match(&self, candidate_tokens: &HashSet<String>) -> Option<usize> {
        if candidate_tokens.is_empty() {
            return None;
        }

        let mut best_idx = None;
        let mut best_score = TOKEN_MIN_SIMILARITY;

        for (idx, tokens) in self.tokens.iter().enumerate() {
            let score = jaccard(candidate_tokens, tokens);
            if score >= best_score {
                best_score = score;
                best_idx = Some(idx);
            }
        }

        best_idx
    }
}
