use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use releve_core::MerchantPattern;
use serde::Serialize;

use crate::merchant::tokens;
use crate::util::edit_ratio;

/// Default minimum similarity for a candidate to count as a match.
pub const DEFAULT_THRESHOLD: f32 = 0.8;

/// Tokens shorter than this do not enter the inverted index.
const MIN_TOKEN_CHARS: usize = 3;
const PREFIX_CHARS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuzzyMatch {
    pub key: String,
    pub similarity: f32,
}

/// Similarity of two merchant keys in `[0, 1]`.
///
/// The larger of a containment score (every token of the shorter key appears
/// in the longer one and both start with the same token) and a blend of
/// whole-key and per-token edit ratios.
pub fn similarity(a: &str, b: &str) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let ta: Vec<&str> = tokens(a).collect();
    let tb: Vec<&str> = tokens(b).collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let (short, long) = if ta.len() <= tb.len() { (&ta, &tb) } else { (&tb, &ta) };

    let containment = if short[0] == long[0] && short.iter().all(|t| long.contains(t)) {
        0.85 + 0.15 * short.len() as f32 / long.len() as f32
    } else {
        0.0
    };

    let token_score = if ta.len() == tb.len() {
        (best_token_mean(&ta, &tb) + best_token_mean(&tb, &ta)) / 2.0
    } else {
        best_token_mean(short, long)
    };
    let blend = 0.5 * edit_ratio(a, b) + 0.5 * token_score;

    containment.max(blend).clamp(0.0, 1.0)
}

/// Mean over `base` of each token's best edit ratio against `other`.
fn best_token_mean(base: &[&str], other: &[&str]) -> f32 {
    let total: f32 = base
        .iter()
        .map(|t| {
            other
                .iter()
                .map(|u| edit_ratio(t, u))
                .fold(0.0_f32, f32::max)
        })
        .sum();
    total / base.len() as f32
}

fn index_terms(key: &str) -> BTreeSet<String> {
    let mut terms = BTreeSet::new();
    for token in tokens(key) {
        if token.chars().count() < MIN_TOKEN_CHARS {
            continue;
        }
        terms.insert(token.to_string());
        terms.insert(token.chars().take(PREFIX_CHARS).collect());
    }
    terms
}

/// Immutable lookup structure over the learned patterns.
///
/// Rebuilt from scratch after every learning pass and shared as an `Arc`
/// snapshot, so readers never see a half-updated index.
#[derive(Debug, Clone, Default)]
pub struct FuzzyIndex {
    patterns: HashMap<String, MerchantPattern>,
    postings: HashMap<String, Vec<String>>,
    /// Keys with no token long enough to index.
    unindexed: Vec<String>,
}

impl FuzzyIndex {
    pub fn build(patterns: impl IntoIterator<Item = MerchantPattern>) -> Self {
        let mut index = FuzzyIndex::default();
        for pattern in patterns {
            let key = pattern.normalized_key.clone();
            if key.is_empty() {
                continue;
            }
            let terms = index_terms(&key);
            if terms.is_empty() {
                index.unindexed.push(key.clone());
            }
            for term in terms {
                index.postings.entry(term).or_default().push(key.clone());
            }
            index.patterns.insert(key, pattern);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&MerchantPattern> {
        self.patterns.get(key)
    }

    pub fn patterns(&self) -> impl Iterator<Item = &MerchantPattern> {
        self.patterns.values()
    }

    /// Candidates at or above `threshold`, best first.
    ///
    /// An exact key always leads; the rest are ordered by similarity, then
    /// usage count, then key.
    pub fn lookup(&self, query: &str, threshold: f32) -> Vec<FuzzyMatch> {
        if query.is_empty() {
            return Vec::new();
        }
        let exact = self.patterns.contains_key(query);

        let mut candidates: BTreeSet<&str> = BTreeSet::new();
        for term in index_terms(query) {
            if let Some(keys) = self.postings.get(&term) {
                candidates.extend(keys.iter().map(String::as_str));
            }
        }
        candidates.extend(self.unindexed.iter().map(String::as_str));
        candidates.remove(query);

        let mut matches: Vec<FuzzyMatch> = candidates
            .into_iter()
            .filter_map(|key| {
                let score = similarity(query, key);
                (score >= threshold).then(|| FuzzyMatch {
                    key: key.to_string(),
                    similarity: score,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| self.usage_of(&b.key).cmp(&self.usage_of(&a.key)))
                .then_with(|| a.key.cmp(&b.key))
        });
        if exact {
            matches.insert(
                0,
                FuzzyMatch {
                    key: query.to_string(),
                    similarity: 1.0,
                },
            );
        }
        matches
    }

    fn usage_of(&self, key: &str) -> u32 {
        self.patterns.get(key).map_or(0, |p| p.usage_count)
    }
}

pub fn build_index(patterns: impl IntoIterator<Item = MerchantPattern>) -> FuzzyIndex {
    FuzzyIndex::build(patterns)
}
