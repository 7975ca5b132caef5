use crate::common::{DEFAULT_FUZZY_MIN_SCORE, DEFAULT_FUZZY_THRESHOLD, MAX_FUZZY_DISTANCE};
use levenshtein_automata::{Distance, LevenshteinAutomatonBuilder, DFA};
use once_cell::sync::{Lazy, OnceCell};

/// Parameters of a `$fuzzy` / `$text` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyQuery {
    pub query: String,
    /// Maximum edit distance for a token to score at all, capped at
    /// `MAX_FUZZY_DISTANCE`.
    pub threshold: usize,
    /// Minimum normalized score for the condition to pass.
    pub min_score: f64,
}

impl FuzzyQuery {
    pub fn new(query: &str) -> Self {
        FuzzyQuery {
            query: query.to_string(),
            threshold: DEFAULT_FUZZY_THRESHOLD,
            min_score: DEFAULT_FUZZY_MIN_SCORE,
        }
    }

    pub fn threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn matches(&self, text: &str) -> bool {
        score(&self.query, text, self.threshold) >= self.min_score
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.split_whitespace().map(|t| t.to_lowercase()).collect()
}

static BUILDERS: Lazy<Vec<OnceCell<LevenshteinAutomatonBuilder>>> =
    Lazy::new(|| (0..=MAX_FUZZY_DISTANCE).map(|_| OnceCell::new()).collect());

/// Automaton builder for `distance`, built once per distance.
fn builder(distance: usize) -> &'static LevenshteinAutomatonBuilder {
    let distance = distance.min(MAX_FUZZY_DISTANCE);
    BUILDERS[distance].get_or_init(|| LevenshteinAutomatonBuilder::new(distance as u8, false))
}

/// Scores `text` against `query` in `[0, 1]`.
///
/// Each query token takes its best score over the text tokens: `1.0` when the
/// text token contains the query token, otherwise `(len - distance) / len` if
/// the edit distance is within `threshold`, where `len` is the longer token's
/// length. The sum is divided by the number of query tokens. Thresholds above
/// `MAX_FUZZY_DISTANCE` count as `MAX_FUZZY_DISTANCE`.
pub fn score(query: &str, text: &str, threshold: usize) -> f64 {
    let query_tokens = tokens(query);
    if query_tokens.is_empty() {
        return 0.0;
    }
    let text_tokens = tokens(text);
    let builder = builder(threshold);

    let total: f64 = query_tokens
        .iter()
        .map(|q| {
            let dfa = builder.build_dfa(q);
            text_tokens
                .iter()
                .map(|t| token_score(q, t, &dfa))
                .fold(0.0, f64::max)
        })
        .sum();
    total / query_tokens.len() as f64
}

fn token_score(query: &str, token: &str, dfa: &DFA) -> f64 {
    if token.contains(query) {
        return 1.0;
    }
    let distance = match dfa.eval(token) {
        Distance::Exact(distance) => distance as usize,
        Distance::AtLeast(_) => return 0.0,
    };
    let len = query.chars().count().max(token.chars().count());
    if len == 0 {
        return 0.0;
    }
    (len.saturating_sub(distance)) as f64 / len as f64
}

/// Levenshtein distance over characters, or `None` when it exceeds
/// `max_distance`.
pub fn edit_distance(a: &str, b: &str, max_distance: usize) -> Option<usize> {
    match builder(max_distance).build_dfa(a).eval(b) {
        Distance::Exact(distance) => Some(distance as usize),
        Distance::AtLeast(_) => None,
    }
}
