//! Word splitting, phrase joining and the noun heuristic.
//!
//! Text is split into `\w+` words. Registered multi-word phrases are matched
//! first so they survive as a single word ("machine learning"). A word becomes
//! an index term when it is not a stopword and either starts with an uppercase
//! letter or ends with a noun-forming suffix. This is a heuristic; false
//! positives and negatives are expected.

use std::collections::HashSet;

use regex::Regex;

use crate::error::IndexError;

/// Function words that are never indexed.
pub const STOPWORDS: &[&str] = &[
    "the", "is", "am", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do",
    "does", "did", "and", "or", "but", "if", "while", "at", "by", "for", "with", "about",
    "against", "between", "into", "through", "during", "before", "after", "above", "below", "to",
    "from", "up", "down", "in", "out", "on", "off", "over", "under", "again", "further", "then",
    "once", "here", "there", "when", "where", "why", "how", "all", "any", "both", "each", "few",
    "more", "some", "such", "no", "nor", "too", "very", "can", "will", "just", "should", "would",
    "could", "might", "must", "not", "he", "she", "it",
];

/// Endings that mark a lowercase word as noun-like.
pub const NOUN_SUFFIXES: &[&str] = &[
    "tion", "ment", "ness", "ity", "ance", "ence", "ship", "age", "hood", "ism", "ist", "cy", "dom",
];

/// Capitalization/suffix noun heuristic.
#[derive(Debug, Clone)]
pub struct NounFilter {
    stopwords: HashSet<String>,
    suffixes: Vec<String>,
}

impl Default for NounFilter {
    fn default() -> Self {
        NounFilter::new(STOPWORDS.iter().copied(), NOUN_SUFFIXES.iter().copied())
    }
}

impl NounFilter {
    pub fn new<'a>(
        stopwords: impl IntoIterator<Item = &'a str>,
        suffixes: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        NounFilter {
            stopwords: stopwords.into_iter().map(str::to_lowercase).collect(),
            suffixes: suffixes.into_iter().map(str::to_lowercase).collect(),
        }
    }

    /// Returns the lower-cased term if `word` looks like a noun.
    #[must_use]
    pub fn term(&self, word: &str) -> Option<String> {
        let lower = word.to_lowercase();
        if lower.is_empty() || self.stopwords.contains(&lower) {
            return None;
        }
        let capitalized = word.chars().next().is_some_and(char::is_uppercase);
        if capitalized || self.suffixes.iter().any(|s| lower.ends_with(s.as_str())) {
            Some(lower)
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_noun(&self, word: &str) -> bool {
        self.term(word).is_some()
    }
}

/// Splits text into words and turns word sequences into (term, snippet) occurrences.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    pattern: Regex,
    filter: NounFilter,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Tokenizer {
            pattern: word_pattern(&[]).expect("plain word pattern is valid"),
            filter: NounFilter::default(),
        }
    }
}

impl Tokenizer {
    /// Tokenizer that keeps each of `phrases` together as one word.
    pub fn new(phrases: &[String]) -> Result<Self, IndexError> {
        Ok(Tokenizer {
            pattern: word_pattern(phrases)?,
            filter: NounFilter::default(),
        })
    }

    pub fn with_filter(mut self, filter: NounFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn filter(&self) -> &NounFilter {
        &self.filter
    }

    /// Surface words of `text` in order. Phrase matches have their internal
    /// whitespace collapsed to a single space.
    ///
    /// ```
    /// use docindex::Tokenizer;
    ///
    /// let tok = Tokenizer::new(&["machine learning".to_string()]).unwrap();
    /// assert_eq!(tok.words("Machine   learning, now!"), vec!["Machine learning", "now"]);
    /// ```
    #[must_use]
    pub fn words(&self, text: &str) -> Vec<String> {
        self.pattern
            .find_iter(text)
            .map(|m| {
                let word = m.as_str();
                if word.contains(char::is_whitespace) {
                    word.split_whitespace().collect::<Vec<_>>().join(" ")
                } else {
                    word.to_string()
                }
            })
            .collect()
    }

    /// Lower-cased noun-like terms of `text`, in order.
    #[must_use]
    pub fn terms(&self, text: &str) -> Vec<String> {
        self.words(text)
            .iter()
            .filter_map(|w| self.filter.term(w))
            .collect()
    }

    /// Every noun-like word in `words` with the window of `radius` words on either side.
    pub fn occurrences<'a>(
        &'a self,
        words: &'a [String],
        radius: usize,
    ) -> impl Iterator<Item = (String, String)> + 'a {
        words.iter().enumerate().filter_map(move |(i, word)| {
            let term = self.filter.term(word)?;
            Some((term, snippet(words, i, radius)))
        })
    }
}

/// `words[i - radius ..= i + radius]` clamped to the slice, joined by spaces.
#[must_use]
pub fn snippet(words: &[String], i: usize, radius: usize) -> String {
    let start = i.saturating_sub(radius);
    let end = (i + radius + 1).min(words.len());
    words[start..end].join(" ")
}

/// Shard key of a term: its first character, lower-cased.
#[must_use]
pub fn shard_key(term: &str) -> Option<char> {
    term.chars().next().and_then(|c| c.to_lowercase().next())
}

fn word_pattern(phrases: &[String]) -> Result<Regex, IndexError> {
    let mut phrases: Vec<Vec<&str>> = phrases
        .iter()
        .map(|p| p.split_whitespace().collect::<Vec<_>>())
        .filter(|parts| parts.len() > 1)
        .collect();
    // Longest first so "new york city" wins over "new york".
    phrases.sort_by(|a, b| b.len().cmp(&a.len()));

    let mut alternatives: Vec<String> = phrases
        .iter()
        .map(|parts| {
            let body = parts
                .iter()
                .map(|p| regex::escape(p))
                .collect::<Vec<_>>()
                .join(r"\s+");
            format!(r"(?i:\b{}\b)", body)
        })
        .collect();
    alternatives.push(r"\w+".to_string());

    let pattern = alternatives.join("|");
    Regex::new(&pattern).map_err(|source| IndexError::InvalidRegex { pattern, source })
}
