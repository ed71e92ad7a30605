//! Tokenisation and normalisation for the `english` text search configuration.
//!
//! Tokens are maximal runs of alphanumeric characters. Every token consumes a
//! position, including stop words, so phrase distances line up with
//! `to_tsvector('english', ..)`. Tokens made only of letters go through the
//! Snowball English stemmer, the same one behind PostgreSQL's `english_stem`
//! dictionary; tokens containing digits are kept verbatim (`ph123`, `2`).
//! Accents are not folded, matching `english` without `unaccent`.

use rust_stemmers::{Algorithm, Stemmer};

/// Stop words dropped by the `english` dictionary.
const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "did", "do", "does", "doing", "don", "down", "during", "each", "few", "for",
    "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "herself",
    "him", "himself", "his", "how", "i", "if", "in", "into", "is", "it", "its", "itself", "just",
    "me", "more", "most", "my", "myself", "no", "nor", "not", "now", "of", "off", "on", "once",
    "only", "or", "other", "our", "ours", "ourselves", "out", "over", "own", "s", "same", "she",
    "should", "so", "some", "such", "t", "than", "that", "the", "their", "theirs", "them",
    "themselves", "then", "there", "these", "they", "this", "those", "through", "to", "too",
    "under", "until", "up", "very", "was", "we", "were", "what", "when", "where", "which",
    "while", "who", "whom", "why", "will", "with", "you", "your", "yours", "yourself",
    "yourselves",
];

/// A token as it appears in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// 1-based position within the text.
    pub position: u16,
    /// Normalised lexeme, or `None` for stop words.
    pub lexeme: Option<String>,
}

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.binary_search(&word).is_ok()
}

/// Split `text` into raw lowercase words.
pub fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

/// Normalise a single lowercase word into its lexeme.
pub fn normalize_word(word: &str) -> Option<String> {
    if word.is_empty() || is_stop_word(word) {
        return None;
    }
    if word.chars().all(char::is_alphabetic) {
        Some(stem(word))
    } else {
        Some(word.to_string())
    }
}

/// Tokenise text the way `to_tsvector('english', text)` does.
pub fn tokenize(text: &str) -> Vec<Token> {
    words(text)
        .enumerate()
        .map(|(idx, word)| Token {
            position: u16::try_from(idx + 1).unwrap_or(u16::MAX),
            lexeme: normalize_word(&word),
        })
        .collect()
}

/// Lexemes of `text` in order, stop words removed.
pub fn lexemes(text: &str) -> Vec<String> {
    words(text).filter_map(|w| normalize_word(&w)).collect()
}

/// Snowball English stem of a lowercase word.
pub fn stem(word: &str) -> String {
    Stemmer::create(Algorithm::English).stem(word).into_owned()
}
