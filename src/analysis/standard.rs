use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use std::fmt;
use stop_words::{get, LANGUAGE};
use unicode_segmentation::{UnicodeSegmentation, UnicodeWordIndices};

use super::analyzer::Token;
use crate::config::AnalyzerConfig;

/// Separator-based analyzer with optional stemming and stop-word removal
pub struct StandardAnalyzer {
    config: AnalyzerConfig,
    stemmer: Option<Stemmer>,
    stopwords: HashSet<String>,
}

impl StandardAnalyzer {
    pub fn new(config: &AnalyzerConfig) -> Self {
        let stemmer = if config.stem {
            stemmer_algorithm(&config.language).map(Stemmer::create)
        } else {
            None
        };

        let stopwords = if config.remove_stopwords {
            stopword_language(&config.language)
                .map(|lang| get(lang).iter().map(|s| s.to_lowercase()).collect())
                .unwrap_or_default()
        } else {
            HashSet::new()
        };

        Self {
            config: config.clone(),
            stemmer,
            stopwords,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Lazily tokenize `text`
    pub fn tokens<'a>(&'a self, text: &'a str) -> StandardTokens<'a> {
        StandardTokens {
            analyzer: self,
            words: text.unicode_word_indices(),
            position: 0,
        }
    }

    /// Case-fold a single query term without segmenting it
    pub fn normalize(&self, term: &str) -> String {
        if self.config.lowercase {
            term.to_lowercase()
        } else {
            term.to_string()
        }
    }

    /// Normalize one word, or drop it (length, stop words, non-alphanumeric)
    fn filter(&self, word: &str) -> Option<String> {
        if !word.chars().any(char::is_alphanumeric) {
            return None;
        }

        let token = self.normalize(word);
        let len = token.chars().count();
        if len < self.config.min_token_length || len > self.config.max_token_length {
            return None;
        }

        if !self.stopwords.is_empty() && self.stopwords.contains(&token.to_lowercase()) {
            return None;
        }

        match &self.stemmer {
            Some(stemmer) => Some(stemmer.stem(&token).into_owned()),
            None => Some(token),
        }
    }
}

impl fmt::Debug for StandardAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandardAnalyzer")
            .field("config", &self.config)
            .field("stopwords", &self.stopwords.len())
            .finish()
    }
}

/// Token iterator of the standard analyzer
///
/// Filtered words still consume a position, so phrase offsets stay aligned
/// with the source text.
pub struct StandardTokens<'a> {
    analyzer: &'a StandardAnalyzer,
    words: UnicodeWordIndices<'a>,
    position: u32,
}

impl<'a> Iterator for StandardTokens<'a> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        for (offset, word) in self.words.by_ref() {
            let position = self.position;
            self.position += 1;

            if let Some(text) = self.analyzer.filter(word) {
                return Some(Token {
                    text,
                    position,
                    offset_from: offset,
                    offset_to: offset + word.len(),
                });
            }
        }
        None
    }
}

fn stemmer_algorithm(language: &str) -> Option<Algorithm> {
    match language.to_ascii_lowercase().as_str() {
        "english" | "en" => Some(Algorithm::English),
        "french" | "fr" => Some(Algorithm::French),
        "german" | "de" => Some(Algorithm::German),
        "spanish" | "es" => Some(Algorithm::Spanish),
        "italian" | "it" => Some(Algorithm::Italian),
        "portuguese" | "pt" => Some(Algorithm::Portuguese),
        "dutch" | "nl" => Some(Algorithm::Dutch),
        "swedish" | "sv" => Some(Algorithm::Swedish),
        "russian" | "ru" => Some(Algorithm::Russian),
        _ => None,
    }
}

fn stopword_language(language: &str) -> Option<LANGUAGE> {
    match language.to_ascii_lowercase().as_str() {
        "english" | "en" => Some(LANGUAGE::English),
        "french" | "fr" => Some(LANGUAGE::French),
        "german" | "de" => Some(LANGUAGE::German),
        "spanish" | "es" => Some(LANGUAGE::Spanish),
        "italian" | "it" => Some(LANGUAGE::Italian),
        "portuguese" | "pt" => Some(LANGUAGE::Portuguese),
        "dutch" | "nl" => Some(LANGUAGE::Dutch),
        "swedish" | "sv" => Some(LANGUAGE::Swedish),
        "russian" | "ru" => Some(LANGUAGE::Russian),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(analyzer: &StandardAnalyzer, input: &str) -> Vec<String> {
        analyzer.tokens(input).map(|t| t.text).collect()
    }

    #[test]
    fn test_default_keeps_short_words() {
        let analyzer = StandardAnalyzer::new(&AnalyzerConfig::default());
        assert_eq!(texts(&analyzer, "The Quick fox"), vec!["the", "quick", "fox"]);
    }

    #[test]
    fn test_positions_and_offsets() {
        let analyzer = StandardAnalyzer::new(&AnalyzerConfig::default());
        let text = "Hello, wide world!";
        let tokens: Vec<Token> = analyzer.tokens(text).collect();

        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].position, 0);
        assert_eq!(tokens[2].position, 2);
        assert_eq!(&text[tokens[1].offset_from..tokens[1].offset_to], "wide");
        assert_eq!(&text[tokens[2].offset_from..tokens[2].offset_to], "world");
    }

    #[test]
    fn test_stopwords_leave_position_gaps() {
        let config = AnalyzerConfig::default().with_stopwords(true);
        let analyzer = StandardAnalyzer::new(&config);
        let tokens: Vec<Token> = analyzer.tokens("the zebra and the giraffe").collect();

        let pairs: Vec<(&str, u32)> = tokens.iter().map(|t| (t.text.as_str(), t.position)).collect();
        assert_eq!(pairs, vec![("zebra", 1), ("giraffe", 4)]);
    }

    #[test]
    fn test_stemming() {
        let analyzer = StandardAnalyzer::new(&AnalyzerConfig::english());
        assert_eq!(texts(&analyzer, "running runners"), vec!["run", "runner"]);
    }

    #[test]
    fn test_length_filter() {
        let config = AnalyzerConfig::default().with_token_length(3, 5);
        let analyzer = StandardAnalyzer::new(&config);
        assert_eq!(texts(&analyzer, "a ab abc abcdef"), vec!["abc"]);
    }

    #[test]
    fn test_punctuation_only_input() {
        let analyzer = StandardAnalyzer::new(&AnalyzerConfig::default());
        assert!(texts(&analyzer, "  ... !!! ,,, ").is_empty());
        assert!(texts(&analyzer, "").is_empty());
    }

    #[test]
    fn test_case_preserved_when_lowercase_disabled() {
        let config = AnalyzerConfig {
            lowercase: false,
            ..Default::default()
        };
        let analyzer = StandardAnalyzer::new(&config);
        assert_eq!(texts(&analyzer, "Rust Lang"), vec!["Rust", "Lang"]);
        assert_eq!(analyzer.normalize("Rust"), "Rust");
    }
}
