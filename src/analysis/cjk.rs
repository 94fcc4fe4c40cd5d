//! Script-aware segmentation for Chinese, Japanese and Korean text
//!
//! Uses jieba (prefix dictionary + HMM for unknown words). Latin words
//! embedded in CJK text come out as their own segments. Stop-word removal
//! and stemming settings do not apply here.
//!
//! Positions follow the standard analyzer: every word segment takes one,
//! including words dropped by the length limits. Whitespace and punctuation
//! segments are separators and take none.

use jieba_rs::Jieba;
use once_cell::sync::Lazy;
use std::vec::IntoIter;

use super::analyzer::Token;
use crate::config::AnalyzerConfig;

/// Global jieba segmenter, the dictionary is loaded once per process
static JIEBA: Lazy<Jieba> = Lazy::new(Jieba::new);

/// Dictionary-based analyzer for languages without explicit word boundaries
#[derive(Debug)]
pub struct CjkAnalyzer {
    config: AnalyzerConfig,
}

impl CjkAnalyzer {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn tokens<'a>(&'a self, text: &'a str) -> CjkTokens<'a> {
        CjkTokens {
            analyzer: self,
            base: text.as_ptr() as usize,
            segments: JIEBA.cut(text, true).into_iter(),
            position: 0,
        }
    }

    pub fn normalize(&self, term: &str) -> String {
        if self.config.lowercase {
            term.to_lowercase()
        } else {
            term.to_string()
        }
    }

    fn filter(&self, segment: &str) -> Option<String> {
        let token = self.normalize(segment.trim());
        let len = token.chars().count();
        if len < self.config.min_token_length || len > self.config.max_token_length {
            return None;
        }
        Some(token)
    }
}

/// Token iterator of the CJK analyzer
///
/// Segmentation of the whole input happens up front; filtering and
/// normalization are lazy. Segments are sub-slices of the input, so byte
/// offsets come from their distance to the start of the text.
pub struct CjkTokens<'a> {
    analyzer: &'a CjkAnalyzer,
    base: usize,
    segments: IntoIter<&'a str>,
    position: u32,
}

impl<'a> Iterator for CjkTokens<'a> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        for segment in self.segments.by_ref() {
            if !is_word(segment) {
                continue;
            }
            let position = self.position;
            self.position += 1;

            if let Some(text) = self.analyzer.filter(segment) {
                let trimmed = segment.trim_start();
                let offset_from = trimmed.as_ptr() as usize - self.base;
                return Some(Token {
                    text,
                    position,
                    offset_from,
                    offset_to: offset_from + trimmed.trim_end().len(),
                });
            }
        }
        None
    }
}

fn is_word(segment: &str) -> bool {
    segment.chars().any(char::is_alphanumeric)
}
