use super::cjk::{CjkAnalyzer, CjkTokens};
use super::standard::{StandardAnalyzer, StandardTokens};
use crate::config::{AnalyzerConfig, AnalyzerKind};

/// A normalized token with its position and byte span in the source text
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub position: u32,
    pub offset_from: usize,
    pub offset_to: usize,
}

/// Analysis strategy, selected once per field
#[derive(Debug)]
pub enum Analyzer {
    Standard(StandardAnalyzer),
    Cjk(CjkAnalyzer),
}

impl Analyzer {
    pub fn from_config(config: &AnalyzerConfig) -> Self {
        match config.kind {
            AnalyzerKind::Standard => Analyzer::Standard(StandardAnalyzer::new(config)),
            AnalyzerKind::Cjk => Analyzer::Cjk(CjkAnalyzer::new(config)),
        }
    }

    /// Standard analyzer with default settings
    pub fn standard() -> Self {
        Self::from_config(&AnalyzerConfig::default())
    }

    pub fn kind(&self) -> AnalyzerKind {
        match self {
            Analyzer::Standard(_) => AnalyzerKind::Standard,
            Analyzer::Cjk(_) => AnalyzerKind::Cjk,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        match self {
            Analyzer::Standard(a) => a.config(),
            Analyzer::Cjk(a) => a.config(),
        }
    }

    /// Tokenize `text` into a lazy stream of tokens
    pub fn analyze<'a>(&'a self, text: &'a str) -> TokenStream<'a> {
        let inner = match self {
            Analyzer::Standard(a) => Inner::Standard(a.tokens(text)),
            Analyzer::Cjk(a) => Inner::Cjk(a.tokens(text)),
        };
        TokenStream {
            analyzer: self,
            text,
            inner,
        }
    }

    /// Token texts only
    pub fn terms(&self, text: &str) -> Vec<String> {
        self.analyze(text).map(|t| t.text).collect()
    }

    /// Case-fold a raw query term without segmenting or stemming it
    pub fn normalize(&self, term: &str) -> String {
        match self {
            Analyzer::Standard(a) => a.normalize(term),
            Analyzer::Cjk(a) => a.normalize(term),
        }
    }
}

enum Inner<'a> {
    Standard(StandardTokens<'a>),
    Cjk(CjkTokens<'a>),
}

/// Lazy, finite token sequence over one piece of text
pub struct TokenStream<'a> {
    analyzer: &'a Analyzer,
    text: &'a str,
    inner: Inner<'a>,
}

impl<'a> TokenStream<'a> {
    /// A fresh stream over the same text, starting from the first token
    pub fn restart(&self) -> TokenStream<'a> {
        self.analyzer.analyze(self.text)
    }

    pub fn text(&self) -> &'a str {
        self.text
    }
}

impl<'a> Iterator for TokenStream<'a> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        match &mut self.inner {
            Inner::Standard(tokens) => tokens.next(),
            Inner::Cjk(tokens) => tokens.next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_is_deterministic() {
        let analyzer = Analyzer::standard();
        let first: Vec<Token> = analyzer.analyze("the quick fox").collect();
        let second: Vec<Token> = analyzer.analyze("the quick fox").collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_restart_yields_same_sequence() {
        let analyzer = Analyzer::standard();
        let mut stream = analyzer.analyze("one two three");
        assert_eq!(stream.next().map(|t| t.text), Some("one".to_string()));

        let restarted: Vec<String> = stream.restart().map(|t| t.text).collect();
        assert_eq!(restarted, vec!["one", "two", "three"]);

        let rest: Vec<String> = stream.map(|t| t.text).collect();
        assert_eq!(rest, vec!["two", "three"]);
    }

    #[test]
    fn test_kind_from_config() {
        assert_eq!(Analyzer::standard().kind(), AnalyzerKind::Standard);
        assert_eq!(
            Analyzer::from_config(&AnalyzerConfig::cjk()).kind(),
            AnalyzerKind::Cjk
        );
    }

    #[test]
    fn test_normalize_does_not_split() {
        let analyzer = Analyzer::standard();
        assert_eq!(analyzer.normalize("QuIkC"), "quikc");
        assert_eq!(analyzer.terms("Quick-Fox"), vec!["quick", "fox"]);
    }
}
