//! Text analysis
//!
//! Turns raw field text into a sequence of normalized tokens with positions
//! and byte offsets. Two segmentation strategies are available:
//! - `Standard`: Unicode word boundaries (UAX #29), lowercasing, optional
//!   stop-word removal and Snowball stemming
//! - `Cjk`: dictionary/HMM segmentation for text without explicit word
//!   boundaries
//!
//! The strategy is chosen per field when the index is created and never
//! changes afterwards, so indexing, querying and highlighting all agree.

mod analyzer;
mod cjk;
mod standard;

pub use analyzer::{Analyzer, Token, TokenStream};
pub use cjk::{CjkAnalyzer, CjkTokens};
pub use standard::{StandardAnalyzer, StandardTokens};
