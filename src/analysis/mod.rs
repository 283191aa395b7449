mod analyzer;

pub use analyzer::{ObserveOutcome, SessionAnalyzer};
