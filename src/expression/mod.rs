pub mod pattern;

pub use pattern::{compile_pattern, pattern_matches};
