use crate::core::{Result, SchemaError};
use lru::LruCache;
use regex::{Regex, RegexBuilder};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

const REGEX_CACHE_SIZE: usize = 200;

lazy_static::lazy_static! {
    static ref REGEX_LRU_CACHE: Mutex<LruCache<String, Arc<Regex>>> = Mutex::new(
        LruCache::new(NonZeroUsize::new(REGEX_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN))
    );
}

/// Splits `/body/flags` literals; anything else is a bare pattern.
fn split_literal(pattern: &str) -> (&str, bool) {
    if let Some(rest) = pattern.strip_prefix('/')
        && let Some(end) = rest.rfind('/')
    {
        let flags = &rest[end + 1..];
        if flags.chars().all(|c| matches!(c, 'i' | 'g' | 'm' | 'u')) {
            return (&rest[..end], flags.contains('i'));
        }
    }
    (pattern, false)
}

/// Compile a validation pattern, sharing compiled regexes through an LRU cache.
pub fn compile_pattern(pattern: &str) -> Result<Arc<Regex>> {
    {
        let mut cache = REGEX_LRU_CACHE.lock()?;
        if let Some(regex) = cache.get(pattern) {
            return Ok(Arc::clone(regex));
        }
    }

    let (body, case_insensitive) = split_literal(pattern);
    let compiled = RegexBuilder::new(body)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| SchemaError::Expression(format!("Invalid pattern '{}': {}", pattern, e)))?;

    let compiled = Arc::new(compiled);
    {
        let mut cache = REGEX_LRU_CACHE.lock()?;
        cache.put(pattern.to_string(), Arc::clone(&compiled));
    }

    Ok(compiled)
}

#[inline]
pub fn pattern_matches(text: &str, pattern: &str) -> Result<bool> {
    Ok(compile_pattern(pattern)?.is_match(text))
}
