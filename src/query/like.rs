use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use regex::Regex;

use crate::core::{DbError, Result};

lazy_static::lazy_static! {
    static ref REGEX_LRU_CACHE: Arc<Mutex<LruCache<String, Arc<Regex>>>> =
        Arc::new(Mutex::new(LruCache::new(NonZeroUsize::new(200).unwrap())));
}

/// Shape of a LIKE pattern, as far as flat key-value query languages can
/// express it. Backends that only offer begins-with / contains operators
/// categorize the pattern first and reject anything with interior wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LikePattern {
    /// No wildcards; equivalent to equality
    Exact(String),
    /// `prefix%`
    Prefix(String),
    /// `%suffix`
    Suffix(String),
    /// `%infix%`
    Contains(String),
}

impl LikePattern {
    /// Categorize a pattern with `%` wildcards only at the edges.
    ///
    /// Patterns with wildcards in the interior (`f%o`, `a%b%c`) cannot be
    /// pushed down to begins-with / contains style operators and are
    /// rejected.
    pub fn categorize(pattern: &str) -> Result<Self> {
        let starts = pattern.starts_with('%');
        let ends = pattern.len() > 1 && pattern.ends_with('%');
        let core_start = if starts { 1 } else { 0 };
        let core_end = if ends { pattern.len() - 1 } else { pattern.len() };
        let core = &pattern[core_start..core_end];

        if core.contains('%') {
            return Err(DbError::UnsupportedOperation(format!(
                "Like pattern [{}] with an interior wildcard is not supported by this backend",
                pattern
            )));
        }

        Ok(match (starts, ends) {
            (false, false) => Self::Exact(core.to_string()),
            (false, true) => Self::Prefix(core.to_string()),
            (true, false) => Self::Suffix(core.to_string()),
            (true, true) => Self::Contains(core.to_string()),
        })
    }

}

/// Convert a LIKE pattern to an anchored regex
#[inline]
fn like_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 2);
    regex.push('^');

    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            '\\' if i + 1 < chars.len() => {
                i += 1;
                regex.push_str(&regex::escape(&chars[i].to_string()));
            }
            c if ".*+?^${}()|[]\\".contains(c) => {
                regex.push('\\');
                regex.push(c);
            }
            c => regex.push(c),
        }
        i += 1;
    }

    regex.push('$');
    regex
}

/// Fast path for simple patterns (no regex)
#[inline]
fn fast_path_like(text: &str, pattern: &str, case_sensitive: bool) -> Option<bool> {
    // 1. Exact match (no wildcards)
    if !pattern.contains('%') && !pattern.contains('_') {
        return Some(if case_sensitive {
            text == pattern
        } else {
            text.eq_ignore_ascii_case(pattern)
        });
    }

    // 2. Starts with "prefix%"
    if pattern.ends_with('%')
        && !pattern[..pattern.len() - 1].contains('%')
        && !pattern.contains('_')
    {
        let prefix = &pattern[..pattern.len() - 1];
        return Some(if case_sensitive {
            text.starts_with(prefix)
        } else {
            text.to_lowercase().starts_with(&prefix.to_lowercase())
        });
    }

    // 3. Ends with "%suffix"
    if pattern.starts_with('%') && !pattern[1..].contains('%') && !pattern.contains('_') {
        let suffix = &pattern[1..];
        return Some(if case_sensitive {
            text.ends_with(suffix)
        } else {
            text.to_lowercase().ends_with(&suffix.to_lowercase())
        });
    }

    // 4. Contains "%substring%"
    if pattern.starts_with('%')
        && pattern.ends_with('%')
        && pattern.matches('%').count() == 2
        && !pattern.contains('_')
    {
        let substring = &pattern[1..pattern.len() - 1];
        return Some(if case_sensitive {
            text.contains(substring)
        } else {
            text.to_lowercase().contains(&substring.to_lowercase())
        });
    }

    None
}

/// Fetch a compiled regex through the LRU cache
fn get_or_compile_regex(pattern: &str, case_sensitive: bool) -> Result<Arc<Regex>> {
    let cache_key = if case_sensitive {
        format!("s:{}", pattern)
    } else {
        format!("i:{}", pattern)
    };

    {
        let mut cache = REGEX_LRU_CACHE.lock()?;
        if let Some(regex) = cache.get(&cache_key) {
            return Ok(Arc::clone(regex));
        }
    }

    let regex_pattern = like_to_regex(pattern);
    let compiled = if case_sensitive {
        Regex::new(&regex_pattern)
            .map_err(|e| DbError::IllegalArgument(format!("Invalid LIKE pattern: {}", e)))?
    } else {
        regex::RegexBuilder::new(&regex_pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| DbError::IllegalArgument(format!("Invalid LIKE pattern: {}", e)))?
    };

    let compiled_arc = Arc::new(compiled);

    {
        let mut cache = REGEX_LRU_CACHE.lock()?;
        cache.put(cache_key, Arc::clone(&compiled_arc));
    }

    Ok(compiled_arc)
}

/// Evaluate a LIKE pattern against a text value.
///
/// Simple edge-wildcard patterns use an O(n) fast path; anything else goes
/// through a cached compiled regex.
#[inline]
pub fn eval_like(text: &str, pattern: &str, case_sensitive: bool) -> Result<bool> {
    if let Some(result) = fast_path_like(text, pattern, case_sensitive) {
        return Ok(result);
    }

    let regex = get_or_compile_regex(pattern, case_sensitive)?;
    Ok(regex.is_match(text))
}
