//! The shared regex cache.
//!
//! Identical (pattern, options) pairs across all rules compile to a single
//! matcher. Each entry memoises its last evaluation by global line id, so a
//! second clause hitting the same entry on the same line reuses the captures
//! with no regex engine invocation.
//!
//! Clauses with runtime inserts never enter the cache; their final text is
//! known only per instance.

use std::collections::HashMap;

use regex::Regex;

/// Captured groups from one evaluation; index 0 is the whole match.
pub type CaptureSet = Vec<Option<String>>;

/// Handle to one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheHandle(usize);

struct CacheEntry {
    re: Regex,
    /// Line id of the memoised evaluation (0 = none yet).
    last_line: u64,
    /// Result of that evaluation.
    last_result: Option<CaptureSet>,
}

/// Deduplicating regex cache with per-line memoisation.
#[derive(Default)]
pub struct RegexCache {
    entries: Vec<CacheEntry>,
    index: HashMap<(String, String), CacheHandle>,
    /// Number of real regex executions (memo hits excluded).
    evaluations: u64,
}

/// Build the final pattern: inline flags prefix plus the resolved text.
pub fn pattern_with_options(text: &str, options: &str) -> String {
    if options.is_empty() {
        text.to_string()
    } else {
        format!("(?{options}){text}")
    }
}

impl RegexCache {
    pub fn new() -> Self {
        RegexCache::default()
    }

    /// Intern a (resolved text, options) pair, compiling it on first sight.
    pub fn intern(&mut self, text: &str, options: &str) -> Result<CacheHandle, regex::Error> {
        let key = (text.to_string(), options.to_string());
        if let Some(&h) = self.index.get(&key) {
            return Ok(h);
        }
        let re = Regex::new(&pattern_with_options(text, options))?;
        let h = CacheHandle(self.entries.len());
        self.entries.push(CacheEntry {
            re,
            last_line: 0,
            last_result: None,
        });
        self.index.insert(key, h);
        Ok(h)
    }

    /// Evaluate an entry against the current line, reusing the memoised
    /// result when the line id matches.
    pub fn eval(&mut self, h: CacheHandle, line_id: u64, text: &str) -> Option<&CaptureSet> {
        let entry = &mut self.entries[h.0];
        if entry.last_line != line_id {
            entry.last_line = line_id;
            entry.last_result = entry.re.captures(text).map(|caps| {
                (0..caps.len())
                    .map(|i| caps.get(i).map(|m| m.as_str().to_string()))
                    .collect()
            });
            self.evaluations += 1;
        }
        entry.last_result.as_ref()
    }

    /// Distinct compiled patterns.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Real regex executions performed so far.
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }
}
