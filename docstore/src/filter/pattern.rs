use crate::common::REGEX_CACHE_SIZE;
use crate::errors::{DocStoreError, DocStoreResult, ErrorKind};
use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::{Regex, RegexBuilder};
use std::fmt::{Debug, Display, Formatter};
use std::num::NonZeroUsize;

const DELIMITERS: [char; 8] = ['/', '#', '~', '!', '@', '%', '|', '+'];

static PATTERN_CACHE: Lazy<Mutex<LruCache<String, Regex>>> = Lazy::new(|| {
    let size = NonZeroUsize::new(REGEX_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
    Mutex::new(LruCache::new(size))
});

/// A compiled regular expression used by `$regex` and `$not`.
///
/// The source may be written with delimiters and trailing flags
/// (`/^ann/i`, `#a.b#s`). A bare source is compiled case-insensitive. All
/// patterns match Unicode scalar values.
///
/// Supported flags: `i` (case-insensitive), `m` (multi-line), `s` (dot matches
/// newline), `x` (ignore whitespace), `U` (swap greed) and `u` (accepted,
/// Unicode is always on).
#[derive(Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn compile(source: &str) -> DocStoreResult<Pattern> {
        if let Some(regex) = PATTERN_CACHE.lock().get(source) {
            return Ok(Pattern {
                source: source.to_string(),
                regex: regex.clone(),
            });
        }

        let regex = build(source)?;
        PATTERN_CACHE.lock().put(source.to_string(), regex.clone());
        Ok(Pattern {
            source: source.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

fn build(source: &str) -> DocStoreResult<Regex> {
    let (body, flags) = match split_delimited(source) {
        Some(parts) => parts,
        None => (source, "i"),
    };

    let mut builder = RegexBuilder::new(body);
    builder.unicode(true);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            'U' => builder.swap_greed(true),
            'u' => &mut builder,
            other => {
                log::error!("Unsupported pattern flag '{}' in {}", other, source);
                return Err(DocStoreError::new(
                    &format!("Unsupported pattern flag '{}' in {}", other, source),
                    ErrorKind::PredicateError,
                ));
            }
        };
    }

    builder.build().map_err(|err| {
        log::error!("Invalid pattern {}: {}", source, err);
        DocStoreError::new(
            &format!("Invalid pattern {}: {}", source, err),
            ErrorKind::PredicateError,
        )
    })
}

/// Splits `/body/flags` into body and flags when the source is delimited.
fn split_delimited(source: &str) -> Option<(&str, &str)> {
    let delimiter = source.chars().next()?;
    if !DELIMITERS.contains(&delimiter) {
        return None;
    }
    let close = source.rfind(delimiter)?;
    if close == 0 {
        return None;
    }
    let flags = &source[close + delimiter.len_utf8()..];
    if !flags.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some((&source[delimiter.len_utf8()..close], flags))
}

impl Debug for Pattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pattern({})", self.source)
    }
}

impl Display for Pattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}
