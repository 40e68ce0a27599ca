//! Cache trace header — a machine-readable record of what the validation
//! pipeline did for one exchange.
//!
//! The value grammar is fixed:
//!
//! ```text
//! validation-applied=<bool>;validation-matched=<bool>;short-circuited=<bool>;query-made=<bool>
//! ```
//!
//! Four `key=boolean` assignments, that order, `;`-separated, no trailing
//! separator, booleans spelled exactly `true`/`false`. Parsing rejects any
//! other shape. At most one trace header may be present on a response; a
//! second write logs a warning and overwrites the first.

use std::fmt;

use crate::http::Headers;

/// Name of the trace header.
pub const TRACE_HEADER: &str = "x-cache-trace";

// Fixed field order of the value grammar.
const FIELDS: [&str; 4] = [
    "validation-applied",
    "validation-matched",
    "short-circuited",
    "query-made",
];

/// What the caching layer did for one request/response exchange.
///
/// # Examples
///
/// ```
/// use revalid::trace::CacheTrace;
///
/// let trace = CacheTrace {
///     validation_applied: true,
///     validation_matched: true,
///     short_circuited: true,
///     query_made: false,
/// };
/// let text = trace.to_string();
/// assert_eq!(
///     text,
///     "validation-applied=true;validation-matched=true;short-circuited=true;query-made=false"
/// );
/// assert_eq!(CacheTrace::parse(&text), Some(trace));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheTrace {
    /// A validator was compared against the request's conditional headers.
    pub validation_applied: bool,
    /// The comparison found the client's copy current.
    pub validation_matched: bool,
    /// The exchange was answered without invoking the resource handler
    /// (or, client side, without calling upstream).
    pub short_circuited: bool,
    /// The asynchronous validator query provider was called and returned a
    /// validator.
    pub query_made: bool,
}

impl CacheTrace {
    /// Parses the fixed trace grammar. Any deviation — wrong field count,
    /// wrong field order, unknown key, malformed boolean — fails closed.
    pub fn parse(s: &str) -> Option<Self> {
        let mut values = [false; 4];
        let mut parts = s.split(';');

        for (i, expected_key) in FIELDS.iter().enumerate() {
            let part = parts.next()?;
            let (key, value) = part.split_once('=')?;
            if key != *expected_key {
                return None;
            }
            values[i] = match value {
                "true" => true,
                "false" => false,
                _ => return None,
            };
        }
        if parts.next().is_some() {
            return None;
        }

        Some(Self {
            validation_applied: values[0],
            validation_matched: values[1],
            short_circuited: values[2],
            query_made: values[3],
        })
    }

    /// Reads the trace header from a header map, if present and well-formed.
    pub fn from_headers(headers: &Headers) -> Option<Self> {
        headers.get(TRACE_HEADER).and_then(Self::parse)
    }

    /// Writes this trace onto a response's headers.
    ///
    /// Exactly one trace header may exist per response: if one is already
    /// present it is overwritten, and the collision is logged.
    pub fn apply(&self, headers: &mut Headers) {
        if headers.contains(TRACE_HEADER) {
            tracing::warn!(
                existing = headers.get(TRACE_HEADER),
                replacement = %self,
                "duplicate cache trace header — overwriting"
            );
        }
        headers.set(TRACE_HEADER, self.to_string());
    }
}

impl fmt::Display for CacheTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={};{}={};{}={};{}={}",
            FIELDS[0],
            self.validation_applied,
            FIELDS[1],
            self.validation_matched,
            FIELDS[2],
            self.short_circuited,
            FIELDS[3],
            self.query_made,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_combinations() {
        for bits in 0u8..16 {
            let trace = CacheTrace {
                validation_applied: bits & 1 != 0,
                validation_matched: bits & 2 != 0,
                short_circuited: bits & 4 != 0,
                query_made: bits & 8 != 0,
            };
            assert_eq!(CacheTrace::parse(&trace.to_string()), Some(trace));
        }
    }

    #[test]
    fn parse_rejects_deviations() {
        // Missing field
        assert!(
            CacheTrace::parse("validation-applied=true;validation-matched=true;short-circuited=true")
                .is_none()
        );
        // Trailing separator
        assert!(CacheTrace::parse(
            "validation-applied=true;validation-matched=true;short-circuited=true;query-made=true;"
        )
        .is_none());
        // Wrong order
        assert!(CacheTrace::parse(
            "validation-matched=true;validation-applied=true;short-circuited=true;query-made=true"
        )
        .is_none());
        // Malformed boolean
        assert!(CacheTrace::parse(
            "validation-applied=TRUE;validation-matched=true;short-circuited=true;query-made=true"
        )
        .is_none());
        // Unknown key
        assert!(CacheTrace::parse(
            "validation-applied=true;validation-matched=true;short-circuited=true;queries=true"
        )
        .is_none());
        assert!(CacheTrace::parse("").is_none());
    }

    #[test]
    fn apply_overwrites_existing() {
        let mut headers = Headers::new();
        headers.insert(TRACE_HEADER, "stale value");

        let trace = CacheTrace {
            short_circuited: true,
            ..Default::default()
        };
        trace.apply(&mut headers);

        assert_eq!(headers.count(TRACE_HEADER), 1);
        assert_eq!(CacheTrace::from_headers(&headers), Some(trace));
    }
}
