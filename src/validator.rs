//! Resource validators — entity tags paired with last-modified timestamps.
//!
//! A validator identifies one concrete representation of a resource. It is
//! what conditional requests (`If-None-Match`, `If-Modified-Since`,
//! `If-Match`, `If-Unmodified-Since`) are compared against, and what the
//! validator store persists between exchanges.
//!
//! The canonical persisted form is two CRLF-joined lines: the entity tag in
//! its wire representation, then the timestamp as an RFC 1123 date. Parsing
//! is fail-closed: anything that is not exactly that shape yields `None`,
//! never an error or a partial value.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// An opaque entity tag, strong or weak (RFC 9110 §8.8.3).
///
/// The stored `tag` is the opaque text between the quotes; quoting and the
/// `W/` weakness prefix belong to the wire form.
///
/// # Examples
///
/// ```
/// use revalid::validator::EntityTag;
///
/// let strong = EntityTag::strong("abc");
/// assert_eq!(strong.to_string(), "\"abc\"");
///
/// let weak = EntityTag::parse("W/\"abc\"").unwrap();
/// assert!(weak.is_weak());
/// assert!(weak.weak_eq(&strong));
/// assert!(!weak.strong_eq(&strong));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTag {
    tag: String,
    weak: bool,
}

impl EntityTag {
    /// Creates a strong entity tag from its opaque text.
    pub fn strong(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            weak: false,
        }
    }

    /// Creates a weak entity tag from its opaque text.
    pub fn weak(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            weak: true,
        }
    }

    /// Parses an entity tag from its wire form (`"abc"` or `W/"abc"`).
    ///
    /// Returns `None` when the input is not a well-formed entity tag: missing
    /// quotes, stray characters outside the quotes, or a quote/control
    /// character inside the opaque text.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (weak, quoted) = match s.strip_prefix("W/") {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let inner = quoted.strip_prefix('"')?.strip_suffix('"')?;
        if inner.contains('"') || inner.contains(['\r', '\n']) {
            return None;
        }

        Some(Self {
            tag: inner.to_owned(),
            weak,
        })
    }

    /// Returns the opaque tag text (without quotes or weakness prefix).
    pub fn opaque(&self) -> &str {
        &self.tag
    }

    /// Returns `true` if this tag carries the `W/` weakness prefix.
    pub fn is_weak(&self) -> bool {
        self.weak
    }

    /// Weak comparison: opaque texts are equal, weakness ignored.
    ///
    /// This is the comparison `If-None-Match` uses.
    pub fn weak_eq(&self, other: &EntityTag) -> bool {
        self.tag == other.tag
    }

    /// Strong comparison: opaque texts are equal and neither tag is weak.
    ///
    /// This is the comparison `If-Match` uses; a weak tag never strongly
    /// matches anything.
    pub fn strong_eq(&self, other: &EntityTag) -> bool {
        !self.weak && !other.weak && self.tag == other.tag
    }
}

impl fmt::Display for EntityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.weak {
            write!(f, "W/\"{}\"", self.tag)
        } else {
            write!(f, "\"{}\"", self.tag)
        }
    }
}

/// Returns `true` when `header` (an `If-None-Match`/`If-Match` value: `*` or
/// a comma-separated entity-tag list) matches `etag` under the given
/// comparison.
///
/// Unparseable list members are skipped rather than failing the whole
/// header; `*` matches any existing representation.
pub fn list_matches(header: &str, etag: &EntityTag, strong: bool) -> bool {
    if header.trim() == "*" {
        return true;
    }
    split_tag_list(header)
        .filter_map(|part| EntityTag::parse(part))
        .any(|candidate| {
            if strong {
                candidate.strong_eq(etag)
            } else {
                candidate.weak_eq(etag)
            }
        })
}

// Commas inside the quoted opaque text do not split the list.
fn split_tag_list(header: &str) -> impl Iterator<Item = &str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    for (i, c) in header.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&header[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&header[start..]);
    parts.into_iter()
}

/// Truncates a timestamp to whole seconds.
///
/// Not every backing store preserves sub-second precision, so the validator
/// model never carries any: round-trip equality must hold across all of
/// them.
pub fn truncate_to_seconds(t: SystemTime) -> SystemTime {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => UNIX_EPOCH + Duration::from_secs(d.as_secs()),
        Err(_) => UNIX_EPOCH,
    }
}

/// An entity tag paired with a last-modified timestamp — the validator for
/// one resource representation.
///
/// Created fresh when a representation first exists, replaced (never
/// mutated) when the resource changes, removed when the resource is deleted
/// or its route pattern is bulk-invalidated.
///
/// # Examples
///
/// ```
/// use std::time::SystemTime;
/// use revalid::validator::{EntityTag, TimedEntityTag};
///
/// let v = TimedEntityTag::new(EntityTag::strong("abc"), SystemTime::now());
/// let text = v.serialize();
/// assert_eq!(TimedEntityTag::parse(&text), Some(v));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedEntityTag {
    etag: EntityTag,
    last_modified: SystemTime,
}

impl TimedEntityTag {
    /// Creates a validator; the timestamp is truncated to whole seconds.
    pub fn new(etag: EntityTag, last_modified: SystemTime) -> Self {
        Self {
            etag,
            last_modified: truncate_to_seconds(last_modified),
        }
    }

    /// Returns the entity tag.
    pub fn etag(&self) -> &EntityTag {
        &self.etag
    }

    /// Returns the last-modified timestamp (whole seconds).
    pub fn last_modified(&self) -> SystemTime {
        self.last_modified
    }

    /// Returns the timestamp formatted as an RFC 1123 date
    /// (`Sun, 06 Nov 1994 08:49:37 GMT`), the form the `Last-Modified`
    /// header carries.
    pub fn last_modified_http(&self) -> String {
        httpdate::fmt_http_date(self.last_modified)
    }

    /// Serializes to the canonical two-line form: entity tag, CRLF,
    /// RFC 1123 timestamp.
    pub fn serialize(&self) -> String {
        format!("{}\r\n{}", self.etag, self.last_modified_http())
    }

    /// Parses the canonical two-line form.
    ///
    /// Fails closed (`None`) when the input is empty, does not split into
    /// exactly two lines on CRLF, the first line is not a well-formed entity
    /// tag, or the second line is not a well-formed RFC 1123 date.
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() {
            return None;
        }
        let lines: Vec<&str> = s.split("\r\n").collect();
        if lines.len() != 2 {
            return None;
        }
        let etag = EntityTag::parse(lines[0])?;
        let last_modified = httpdate::parse_http_date(lines[1]).ok()?;
        Some(Self {
            etag,
            last_modified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_time() -> SystemTime {
        // Whole-second timestamp so equality assertions are exact.
        UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    #[test]
    fn entity_tag_wire_forms() {
        assert_eq!(EntityTag::strong("abc").to_string(), "\"abc\"");
        assert_eq!(EntityTag::weak("abc").to_string(), "W/\"abc\"");
    }

    #[test]
    fn entity_tag_parse_rejects_malformed() {
        assert!(EntityTag::parse("abc").is_none()); // unquoted
        assert!(EntityTag::parse("\"abc").is_none()); // unterminated
        assert!(EntityTag::parse("w/\"abc\"").is_none()); // lowercase prefix
        assert!(EntityTag::parse("\"a\"b\"").is_none()); // quote inside
        assert!(EntityTag::parse("").is_none());
    }

    #[test]
    fn weak_and_strong_comparison() {
        let strong = EntityTag::strong("x");
        let weak = EntityTag::weak("x");
        assert!(strong.weak_eq(&weak));
        assert!(strong.strong_eq(&strong));
        assert!(!strong.strong_eq(&weak));
        assert!(!weak.strong_eq(&weak));
    }

    #[test]
    fn list_matching() {
        let etag = EntityTag::strong("v2");
        assert!(list_matches("\"v1\", \"v2\"", &etag, false));
        assert!(list_matches("*", &etag, false));
        assert!(!list_matches("\"v1\", \"v3\"", &etag, false));
        assert!(list_matches("W/\"v2\"", &etag, false));
        assert!(!list_matches("W/\"v2\"", &etag, true)); // weak never strong-matches
    }

    #[test]
    fn list_matching_with_comma_inside_tag() {
        let etag = EntityTag::strong("a,b");
        assert!(list_matches("\"a,b\"", &etag, false));
    }

    #[test]
    fn serialize_parse_roundtrip() {
        for (etag, weak) in [("abc", false), ("abc", true), ("", false)] {
            let tag = if weak {
                EntityTag::weak(etag)
            } else {
                EntityTag::strong(etag)
            };
            let v = TimedEntityTag::new(tag, sample_time());
            assert_eq!(TimedEntityTag::parse(&v.serialize()), Some(v));
        }
    }

    #[test]
    fn subsecond_precision_is_truncated() {
        let t = UNIX_EPOCH + Duration::from_millis(1_700_000_000_750);
        let v = TimedEntityTag::new(EntityTag::strong("abc"), t);
        assert_eq!(v.last_modified(), sample_time());
        let reparsed = TimedEntityTag::parse(&v.serialize()).unwrap();
        assert_eq!(reparsed, v);
    }

    #[test]
    fn parse_fails_closed() {
        assert!(TimedEntityTag::parse("").is_none());
        assert!(TimedEntityTag::parse("\"abc\"").is_none()); // one line
        assert!(
            TimedEntityTag::parse("\"abc\"\r\nnot a date").is_none()
        );
        assert!(
            TimedEntityTag::parse("abc\r\nSun, 06 Nov 1994 08:49:37 GMT").is_none()
        );
        assert!(
            TimedEntityTag::parse("\"abc\"\r\nSun, 06 Nov 1994 08:49:37 GMT\r\n").is_none()
        ); // three segments
    }
}
