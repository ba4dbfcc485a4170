//! Best-effort extraction of candidate source from generator output.
//!
//! Extraction never fails. Anything it gets wrong is caught later by the
//! validator's syntax and entry-point checks.

use std::sync::LazyLock;

use regex::Regex;

// A known Python tag may be followed directly by code on the same line.
static TAGGED_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:python3?|py)\b[ \t]*(?:\r?\n)?(.*?)```").expect("tagged fence regex")
});

static GENERIC_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(.*?)```").expect("generic fence regex"));

// Any other tag only counts as one when it is alone on the fence line.
static LANGUAGE_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?i:python3?|py)\b[ \t]*(?:\r?\n)?|[A-Za-z][A-Za-z0-9_+#.-]*[ \t]*\r?\n)")
        .expect("tag regex")
});

/// Normalize raw generator text into candidate source.
///
/// Preference order: the first fence tagged as Python, then the first fence of
/// any kind with its language tag removed, then the whole text. The result is
/// always trimmed.
pub fn extract_code(raw: &str) -> String {
    if let Some(caps) = TAGGED_FENCE_RE.captures(raw) {
        return caps[1].trim().to_string();
    }
    if let Some(caps) = GENERIC_FENCE_RE.captures(raw) {
        let body = &caps[1];
        let body = match LANGUAGE_TAG_RE.find(body) {
            Some(tag) => &body[tag.end()..],
            None => body,
        };
        return body.trim().to_string();
    }
    raw.trim().to_string()
}
