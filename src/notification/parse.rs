//! Recovers structured values embedded in free-text notification messages.
//!
//! Messages such as `"p@x.com wants to join"` or
//! `"Your activity [Tree Planting] starts in 15 minutes"` carry an email or an
//! activity title inline. These helpers run once, when a notification is
//! created, and the results are stored as `actor_email` / `activity_title` so
//! nothing downstream has to parse prose again.

use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}").unwrap());

static BRACKETED_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\[\]]+)\]").unwrap());

static QUOTED_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]+)""#).unwrap());

/// Placeholder used by templates when no activity title can be recovered.
pub const GENERIC_ACTIVITY: &str = "your activity";

/// First email-looking token in `message`, lowercased.
pub fn extract_email(message: &str) -> Option<String> {
    EMAIL_REGEX
        .find(message)
        .map(|m| m.as_str().trim_end_matches('.').to_ascii_lowercase())
}

/// Text between the first pair of square brackets, falling back to the first
/// double-quoted segment.
pub fn extract_delimited(message: &str) -> Option<String> {
    BRACKETED_REGEX
        .captures(message)
        .or_else(|| QUOTED_REGEX.captures(message))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// ASCII case-insensitive email equality.
pub fn same_email(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// ASCII case-insensitive substring test.
pub fn mentions_email(haystack: &str, email: &str) -> bool {
    let email = email.trim();
    if email.is_empty() {
        return false;
    }
    haystack
        .to_ascii_lowercase()
        .contains(&email.to_ascii_lowercase())
}
