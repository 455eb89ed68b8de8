//! Cross-navigation clock bridge
//!
//! The unloading page writes a cookie with the current time and its own URL.
//! The next page reads it back and, if its referrer is the URL that wrote the
//! cookie, uses the stored time as `backendstarttime`: the approximate moment
//! the user left the previous page.
//!
//! Wire format: `EPISODES=s=<epochMs>&r=<escaped URL>; path=/`, where the URL is
//! escaped the way the legacy JavaScript `escape()` function does it.

use tracing::{debug, trace};

/// Default name of the navigation cookie
pub const COOKIE_NAME: &str = "EPISODES";

/// Timing payload carried from one page load to the next
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationCookie {
    pub start_ms: i64,
    /// Unescaped URL of the page that wrote the cookie
    pub origin_url: String,
}

impl NavigationCookie {
    pub fn new(start_ms: i64, origin_url: impl Into<String>) -> Self {
        Self {
            start_ms,
            origin_url: origin_url.into(),
        }
    }

    /// Cookie value without the name, e.g. `s=1700000000000&r=http%3A//a/`
    pub fn value(&self) -> String {
        format!("s={}&r={}", self.start_ms, js_escape(&self.origin_url))
    }

    /// Full `Set-Cookie`-style assignment for `document.cookie`
    pub fn to_header(&self, cookie_name: &str, path: &str) -> String {
        format!("{}={}; path={}", cookie_name, self.value(), path)
    }
}

/// Find the navigation start time for a page reached from `referrer`.
///
/// Scans every space-separated token of the raw cookie header for
/// `<cookie_name>=`, and returns the `s=` time of the first one whose `r=`
/// field equals the escaped referrer. Missing, malformed or mismatched
/// payloads yield `None`.
pub fn find_start_time(cookie_header: &str, cookie_name: &str, referrer: &str) -> Option<i64> {
    let prefix = format!("{}=", cookie_name);
    let escaped_referrer = js_escape(referrer);

    for token in cookie_header.split(' ') {
        let Some(payload) = token.trim_end_matches(';').strip_prefix(prefix.as_str()) else {
            continue;
        };
        trace!(payload, "navigation cookie candidate");

        let mut start = None;
        let mut referrer_match = false;
        for field in payload.split('&') {
            if let Some(value) = field.strip_prefix("s=") {
                start = parse_start(value);
            } else if let Some(value) = field.strip_prefix("r=") {
                referrer_match = value == escaped_referrer;
            }
        }

        match (start, referrer_match) {
            (Some(start), true) => {
                debug!(start, "navigation cookie matched referrer");
                return Some(start);
            }
            (None, true) => debug!(payload, "navigation cookie has no valid start time"),
            _ => trace!("navigation cookie written by another page"),
        }
    }

    None
}

fn parse_start(value: &str) -> Option<i64> {
    value
        .parse::<i64>()
        .ok()
        .filter(|start| start.to_string() == value)
}

/// Escape a string the way JavaScript's global `escape()` does.
///
/// ASCII letters, digits and `@*_+-./` pass through. Other UTF-16 code units
/// below 256 become `%XX`, the rest `%uXXXX` (upper-case hex).
pub fn js_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for unit in input.encode_utf16() {
        match u8::try_from(unit) {
            Ok(byte) if byte.is_ascii_alphanumeric() || b"@*_+-./".contains(&byte) => {
                out.push(char::from(byte));
            }
            Ok(byte) => out.push_str(&format!("%{:02X}", byte)),
            Err(_) => out.push_str(&format!("%u{:04X}", unit)),
        }
    }
    out
}
