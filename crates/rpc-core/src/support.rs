//! Small shared helpers that don't deserve their own module.

use std::future::Future;
use std::pin::Pin;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// A boxed, owned future. Used everywhere a trait needs to return
/// `async fn` results without `async fn` in traits (stable-friendly).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Unreserved path-segment characters (RFC 3986) left unescaped; everything
/// else in a topic/room name gets percent-encoded.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encodes topic/room names for use as a URL path segment.
pub fn percent_encode_segment(raw: &str) -> String {
    utf8_percent_encode(raw, PATH_SEGMENT).to_string()
}

fn percent_decode(raw: &str) -> String {
    // Query strings use `+` for space (application/x-www-form-urlencoded);
    // plain percent-decoding doesn't, so it's normalized first.
    let with_spaces = raw.replace('+', " ");
    percent_decode_str(&with_spaces).decode_utf8_lossy().into_owned()
}

/// Parses an `a=1&b=2` query string into plain-string key/value pairs. No
/// distinction is made between a missing value and an empty one.
pub fn parse_query_string(raw: &str) -> std::collections::HashMap<String, String> {
    let mut out = std::collections::HashMap::new();
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or_default();
        let value = parts.next().unwrap_or_default();
        out.insert(percent_decode(key), percent_decode(value));
    }
    out
}
