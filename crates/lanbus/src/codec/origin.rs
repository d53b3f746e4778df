//! # Origin Tag
//!
//! Plaintext prefix identifying the emitting process, used for
//! self-exclusion in foreign-only mode: ASCII `'@'`, the decimal digits of
//! the sender's process id, `':'`, then the (possibly encrypted) frame.
//!
//! Known limitation, carried forward deliberately: the sentinel byte is not
//! escaped, so an *untagged* payload that legitimately starts with `@`,
//! one to ten digits and `:` parses as a tag and loses that prefix. The
//! encoded frame format makes this shape unlikely but not impossible.

/// Leading sentinel byte of an origin tag.
pub const SENTINEL: u8 = b'@';

/// Separator closing the origin tag.
pub const SEPARATOR: u8 = b':';

/// Longest digit run accepted in a tag (u32 process ids).
const MAX_DIGITS: usize = 10;

/// Prepend the origin tag for `origin_id` to `payload`.
pub fn tag(origin_id: u32, payload: &[u8]) -> Vec<u8> {
    let prefix = format!("@{origin_id}:");
    let mut out = Vec::with_capacity(prefix.len() + payload.len());
    out.extend_from_slice(prefix.as_bytes());
    out.extend_from_slice(payload);
    out
}

/// Strip and interpret an origin tag, if one is present.
///
/// Returns the tagged origin id and the remainder, or `(None, bytes)`
/// unchanged when no well-formed tag leads the buffer.
pub fn untag(bytes: &[u8]) -> (Option<u32>, &[u8]) {
    if bytes.first() != Some(&SENTINEL) {
        return (None, bytes);
    }

    let digits_end = bytes[1..]
        .iter()
        .take(MAX_DIGITS + 1)
        .position(|b| !b.is_ascii_digit())
        .map(|i| i + 1);

    match digits_end {
        // At least one digit, closed by the separator: a well-formed tag.
        Some(end) if end > 1 && bytes.get(end) == Some(&SEPARATOR) => {
            match std::str::from_utf8(&bytes[1..end])
                .ok()
                .and_then(|s| s.parse::<u32>().ok())
            {
                Some(id) => (Some(id), &bytes[end + 1..]),
                None => (None, bytes),
            }
        }
        _ => (None, bytes),
    }
}
