//! String helpers
//!
//! Strings are stored as UTF-8. Script-visible positions count characters,
//! not bytes.

/// Number of characters in `s`
#[inline]
pub fn char_count(s: &str) -> usize {
    s.chars().count()
}

/// The character at character position `index`, as a one-character string
pub fn char_at(s: &str, index: usize) -> Option<String> {
    s.chars().nth(index).map(String::from)
}

/// Resolve a possibly negative relative position against `len`, clamped to
/// `0..=len`.
pub fn relative_index(position: f64, len: usize) -> usize {
    if position.is_nan() {
        return 0;
    }
    let position = position.trunc();
    if position < 0.0 {
        (len as f64 + position).max(0.0) as usize
    } else {
        position.min(len as f64) as usize
    }
}

/// Substring by character positions `start..end`
pub fn slice_chars(s: &str, start: usize, end: usize) -> String {
    if end <= start {
        return String::new();
    }
    s.chars().skip(start).take(end - start).collect()
}

/// Character position of the first occurrence of `needle`
pub fn index_of(s: &str, needle: &str) -> Option<usize> {
    s.find(needle).map(|byte| char_position(s, byte))
}

/// Character position of the last occurrence of `needle`
pub fn last_index_of(s: &str, needle: &str) -> Option<usize> {
    s.rfind(needle).map(|byte| char_position(s, byte))
}

/// Character position of byte offset `byte`
#[inline]
pub fn char_position(s: &str, byte: usize) -> usize {
    s[..byte].chars().count()
}

/// Byte offset of character position `index`; the length when past the end
pub fn byte_offset(s: &str, index: usize) -> usize {
    s.char_indices().nth(index).map_or(s.len(), |(byte, _)| byte)
}
