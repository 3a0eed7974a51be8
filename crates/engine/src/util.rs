//! Small shared helpers.

/// Truncate `s` to at most `max` bytes without splitting a multi-byte
/// UTF-8 codepoint. Grounded in `crates/gateway/src/runtime/mod.rs`'s
/// `truncate_str`.
pub fn truncate_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
