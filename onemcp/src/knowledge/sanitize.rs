//! Graph identifier sanitization.
//!
//! The store accepts ASCII alphanumerics, `_`, and `-`; identifiers must not
//! begin with a digit and are bounded to 128 bytes. `sanitize` is idempotent:
//! `sanitize(sanitize(x)) == sanitize(x)`.

pub const MAX_KEY_LEN: usize = 128;

/// Maps arbitrary input onto the store's identifier rules.
pub fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_KEY_LEN));
    for c in input.chars() {
        if out.len() >= MAX_KEY_LEN {
            break;
        }
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        return "k".to_string();
    }
    if out.as_bytes()[0].is_ascii_digit() {
        out.insert_str(0, "k_");
        out.truncate(MAX_KEY_LEN);
    }
    out
}

/// True when `input` already satisfies the identifier rules.
pub fn is_sanitized(input: &str) -> bool {
    !input.is_empty()
        && input.len() <= MAX_KEY_LEN
        && !input.as_bytes()[0].is_ascii_digit()
        && input
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
