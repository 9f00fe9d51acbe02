//! Helpers for emitting Python source.

use std::fmt::Write;

/// Quote `text` as a single-quoted Python string literal.
///
/// Backslashes, quotes, and control characters are escaped so the literal
/// evaluates to exactly `text`. Non-ASCII characters are kept as-is since
/// Python source is UTF-8.
pub fn python_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c == '\u{7f}' => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Whether `name` is a plain ASCII Python identifier.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Prefix every line of `body` with `prefix`.
///
/// A blank body becomes `pass` so the result is always a valid suite.
pub fn indent(body: &str, prefix: &str) -> String {
    if body.trim().is_empty() {
        return format!("{prefix}pass");
    }
    body.split('\n')
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
