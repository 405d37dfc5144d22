//! Lossy transliteration of free text into printable ASCII
//!
//! Every character outside `0x20..=0x7E` is replaced with a backslash escape
//! (`\xNN`, `\uNNNN` or `\UNNNNNNNN`, lowercase hex), so the result can be
//! written to stores that only accept a restricted character set.

use std::fmt::Write;

/// Returns true if the character is kept verbatim
pub fn is_safe_char(c: char) -> bool {
    matches!(c, ' '..='~')
}

/// Transliterate `input` into the safe character subset
pub fn sanitize_text(input: &str) -> String {
    if input.chars().all(is_safe_char) {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len() + 8);
    for c in input.chars() {
        let code = c as u32;
        if is_safe_char(c) {
            out.push(c);
        } else if code <= 0xFF {
            let _ = write!(out, "\\x{:02x}", code);
        } else if code <= 0xFFFF {
            let _ = write!(out, "\\u{:04x}", code);
        } else {
            let _ = write!(out, "\\U{:08x}", code);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_ascii_unchanged() {
        assert_eq!(sanitize_text("Bank St & Albert St"), "Bank St & Albert St");
    }

    #[test]
    fn test_latin1_escaped() {
        assert_eq!(sanitize_text("Montréal"), "Montr\\xe9al");
    }

    #[test]
    fn test_bmp_and_astral_escaped() {
        assert_eq!(sanitize_text("a\u{2013}b"), "a\\u2013b");
        assert_eq!(sanitize_text("\u{1F6A7}"), "\\U0001f6a7");
    }

    #[test]
    fn test_control_characters_escaped() {
        assert_eq!(sanitize_text("line1\nline2"), "line1\\x0aline2");
    }

    #[test]
    fn test_output_is_always_safe() {
        let out = sanitize_text("Rue Élgin — fermée 🚧\t");
        assert!(out.chars().all(is_safe_char));
    }
}
