//! Name sanitization shared by sub-domains, keys and suffixes.
//!
//! A sanitized name is safe as a single path component and doubles as the
//! lookup identity: two names that sanitize identically address the same
//! sub-domain or item.

/// Lower-case `name`, turn whitespace, `-` and `_` into `_`, and drop every
/// other character that is not alphanumeric.
///
/// ```
/// use stowage::sanitize;
///
/// assert_eq!(sanitize("My Key"), "my_key");
/// assert_eq!(sanitize("MY-KEY"), "my_key");
/// assert_eq!(sanitize("user's photo!"), "users_photo");
/// ```
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_whitespace() || ch == '-' || ch == '_' {
            out.push('_');
        } else {
            // Some upper-case letters lower-case into combining marks; keep
            // only what survives a second pass.
            out.extend(ch.to_lowercase().filter(|c| c.is_alphanumeric()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_and_separator_insensitive() {
        assert_eq!(sanitize("My Key"), sanitize("my_key"));
        assert_eq!(sanitize("my_key"), sanitize("MY-KEY"));
        assert_eq!(sanitize("My Key"), "my_key");
    }

    #[test]
    fn test_strips_punctuation() {
        assert_eq!(sanitize("photos/2024.final"), "photos2024final");
        assert_eq!(sanitize("a,b;c:d"), "abcd");
        assert_eq!(sanitize("..\\..\\etc"), "etc");
    }

    #[test]
    fn test_idempotent() {
        for name in ["My Key", "MY-KEY", "  tabs\tand\nnewlines ", "İstanbul", "ÀÉÎ", ""] {
            let once = sanitize(name);
            assert_eq!(sanitize(&once), once, "not idempotent for {name:?}");
        }
    }

    #[test]
    fn test_keeps_unicode_letters_and_digits() {
        assert_eq!(sanitize("Café 42"), "café_42");
    }

    #[test]
    fn test_empty_when_nothing_survives() {
        assert_eq!(sanitize("!!!"), "");
        assert_eq!(sanitize(""), "");
    }
}
