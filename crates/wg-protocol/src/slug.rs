//! Tenant (bot) slug validation.
//!
//! Slugs identify a tenant in URLs (`/tg/{slug}/webhook`) and in object-store
//! keys, so the grammar is deliberately conservative: lowercase-or-digit
//! start, then letters/digits/`_`/`-`, 2-64 characters, case-insensitive.

/// Returns `true` if `slug` matches `^[a-z0-9][a-z0-9_-]{1,63}$` case-insensitively.
///
/// Checked byte-wise rather than via a compiled regex: the grammar is small
/// and fixed, and a hand loop avoids pulling the `regex` crate into the hot
/// path of every inbound webhook request.
pub fn is_valid_slug(slug: &str) -> bool {
    let bytes = slug.as_bytes();
    if bytes.len() < 2 || bytes.len() > 64 {
        return false;
    }
    if !is_alnum(bytes[0]) {
        return false;
    }
    bytes[1..].iter().all(|&b| is_alnum(b) || b == b'_' || b == b'-')
}

fn is_alnum(b: u8) -> bool {
    b.is_ascii_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::is_valid_slug;

    #[test]
    fn accepts_documented_valid_slugs() {
        for slug in ["bot-test", "bot_test", "bot123", "ab", &"a".repeat(64)] {
            assert!(is_valid_slug(slug), "expected {slug:?} to be valid");
        }
    }

    #[test]
    fn rejects_documented_invalid_slugs() {
        let long_65 = "a".repeat(65);
        let cases: Vec<&str> = vec![
            "",
            " ",
            "../../x",
            "bot<script>",
            "bot\ntest",
            &long_65,
            "-bot",
            "_bot",
            "bot test",
            "bot@test",
        ];
        for slug in cases {
            assert!(!is_valid_slug(slug), "expected {slug:?} to be invalid");
        }
    }

    #[test]
    fn is_case_insensitive() {
        assert!(is_valid_slug("BOT-Test"));
        assert!(is_valid_slug("ABC123"));
    }

    #[test]
    fn rejects_single_character_slugs() {
        assert!(!is_valid_slug("a"));
        assert!(!is_valid_slug("9"));
    }
}
