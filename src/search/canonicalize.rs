//! Message body cleanup.
//!
//! Produces the "cleaned" body that is indexed and returned as the result
//! snippet. Cleanup is deterministic: the same raw body always produces the
//! same cleaned text, which keeps index rebuilds byte-identical.
//!
//! # Processing Pipeline
//!
//! 1. **Unicode NFC normalization** - "café" (decomposed) → "café" (composed)
//! 2. **HTML stripping** - drop `<script>`/`<style>`, turn block tags into
//!    line breaks, remove remaining tags, decode common entities
//! 3. **Reply trimming** - cut at the first quoted-history marker
//!    ("On … wrote:", "-----Original Message-----") and drop `>` lines
//! 4. **Signature trimming** - cut at the RFC 3676 `-- ` delimiter
//! 5. **Whitespace normalization** - collapse runs, trim

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static SCRIPT_STYLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").expect("valid regex")
});

static BLOCK_BREAK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<\s*(br|/p|/div|/li|/tr|/h[1-6])\b[^>]*>").expect("valid regex")
});

static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));

static HTML_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<\s*/?\s*(html|body|head|p|div|br|span|table|td|b|i|a|font|style|script)\b")
        .expect("valid regex")
});

static REPLY_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^On\b.{0,200}\bwrote:\s*$").expect("valid regex"));

const ORIGINAL_MESSAGE_MARKER: &str = "-----Original Message-----";

const SIGNATURE_DELIMITER: &str = "-- ";

/// Clean a raw message body for indexing and display.
pub fn clean_body(raw: &str) -> String {
    let normalized: String = raw.nfc().collect();

    let text = if looks_like_html(&normalized) {
        strip_html(&normalized)
    } else {
        normalized
    };

    let trimmed = strip_quoted_history(&text);

    normalize_whitespace(&trimmed)
}

/// Bare `<addr@host>` brackets in plain text must not trigger tag stripping.
fn looks_like_html(text: &str) -> bool {
    HTML_MARKER.is_match(text)
}

fn strip_html(text: &str) -> String {
    let without_scripts = SCRIPT_STYLE.replace_all(text, " ");
    let with_breaks = BLOCK_BREAK.replace_all(&without_scripts, "\n");
    let without_tags = ANY_TAG.replace_all(&with_breaks, " ");
    decode_entities(&without_tags)
}

/// Decode the handful of entities that show up in mail bodies.
fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Drop everything from the first reply/forward marker or signature on,
/// and any `>`-quoted line before it.
fn strip_quoted_history(text: &str) -> String {
    let mut kept = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if line == SIGNATURE_DELIMITER
            || trimmed == ORIGINAL_MESSAGE_MARKER
            || REPLY_HEADER.is_match(trimmed)
        {
            break;
        }
        if trimmed.starts_with('>') {
            continue;
        }
        kept.push(line);
    }

    kept.join("\n")
}

/// Normalize whitespace: collapse runs, trim.
fn normalize_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut prev_whitespace = true;

    for c in text.chars() {
        if c.is_whitespace() {
            if !prev_whitespace {
                result.push(' ');
                prev_whitespace = true;
            }
        } else {
            result.push(c);
            prev_whitespace = false;
        }
    }

    result.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unicode_nfc_normalization() {
        let composed = "caf\u{00E9}";
        let decomposed = "cafe\u{0301}";
        assert_ne!(composed, decomposed);
        assert_eq!(clean_body(composed), clean_body(decomposed));
    }

    #[test]
    fn test_plain_text_is_whitespace_collapsed() {
        assert_eq!(
            clean_body("  Hello   World,\n\nthis is a test.  "),
            "Hello World, this is a test."
        );
    }

    #[test]
    fn test_html_tags_removed() {
        let html = "<html><body><p>Hello <b>World</b></p><div>Second&nbsp;line &amp; more</div></body></html>";
        assert_eq!(clean_body(html), "Hello World Second line & more");
    }

    #[test]
    fn test_script_and_style_dropped() {
        let html = "<style>p { color: red }</style><p>Visible</p><script>alert('x')</script>";
        assert_eq!(clean_body(html), "Visible");
    }

    #[test]
    fn test_reply_history_cut() {
        let body = "Sounds good.\n\nOn Mon, Jan 6, 2025 at 9:00 AM Ann <ann@example.com> wrote:\n> Shall we meet?\n> Thanks";
        assert_eq!(clean_body(body), "Sounds good.");
    }

    #[test]
    fn test_outlook_original_message_cut() {
        let body = "Approved.\n-----Original Message-----\nFrom: Bob\nPlease approve";
        assert_eq!(clean_body(body), "Approved.");
    }

    #[test]
    fn test_inline_quotes_dropped() {
        let body = "> earlier point\nMy answer\n> another quote\nMore";
        assert_eq!(clean_body(body), "My answer More");
    }

    #[test]
    fn test_signature_cut() {
        let body = "See attached.\n-- \nAnn Lee\nHead of Ops";
        assert_eq!(clean_body(body), "See attached.");
    }

    #[test]
    fn test_clean_body_deterministic() {
        let body = "<p>Same <i>input</i></p>\nOn Tue Bob wrote:\n> old";
        assert_eq!(clean_body(body), clean_body(body));
    }

    #[test]
    fn test_angle_bracket_addresses_survive_in_plain_text() {
        assert_eq!(
            clean_body("Forwarding from <ann@example.com> as asked"),
            "Forwarding from <ann@example.com> as asked"
        );
    }

    #[test]
    fn test_empty_body() {
        assert_eq!(clean_body(""), "");
    }
}
