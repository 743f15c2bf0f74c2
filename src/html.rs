//! HTML-to-plain-text stripping for post bodies and bios (§7).
//!
//! Content fields are HTML per the Mastodon API. We retain the original
//! HTML alongside a plain-text derivation for display and search indexing.

use once_cell::sync::Lazy;
use regex::Regex;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static BREAK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<br\s*/?>|</p>|</div>|</li>").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]*\n[ \t]*\n+").unwrap());
static TRAILING_SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
static NUMERIC_ENTITY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"&#(\d+);").unwrap());
static HEX_ENTITY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)&#x([0-9a-f]+);").unwrap());

/// Fixed named-entity table: the small, deliberately non-exhaustive set
/// that appears in federated post bodies (§7).
const NAMED_ENTITIES: &[(&str, &str)] = &[
    ("&amp;", "&"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&apos;", "'"),
    ("&nbsp;", " "),
];

/// Strip HTML markup down to plain text: `<br>`/block-closers become `\n`,
/// all other tags are removed, a fixed entity set is decoded, and
/// whitespace is collapsed. Idempotent: `strip(strip(x)) == strip(x)`.
pub fn strip(input: &str) -> String {
    let with_breaks = BREAK_RE.replace_all(input, "\n");
    let without_tags = TAG_RE.replace_all(&with_breaks, "");
    let decoded = decode_entities(&without_tags);
    collapse_whitespace(&decoded)
}

fn decode_entities(input: &str) -> String {
    let mut out = input.to_string();
    for (entity, replacement) in NAMED_ENTITIES {
        out = out.replace(entity, replacement);
    }
    out = NUMERIC_ENTITY_RE
        .replace_all(&out, |caps: &regex::Captures| {
            caps[1]
                .parse::<u32>()
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_default()
        })
        .into_owned();
    out = HEX_ENTITY_RE
        .replace_all(&out, |caps: &regex::Captures| {
            u32::from_str_radix(&caps[1], 16)
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_default()
        })
        .into_owned();
    out
}

fn collapse_whitespace(input: &str) -> String {
    let lines: Vec<String> = input
        .lines()
        .map(|line| TRAILING_SPACE_RE.replace_all(line.trim(), " ").to_string())
        .collect();
    let joined = lines.join("\n");
    WHITESPACE_RE.replace_all(joined.trim(), "\n\n").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_converts_breaks() {
        let html = "<p>Hello<br>World</p><p>Second</p>";
        assert_eq!(strip(html), "Hello\nWorld\n\nSecond");
    }

    #[test]
    fn decodes_named_entities() {
        assert_eq!(strip("Tom &amp; Jerry &lt;3&gt;"), "Tom & Jerry <3>");
    }

    #[test]
    fn decodes_numeric_and_hex_entities() {
        assert_eq!(strip("&#65;&#x42;"), "AB");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(strip("a   b\n\n\n\nc"), "a b\n\nc");
    }

    #[test]
    fn is_idempotent() {
        let html = "<div>one</div><div>two &amp; three</div>";
        let once = strip(html);
        let twice = strip(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_input_strips_to_empty() {
        assert_eq!(strip(""), "");
    }
}
