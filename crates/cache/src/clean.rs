//! Body cleaning pipeline applied before an entity enters the cache (§4.4).

use sha2::{Digest, Sha256};

use ov_domain::cache::{CLEAN_BODY_CAP_BYTES, TRUNCATION_MARKER};

const FOOTER_PATTERNS: &[&str] = &[
    "sent from my iphone",
    "sent from my android",
    "unsubscribe",
    "this email was sent to",
    "view this email in your browser",
];

/// Strip HTML tags, decode common entities, collapse whitespace, strip
/// footer boilerplate, then cap to [`CLEAN_BODY_CAP_BYTES`] with a
/// truncation marker.
pub fn clean_body(raw: &str) -> String {
    let no_tags = strip_html_tags(raw);
    let decoded = decode_entities(&no_tags);
    let no_footer = strip_footers(&decoded);
    let collapsed = collapse_whitespace(&no_footer);
    cap_text(&collapsed, CLEAN_BODY_CAP_BYTES)
}

fn strip_html_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn decode_entities(input: &str) -> String {
    input
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
}

fn strip_footers(input: &str) -> String {
    let lower = input.to_lowercase();
    for pattern in FOOTER_PATTERNS {
        if let Some(idx) = lower.find(pattern) {
            // Cut from the start of the footer line, not mid-sentence.
            let cut_at = input[..idx].rfind('\n').map(|n| n + 1).unwrap_or(0);
            return input[..cut_at].to_string();
        }
    }
    // Signature separator convention (RFC 3676 "-- \n").
    if let Some(idx) = input.find("\n-- \n") {
        return input[..idx].to_string();
    }
    input.to_string()
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Unicode-safe truncation to `max` bytes with a trailing marker.
fn cap_text(input: &str, max: usize) -> String {
    if input.len() <= max {
        return input.to_string();
    }
    let mut end = max;
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &input[..end], TRUNCATION_MARKER)
}

pub fn content_hash(cleaned: &str) -> String {
    let digest = Sha256::digest(cleaned.as_bytes());
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_decodes_entities() {
        let raw = "<p>Hi &amp; welcome &lt;3</p>";
        let cleaned = clean_body(raw);
        assert_eq!(cleaned, "Hi & welcome <3");
    }

    #[test]
    fn removes_signature_footer() {
        let raw = "Got it, thanks!\n-- \nSent from my iPhone";
        let cleaned = clean_body(raw);
        assert_eq!(cleaned, "Got it, thanks!");
    }

    #[test]
    fn removes_unsubscribe_footer_case_insensitive() {
        let raw = "Your invoice is attached.\nUnsubscribe from these emails here.";
        let cleaned = clean_body(raw);
        assert_eq!(cleaned, "Your invoice is attached.");
    }

    #[test]
    fn caps_body_to_limit_with_marker() {
        let raw = "x".repeat(CLEAN_BODY_CAP_BYTES + 500);
        let cleaned = clean_body(&raw);
        assert!(cleaned.len() <= CLEAN_BODY_CAP_BYTES + TRUNCATION_MARKER.len());
        assert!(cleaned.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn collapses_internal_whitespace() {
        let raw = "line one\n\n\n   line two";
        assert_eq!(clean_body(raw), "line one line two");
    }

    #[test]
    fn hash_is_stable_for_identical_content() {
        assert_eq!(content_hash("same text"), content_hash("same text"));
        assert_ne!(content_hash("same text"), content_hash("different text"));
    }
}
