//! HTML sanitization and item identity for normalized feed content.
//!
//! Feed content is attacker-controlled HTML. Rather than pull in an HTML
//! parser, sanitization is a single-pass string scan against an explicit
//! allow-list: allowed tags are re-emitted bare (href/src/alt being the
//! only attributes that survive), everything else is dropped while keeping
//! its inner text. `<script>` and `<style>` lose their contents entirely.

use sha2::{Digest, Sha256};

use crate::util::{decode_entities, strip_control_chars, truncate_chars};

/// Summary length cap in characters, applied after entity decoding.
const SUMMARY_MAX_CHARS: usize = 300;

/// Structural and inline tags that survive sanitization.
const ALLOWED_TAGS: &[&str] = &[
    "a", "img", "p", "br", "b", "strong", "i", "em", "u", "s", "blockquote", "pre", "code", "ul",
    "ol", "li", "h1", "h2", "h3", "h4", "h5", "h6",
];

/// Sanitizes untrusted HTML against the allow-list.
///
/// - disallowed tags are removed, their text content kept
/// - `<script>`/`<style>` are removed together with their contents
/// - allowed tags keep only `href` (on `a`) and `src`/`alt` (on `img`)
/// - `javascript:`, `data:` and `vbscript:` URLs are dropped
pub fn sanitize_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(lt) = rest.find('<') {
        out.push_str(&rest[..lt]);
        let tail = &rest[lt..];
        let Some(gt) = tail.find('>') else {
            // Unterminated tag: drop the dangling markup
            rest = "";
            break;
        };
        let tag_inner = &tail[1..gt];
        rest = &tail[gt + 1..];

        let (closing, body) = match tag_inner.strip_prefix('/') {
            Some(b) => (true, b),
            None => (false, tag_inner),
        };
        let name = body
            .trim_end_matches('/')
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();

        if name == "script" || name == "style" {
            if !closing {
                rest = skip_past_closing_tag(rest, &name);
            }
            continue;
        }

        if !ALLOWED_TAGS.contains(&name.as_str()) {
            continue;
        }

        if closing {
            out.push_str("</");
            out.push_str(&name);
            out.push('>');
            continue;
        }

        match name.as_str() {
            "a" => match find_attr(body, "href").filter(|h| is_safe_link(h)) {
                Some(href) => {
                    out.push_str("<a href=\"");
                    out.push_str(&escape_attr(&href));
                    out.push_str("\">");
                }
                None => out.push_str("<a>"),
            },
            "img" => {
                out.push_str("<img");
                if let Some(src) = find_attr(body, "src").filter(|s| is_safe_link(s)) {
                    out.push_str(" src=\"");
                    out.push_str(&escape_attr(&src));
                    out.push('"');
                }
                if let Some(alt) = find_attr(body, "alt") {
                    out.push_str(" alt=\"");
                    out.push_str(&escape_attr(&alt));
                    out.push('"');
                }
                out.push_str(">");
            }
            _ => {
                out.push('<');
                out.push_str(&name);
                out.push('>');
            }
        }
    }

    out.push_str(rest);
    out
}

/// Strips all tags and decodes entities, yielding plain text with
/// whitespace runs collapsed. `<script>`/`<style>` contents are dropped.
pub fn strip_tags(input: &str) -> String {
    let mut text = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(lt) = rest.find('<') {
        text.push_str(&rest[..lt]);
        let tail = &rest[lt..];
        let Some(gt) = tail.find('>') else {
            rest = "";
            break;
        };
        let tag_inner = &tail[1..gt];
        rest = &tail[gt + 1..];

        let name = tag_inner
            .trim_start_matches('/')
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        if (name == "script" || name == "style") && !tag_inner.starts_with('/') {
            rest = skip_past_closing_tag(rest, &name);
        }
        // Block-level boundaries become whitespace so words don't merge
        text.push(' ');
    }
    text.push_str(rest);

    let decoded = decode_entities(&text);
    let cleaned = strip_control_chars(&decoded);
    collapse_whitespace(&cleaned)
}

/// Summary for an item: the feed-provided summary when present (decoded,
/// tag-stripped), else the content text. Either way capped at 300 chars
/// on a char boundary with an ellipsis.
pub fn derive_summary(provided: Option<&str>, content_text: &str) -> String {
    let text = match provided {
        Some(s) => {
            let stripped = strip_tags(s);
            if stripped.is_empty() {
                content_text.to_string()
            } else {
                stripped
            }
        }
        None => content_text.to_string(),
    };
    truncate_chars(&text, SUMMARY_MAX_CHARS).into_owned()
}

/// Deterministic item uid: first 16 hex chars of SHA-256 over
/// `feed_url :: natural_id`. Pure function of its inputs, so the same item
/// from the same feed always gets the same uid across runs.
pub fn item_uid(feed_url: &str, natural_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(feed_url.as_bytes());
    hasher.update(b"::");
    hasher.update(natural_id.as_bytes());
    let digest = hasher.finalize();
    digest
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Advances past the matching `</name>` close tag, case-insensitively.
/// An unclosed element swallows the remainder of the document.
fn skip_past_closing_tag<'a>(rest: &'a str, name: &str) -> &'a str {
    let close = format!("</{}", name);
    let lower = rest.to_ascii_lowercase();
    match lower.find(&close) {
        Some(pos) => match rest[pos..].find('>') {
            Some(end) => &rest[pos + end + 1..],
            None => "",
        },
        None => "",
    }
}

/// Extracts an attribute value from a tag body, handling quoted and bare
/// values. Attribute names match case-insensitively.
fn find_attr(tag_body: &str, name: &str) -> Option<String> {
    let lower = tag_body.to_ascii_lowercase();
    let needle = format!("{}=", name);
    let mut search = 0;

    while let Some(pos) = lower[search..].find(&needle) {
        let abs = search + pos;
        let preceded_ok = abs == 0 || lower.as_bytes()[abs - 1].is_ascii_whitespace();
        let value_start = abs + needle.len();
        if !preceded_ok {
            search = value_start;
            continue;
        }
        let rest = &tag_body[value_start..];
        let value = match rest.chars().next() {
            Some(q @ ('"' | '\'')) => rest[1..].split(q).next().unwrap_or(""),
            _ => rest
                .split(|c: char| c.is_ascii_whitespace() || c == '/')
                .next()
                .unwrap_or(""),
        };
        return Some(value.to_string());
    }
    None
}

/// Rejects script-ish URL schemes; relative, http(s) and mailto links pass.
fn is_safe_link(href: &str) -> bool {
    let compact: String = href
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    !(compact.starts_with("javascript:")
        || compact.starts_with("data:")
        || compact.starts_with("vbscript:"))
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
