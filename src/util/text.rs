use std::borrow::Cow;

use chrono::{DateTime, SecondsFormat, Utc};

/// Formats a timestamp in the canonical storage format: RFC 3339 UTC with
/// second precision (`2024-01-01T12:00:00Z`).
///
/// The fixed width and fixed offset make lexicographic comparison of stored
/// timestamps equivalent to chronological comparison, so SQL range queries
/// work on the TEXT columns directly.
pub fn fmt_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Current time in the canonical storage format.
pub fn now_timestamp() -> String {
    fmt_timestamp(Utc::now())
}

/// Ellipsis appended when text is truncated
const ELLIPSIS: &str = "…";

/// Truncates a string to at most `max_chars` characters, appending an
/// ellipsis when anything was cut.
///
/// Operates on decoded text (see [`decode_entities`]) so truncation can
/// never land inside an entity reference. Cuts on a char boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    if s.chars().count() <= max_chars {
        return Cow::Borrowed(s);
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push_str(ELLIPSIS);
    Cow::Owned(out)
}

/// Decodes HTML entity references into their characters.
///
/// Handles the five XML builtins plus decimal (`&#65;`) and hexadecimal
/// (`&#x41;`) numeric references. Unrecognized references pass through
/// unchanged rather than erroring, since feed publishers get this wrong
/// constantly.
pub fn decode_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        match tail.find(';') {
            // Entity names are short; anything longer is just a stray ampersand
            Some(semi) if semi <= 10 => {
                let entity = &tail[1..semi];
                match decode_entity(entity) {
                    Some(ch) => out.push(ch),
                    None => out.push_str(&tail[..=semi]),
                }
                rest = &tail[semi + 1..];
            }
            _ => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Strips ASCII control characters (except `\n` and `\t`) from text.
///
/// Feed XML is attacker-controlled; embedded escape sequences must not
/// survive into stored titles and summaries.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s
        .chars()
        .any(|c| c.is_control() && c != '\n' && c != '\t')
    {
        return Cow::Borrowed(s);
    }
    Cow::Owned(
        s.chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
            .collect(),
    )
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let digits = entity.strip_prefix('#')?;
            let code = match digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => digits.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fmt_timestamp_canonical() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(fmt_timestamp(dt), "2024-01-02T03:04:05Z");
    }

    #[test]
    fn test_timestamps_sort_lexicographically() {
        let earlier = fmt_timestamp(Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap());
        let later = fmt_timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(earlier < later);
    }

    #[test]
    fn test_truncate_short_string_borrows() {
        let result = truncate_chars("short", 300);
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(result, "short");
    }

    #[test]
    fn test_truncate_appends_ellipsis() {
        assert_eq!(truncate_chars("hello world", 5), "hello…");
    }

    #[test]
    fn test_truncate_multibyte_boundary() {
        // Must not split a multi-byte char
        assert_eq!(truncate_chars("héllo wörld", 4), "héll…");
    }

    #[test]
    fn test_decode_builtins() {
        assert_eq!(decode_entities("a &amp; b &lt;c&gt;"), "a & b <c>");
        assert_eq!(decode_entities("&quot;hi&apos;"), "\"hi'");
    }

    #[test]
    fn test_decode_numeric() {
        assert_eq!(decode_entities("&#65;&#x42;"), "AB");
    }

    #[test]
    fn test_unknown_entity_passes_through() {
        assert_eq!(decode_entities("&bogus; &"), "&bogus; &");
    }

    #[test]
    fn test_no_entities_borrows() {
        assert!(matches!(decode_entities("plain text"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_strip_control_chars() {
        assert_eq!(strip_control_chars("Evil\x1b[31m Feed"), "Evil[31m Feed");
        assert_eq!(strip_control_chars("line\nbreak\tok"), "line\nbreak\tok");
        assert!(matches!(strip_control_chars("clean"), Cow::Borrowed(_)));
    }
}
