//! JSON Feed (1.x) parsing into the normalized feed shape.
//!
//! Deliberately lenient: `feed-rs` handles RSS/Atom, this module covers the
//! JSON side with plain serde structs. Unknown fields are ignored, missing
//! fields fall back the same way the XML path does.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::feed::fetcher::{NormalizedFeed, MAX_ITEMS_UNLIMITED};
use crate::feed::sanitize::{derive_summary, item_uid, sanitize_html, strip_tags};
use crate::storage::NewItem;
use crate::util::{fmt_timestamp, strip_control_chars};

#[derive(Debug, Deserialize)]
struct JsonFeedDoc {
    title: Option<String>,
    home_page_url: Option<String>,
    description: Option<String>,
    icon: Option<String>,
    favicon: Option<String>,
    authors: Option<Vec<JsonFeedAuthor>>,
    author: Option<JsonFeedAuthor>,
    #[serde(default)]
    items: Vec<JsonFeedItem>,
}

#[derive(Debug, Deserialize)]
struct JsonFeedAuthor {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonFeedItem {
    // Officially a string; numeric ids appear in the wild
    id: Option<serde_json::Value>,
    url: Option<String>,
    external_url: Option<String>,
    title: Option<String>,
    content_html: Option<String>,
    content_text: Option<String>,
    summary: Option<String>,
    image: Option<String>,
    banner_image: Option<String>,
    date_published: Option<String>,
    date_modified: Option<String>,
    authors: Option<Vec<JsonFeedAuthor>>,
    author: Option<JsonFeedAuthor>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    attachments: Vec<JsonFeedAttachment>,
}

#[derive(Debug, Deserialize)]
struct JsonFeedAttachment {
    url: Option<String>,
    mime_type: Option<String>,
}

/// Parses a JSON Feed document body into a [`NormalizedFeed`].
///
/// `fetched_at` is the canonical timestamp used when an item carries no
/// publication date. `max_items` (0 = unlimited) trims the item list as
/// entries are converted; the document itself is deserialized in full,
/// bounded upstream by the response size cap.
pub(crate) fn parse_json_feed(
    body: &[u8],
    feed_url: &str,
    fetched_at: &str,
    max_items: usize,
) -> Result<NormalizedFeed, String> {
    let doc: JsonFeedDoc = serde_json::from_slice(body).map_err(|e| e.to_string())?;

    let cap = if max_items == 0 {
        MAX_ITEMS_UNLIMITED
    } else {
        max_items
    };
    let items = doc
        .items
        .into_iter()
        .take(cap)
        .map(|item| normalize_item(item, feed_url, fetched_at))
        .collect();

    Ok(NormalizedFeed {
        title: doc
            .title
            .map(|t| strip_control_chars(&t).into_owned())
            .unwrap_or_else(|| "Untitled Feed".to_string()),
        description: doc
            .description
            .map(|d| strip_control_chars(&d).into_owned()),
        site_url: doc.home_page_url,
        photo: doc.icon.or(doc.favicon),
        author: first_author(doc.authors, doc.author),
        feed_type: "json".to_string(),
        items,
    })
}

fn normalize_item(item: JsonFeedItem, feed_url: &str, fetched_at: &str) -> NewItem {
    let url = item.url.or(item.external_url);
    let natural_id = match &item.id {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => url.clone().unwrap_or_default(),
    };

    let content_html = item
        .content_html
        .as_deref()
        .map(sanitize_html)
        .unwrap_or_default();
    let content_text = match item.content_text {
        Some(text) => strip_control_chars(&text).into_owned(),
        None => strip_tags(&content_html),
    };

    let published = item
        .date_published
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or_else(|| fetched_at.to_string());
    let updated = item
        .date_modified
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or_else(|| published.clone());

    let mut photos: Vec<String> = Vec::new();
    for candidate in [item.image, item.banner_image] {
        if let Some(url) = candidate {
            photos.push(url);
        }
    }
    for attachment in item.attachments {
        let is_image = attachment
            .mime_type
            .as_deref()
            .is_some_and(|m| m.starts_with("image/"));
        if let (true, Some(url)) = (is_image, attachment.url) {
            if !photos.contains(&url) {
                photos.push(url);
            }
        }
    }

    NewItem {
        uid: item_uid(feed_url, &natural_id),
        title: item
            .title
            .map(|t| strip_control_chars(&t).into_owned())
            .unwrap_or_else(|| "Untitled".to_string()),
        summary: derive_summary(item.summary.as_deref(), &content_text),
        content_html,
        content_text,
        url,
        published,
        updated,
        author: first_author(item.authors, item.author),
        photos: if photos.is_empty() { None } else { Some(photos) },
        categories: item.tags,
    }
}

fn first_author(
    authors: Option<Vec<JsonFeedAuthor>>,
    author: Option<JsonFeedAuthor>,
) -> Option<String> {
    authors
        .into_iter()
        .flatten()
        .chain(author)
        .find_map(|a| a.name)
        .map(|n| strip_control_chars(&n).into_owned())
}

/// Parses an RFC 3339 timestamp into the canonical storage format,
/// normalizing any offset to UTC. Unparseable dates are treated as absent.
fn parse_timestamp(raw: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| fmt_timestamp(dt.with_timezone(&Utc)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED_URL: &str = "https://example.com/feed.json";
    const NOW: &str = "2024-06-01T00:00:00Z";

    const VALID_JSON_FEED: &str = r#"{
        "version": "https://jsonfeed.org/version/1.1",
        "title": "Example Blog",
        "home_page_url": "https://example.com",
        "description": "Things",
        "icon": "https://example.com/icon.png",
        "items": [
            {
                "id": "post-1",
                "url": "https://example.com/post/1",
                "title": "First Post",
                "content_html": "<p>Hello <script>x</script><b>world</b></p>",
                "date_published": "2024-05-01T12:00:00+02:00",
                "tags": ["intro"]
            },
            {
                "id": 42,
                "content_text": "plain body",
                "attachments": [
                    {"url": "https://example.com/a.png", "mime_type": "image/png"},
                    {"url": "https://example.com/a.mp3", "mime_type": "audio/mpeg"}
                ]
            }
        ]
    }"#;

    #[test]
    fn test_parse_valid_feed() {
        let feed = parse_json_feed(VALID_JSON_FEED.as_bytes(), FEED_URL, NOW, 0).unwrap();
        assert_eq!(feed.title, "Example Blog");
        assert_eq!(feed.site_url.as_deref(), Some("https://example.com"));
        assert_eq!(feed.photo.as_deref(), Some("https://example.com/icon.png"));
        assert_eq!(feed.feed_type, "json");
        assert_eq!(feed.items.len(), 2);

        let first = &feed.items[0];
        assert_eq!(first.title, "First Post");
        // Offset normalized to UTC
        assert_eq!(first.published, "2024-05-01T10:00:00Z");
        assert_eq!(first.updated, first.published);
        assert_eq!(first.content_html, "<p>Hello <b>world</b></p>");
        assert_eq!(first.content_text, "Hello world");
        assert_eq!(first.categories, vec!["intro".to_string()]);
        assert_eq!(first.uid, item_uid(FEED_URL, "post-1"));
    }

    #[test]
    fn test_numeric_id_and_image_attachments() {
        let feed = parse_json_feed(VALID_JSON_FEED.as_bytes(), FEED_URL, NOW, 0).unwrap();
        let second = &feed.items[1];
        assert_eq!(second.uid, item_uid(FEED_URL, "42"));
        // Missing date falls back to fetch time
        assert_eq!(second.published, NOW);
        // Only the image-typed attachment survives
        assert_eq!(
            second.photos.as_deref(),
            Some(&["https://example.com/a.png".to_string()][..])
        );
    }

    #[test]
    fn test_max_items_caps_items() {
        let feed = parse_json_feed(VALID_JSON_FEED.as_bytes(), FEED_URL, NOW, 1).unwrap();
        assert_eq!(feed.items.len(), 1);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(parse_json_feed(b"{not json", FEED_URL, NOW, 0).is_err());
    }

    #[test]
    fn test_missing_id_falls_back_to_url() {
        let body = r#"{"title": "t", "items": [{"url": "https://example.com/x"}]}"#;
        let feed = parse_json_feed(body.as_bytes(), FEED_URL, NOW, 0).unwrap();
        assert_eq!(feed.items[0].uid, item_uid(FEED_URL, "https://example.com/x"));
    }
}
