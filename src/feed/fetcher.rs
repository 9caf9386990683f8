//! Feed download and normalization.
//!
//! `fetch_feed` is the only network entry point; `normalize_feed_bytes` is
//! the pure core, shared by tests and by anything that already holds a
//! document body. Content sniffing decides between the JSON Feed path and
//! `feed-rs` (RSS/Atom auto-detection).

use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;

use crate::feed::json_feed::parse_json_feed;
use crate::feed::sanitize::{derive_summary, item_uid, sanitize_html, strip_tags};
use crate::storage::NewItem;
use crate::util::{now_timestamp, strip_control_chars};

/// Response bodies larger than this are rejected mid-stream.
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

pub(crate) const MAX_ITEMS_UNLIMITED: usize = usize::MAX;

/// Errors from fetching or normalizing a feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    Http(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    TooLarge,
    /// Body could not be parsed as RSS, Atom, or JSON Feed
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Per-fetch knobs, owned by the caller so the scheduler and the CLI can
/// differ without globals.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    /// Cap on items kept per fetch. The document itself is parsed in full
    /// (bounded by the response size cap); the cap trims entries as they
    /// are converted. 0 = unlimited.
    pub max_items: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            max_items: 50,
        }
    }
}

/// A feed reduced to the engine's own vocabulary, independent of which
/// wire format it arrived in.
#[derive(Debug, Clone)]
pub struct NormalizedFeed {
    pub title: String,
    pub description: Option<String>,
    pub site_url: Option<String>,
    pub photo: Option<String>,
    pub author: Option<String>,
    /// `rss`, `atom`, or `json`
    pub feed_type: String,
    pub items: Vec<NewItem>,
}

/// Fetches a feed URL and normalizes the response.
///
/// The timeout covers both connecting and reading the body; a slow-drip
/// server cannot hold a sync slot open indefinitely.
pub async fn fetch_feed(
    client: &reqwest::Client,
    url: &str,
    options: &FetchOptions,
) -> Result<NormalizedFeed, FetchError> {
    let response = tokio::time::timeout(options.timeout, client.get(url).send())
        .await
        .map_err(|_| FetchError::Timeout)??;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Http(status.as_u16()));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();

    let body = tokio::time::timeout(options.timeout, read_limited_bytes(response))
        .await
        .map_err(|_| FetchError::Timeout)??;

    normalize_feed_bytes(&body, &content_type, url, options)
}

/// Reads a response body with the size cap enforced per chunk, so an
/// oversized body is rejected without buffering it.
async fn read_limited_bytes(response: reqwest::Response) -> Result<Vec<u8>, FetchError> {
    if let Some(len) = response.content_length() {
        if len as usize > MAX_FEED_SIZE {
            return Err(FetchError::TooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > MAX_FEED_SIZE {
            return Err(FetchError::TooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

/// Pure normalization of a feed document body.
///
/// Sniffing: a JSON content type, or a body whose first non-whitespace byte
/// is `{`, goes through the JSON Feed parser; everything else through
/// `feed-rs`.
pub fn normalize_feed_bytes(
    body: &[u8],
    content_type: &str,
    feed_url: &str,
    options: &FetchOptions,
) -> Result<NormalizedFeed, FetchError> {
    let fetched_at = now_timestamp();
    let looks_json = content_type.contains("json")
        || body
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|b| *b == b'{');

    if looks_json {
        return parse_json_feed(body, feed_url, &fetched_at, options.max_items)
            .map_err(FetchError::Parse);
    }

    let feed = feed_rs::parser::parse(body).map_err(|e| FetchError::Parse(e.to_string()))?;
    Ok(normalize_parsed_feed(feed, feed_url, &fetched_at, options))
}

fn normalize_parsed_feed(
    feed: feed_rs::model::Feed,
    feed_url: &str,
    fetched_at: &str,
    options: &FetchOptions,
) -> NormalizedFeed {
    let feed_type = match feed.feed_type {
        feed_rs::model::FeedType::Atom => "atom",
        feed_rs::model::FeedType::JSON => "json",
        _ => "rss",
    }
    .to_string();

    let site_url = feed
        .links
        .iter()
        .find(|l| l.rel.as_deref() == Some("alternate"))
        .or_else(|| feed.links.iter().find(|l| l.href != feed_url))
        .map(|l| l.href.clone());

    let photo = feed
        .logo
        .as_ref()
        .or(feed.icon.as_ref())
        .map(|img| img.uri.clone());

    let cap = if options.max_items == 0 {
        MAX_ITEMS_UNLIMITED
    } else {
        options.max_items
    };
    let items = feed
        .entries
        .into_iter()
        .take(cap)
        .map(|entry| normalize_entry(entry, feed_url, fetched_at))
        .collect();

    NormalizedFeed {
        title: feed
            .title
            .map(|t| strip_control_chars(&t.content).into_owned())
            .unwrap_or_else(|| "Untitled Feed".to_string()),
        description: feed
            .description
            .map(|d| strip_control_chars(&d.content).into_owned()),
        site_url,
        photo,
        author: feed
            .authors
            .first()
            .map(|p| strip_control_chars(&p.name).into_owned()),
        feed_type,
        items,
    }
}

fn normalize_entry(
    entry: feed_rs::model::Entry,
    feed_url: &str,
    fetched_at: &str,
) -> NewItem {
    let url = entry.links.first().map(|l| l.href.clone());
    // feed-rs synthesizes ids for some formats but can leave them empty
    let natural_id = if entry.id.is_empty() {
        url.clone().unwrap_or_default()
    } else {
        entry.id.clone()
    };

    let content_html = entry
        .content
        .and_then(|c| c.body)
        .map(|body| sanitize_html(&body))
        .unwrap_or_default();
    let summary_raw = entry.summary.map(|t| t.content);
    let content_text = if content_html.is_empty() {
        summary_raw.as_deref().map(strip_tags).unwrap_or_default()
    } else {
        strip_tags(&content_html)
    };

    let published = entry
        .published
        .map(crate::util::fmt_timestamp)
        .unwrap_or_else(|| fetched_at.to_string());
    let updated = entry
        .updated
        .map(crate::util::fmt_timestamp)
        .unwrap_or_else(|| published.clone());

    let mut photos: Vec<String> = Vec::new();
    for media in &entry.media {
        for content in &media.content {
            let is_image = content
                .content_type
                .as_ref()
                .is_none_or(|m| m.to_string().starts_with("image/"));
            if let (true, Some(u)) = (is_image, content.url.as_ref()) {
                let u = u.to_string();
                if !photos.contains(&u) {
                    photos.push(u);
                }
            }
        }
        for thumb in &media.thumbnails {
            let u = thumb.image.uri.clone();
            if !photos.contains(&u) {
                photos.push(u);
            }
        }
    }

    NewItem {
        uid: item_uid(feed_url, &natural_id),
        title: entry
            .title
            .map(|t| strip_control_chars(&t.content).into_owned())
            .unwrap_or_else(|| "Untitled".to_string()),
        summary: derive_summary(summary_raw.as_deref(), &content_text),
        content_html,
        content_text,
        url,
        published,
        updated,
        author: entry
            .authors
            .first()
            .map(|p| strip_control_chars(&p.name).into_owned()),
        photos: if photos.is_empty() { None } else { Some(photos) },
        categories: entry.categories.into_iter().map(|c| c.term).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FEED_URL: &str = "https://example.com/feed.xml";

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example Blog</title>
    <link>https://example.com</link>
    <description>Things</description>
    <item>
      <guid>post-1</guid>
      <title>First Post</title>
      <link>https://example.com/post/1</link>
      <description>Summary one</description>
      <pubDate>Wed, 01 May 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
      <guid>post-2</guid>
      <title>Second Post</title>
      <link>https://example.com/post/2</link>
    </item>
  </channel>
</rss>"#;

    fn options() -> FetchOptions {
        FetchOptions::default()
    }

    #[test]
    fn test_normalize_rss() {
        let feed =
            normalize_feed_bytes(VALID_RSS.as_bytes(), "text/xml", FEED_URL, &options()).unwrap();
        assert_eq!(feed.title, "Example Blog");
        assert_eq!(feed.feed_type, "rss");
        assert_eq!(feed.items.len(), 2);

        let first = &feed.items[0];
        assert_eq!(first.title, "First Post");
        assert_eq!(first.uid, item_uid(FEED_URL, "post-1"));
        assert_eq!(first.published, "2024-05-01T10:00:00Z");
        assert_eq!(first.summary, "Summary one");

        // Missing pubDate falls back to fetch time, which is "now"
        let second = &feed.items[1];
        assert!(second.published >= first.published);
    }

    #[test]
    fn test_sniffing_json_body_without_content_type() {
        let body = r#"  {"version": "https://jsonfeed.org/version/1.1", "title": "J", "items": []}"#;
        let feed = normalize_feed_bytes(body.as_bytes(), "", FEED_URL, &options()).unwrap();
        assert_eq!(feed.title, "J");
        assert_eq!(feed.feed_type, "json");
    }

    #[test]
    fn test_max_items_caps_rss_entries() {
        let opts = FetchOptions {
            max_items: 1,
            ..options()
        };
        let feed = normalize_feed_bytes(VALID_RSS.as_bytes(), "text/xml", FEED_URL, &opts).unwrap();
        assert_eq!(feed.items.len(), 1);
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let result = normalize_feed_bytes(b"not a feed at all", "text/plain", FEED_URL, &options());
        assert!(matches!(result, Err(FetchError::Parse(_))));
    }

    /// The same logical item must normalize identically whichever wire
    /// format carried it: same uid (same guid), same title, same published
    /// instant.
    #[test]
    fn test_json_and_xml_normalize_equivalently() {
        let json = r#"{
            "version": "https://jsonfeed.org/version/1.1",
            "title": "Example Blog",
            "items": [{
                "id": "post-1",
                "url": "https://example.com/post/1",
                "title": "First Post",
                "content_text": "Summary one",
                "date_published": "2024-05-01T10:00:00Z"
            }]
        }"#;
        let from_json =
            normalize_feed_bytes(json.as_bytes(), "application/feed+json", FEED_URL, &options())
                .unwrap();
        let from_xml =
            normalize_feed_bytes(VALID_RSS.as_bytes(), "text/xml", FEED_URL, &options()).unwrap();

        let (a, b) = (&from_json.items[0], &from_xml.items[0]);
        assert_eq!(a.uid, b.uid);
        assert_eq!(a.title, b.title);
        assert_eq!(a.published, b.published);
        assert_eq!(a.url, b.url);
    }

    #[tokio::test]
    async fn test_fetch_feed_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/rss+xml"),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/feed.xml", server.uri());
        let feed = fetch_feed(&client, &url, &options()).await.unwrap();
        assert_eq!(feed.title, "Example Blog");
        assert_eq!(feed.items.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_feed_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let result = fetch_feed(&client, &server.uri(), &options()).await;
        assert!(matches!(result, Err(FetchError::Http(404))));
    }

    #[tokio::test]
    async fn test_fetch_feed_timeout_is_distinct() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let opts = FetchOptions {
            timeout: Duration::from_millis(100),
            ..options()
        };
        let result = fetch_feed(&client, &server.uri(), &opts).await;
        assert!(matches!(result, Err(FetchError::Timeout)));
    }

    #[tokio::test]
    async fn test_fetch_feed_too_large() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; MAX_FEED_SIZE + 1]))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let result = fetch_feed(&client, &server.uri(), &options()).await;
        assert!(matches!(result, Err(FetchError::TooLarge)));
    }
}
