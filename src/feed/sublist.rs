//! Subscription-list documents: OPML-shaped XML listing feed subscriptions,
//! with one level of category folders.
//!
//! Parsed with the `quick-xml` event reader. XXE is structurally mitigated:
//! quick-xml never parses `<!ENTITY>` declarations, and attribute decoding
//! through `decode_and_unescape_value` resolves only the five XML builtins.

use anyhow::{Context, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::time::Duration;
use thiserror::Error;

use crate::feed::fetcher::FetchError;
use crate::util::validate_url;

/// Nesting depth cap; deeper documents are rejected outright.
const MAX_SUBLIST_DEPTH: usize = 50;

/// Size cap for fetched subscription-list documents.
const MAX_SUBLIST_SIZE: usize = 5 * 1024 * 1024; // 5MB

#[derive(Debug, Error)]
pub enum SublistError {
    #[error("Subscription list nesting exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// One subscription extracted from a list document. `category` is the text
/// of the enclosing top-level folder, empty for top-level leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateBlog {
    pub title: String,
    pub feed_url: String,
    pub site_url: Option<String>,
    pub feed_type: String,
    pub category: String,
}

/// Parses a subscription-list document into candidate blogs.
///
/// Folder semantics are flat on purpose: only the top-level folder names
/// become categories; deeper nesting is traversed but contributes no
/// further labels. Entries with invalid feed URLs (bad scheme, localhost,
/// private ranges) are skipped with a warning, never an error.
pub fn parse_subscription_list(document: &str) -> Result<Vec<CandidateBlog>, SublistError> {
    let mut reader = Reader::from_reader(document.as_bytes());
    reader.config_mut().trim_text(true);

    let mut candidates = Vec::new();
    let mut buf = Vec::new();
    let mut depth: usize = 0;
    // Text of the current depth-1 folder, if we are inside one
    let mut current_folder: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                depth += 1;
                if depth > MAX_SUBLIST_DEPTH {
                    return Err(SublistError::MaxDepthExceeded(MAX_SUBLIST_DEPTH));
                }

                let outline = parse_outline_attributes(&e, &reader)?;
                if outline.feed_url.is_some() {
                    if let Some(candidate) = outline.into_candidate(current_folder.as_deref()) {
                        candidates.push(candidate);
                    }
                } else if depth == 1 {
                    current_folder = outline.text;
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                let outline = parse_outline_attributes(&e, &reader)?;
                if outline.feed_url.is_some() {
                    let folder = if depth >= 1 {
                        current_folder.as_deref()
                    } else {
                        None
                    };
                    if let Some(candidate) = outline.into_candidate(folder) {
                        candidates.push(candidate);
                    }
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    current_folder = None;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SublistError::XmlParse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(candidates)
}

/// Fetches a subscription-list document over HTTP, then parses it.
pub async fn fetch_subscription_list(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<Vec<CandidateBlog>, SublistError> {
    let response = tokio::time::timeout(timeout, client.get(url).send())
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(FetchError::from)?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Http(status.as_u16()).into());
    }

    let body = tokio::time::timeout(timeout, read_sublist_bytes(response))
        .await
        .map_err(|_| FetchError::Timeout)??;

    parse_subscription_list(&String::from_utf8_lossy(&body))
}

async fn read_sublist_bytes(response: reqwest::Response) -> Result<Vec<u8>, FetchError> {
    use futures::StreamExt;

    if let Some(len) = response.content_length() {
        if len as usize > MAX_SUBLIST_SIZE {
            return Err(FetchError::TooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > MAX_SUBLIST_SIZE {
            return Err(FetchError::TooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

struct ParsedOutline {
    text: Option<String>,
    feed_url: Option<String>,
    site_url: Option<String>,
    feed_type: Option<String>,
}

impl ParsedOutline {
    /// `None` when the feed URL fails validation; the entry is logged and
    /// dropped rather than failing the whole document.
    fn into_candidate(self, folder: Option<&str>) -> Option<CandidateBlog> {
        let feed_url = self.feed_url?;
        if let Err(e) = validate_url(&feed_url) {
            tracing::warn!(url = %feed_url, error = %e, "Skipping invalid feed URL in subscription list");
            return None;
        }
        Some(CandidateBlog {
            title: self.text.unwrap_or_else(|| feed_url.clone()),
            feed_url,
            site_url: self.site_url,
            feed_type: self.feed_type.unwrap_or_else(|| "rss".to_string()),
            category: folder.unwrap_or("").to_string(),
        })
    }
}

fn parse_outline_attributes(
    e: &quick_xml::events::BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<ParsedOutline, SublistError> {
    let mut outline = ParsedOutline {
        text: None,
        feed_url: None,
        site_url: None,
        feed_type: None,
    };
    let mut title = None;

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed subscription-list attribute");
                continue;
            }
        };
        let decoder = reader.decoder();
        let value = attr
            .decode_and_unescape_value(decoder)
            .map_err(|e| SublistError::XmlParse(e.to_string()))?;
        match attr.key.as_ref() {
            b"xmlUrl" => outline.feed_url = Some(value.to_string()),
            b"htmlUrl" => match validate_url(&value) {
                Ok(_) => outline.site_url = Some(value.to_string()),
                Err(e) => {
                    tracing::warn!(url = %value, error = %e, "Ignoring invalid htmlUrl in subscription list");
                }
            },
            b"title" => title = Some(value.to_string()),
            b"text" => outline.text = Some(value.to_string()),
            b"type" => outline.feed_type = Some(value.to_string()),
            _ => {}
        }
    }

    // `title` wins over `text` when both are present
    if title.is_some() {
        outline.text = title;
    }
    Ok(outline)
}

/// Serializes candidates back into a subscription-list document.
///
/// Uncategorized entries come first, then one folder per category in order
/// of first appearance. Parsing the output recovers every entry's (title,
/// feed_url, category) triple.
pub fn generate_subscription_list(candidates: &[CandidateBlog]) -> Result<String> {
    use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
    use quick_xml::Writer;
    use std::io::Cursor;

    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("Failed to write XML declaration")?;

    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "2.0"));
    writer
        .write_event(Event::Start(opml))
        .context("Failed to write opml element")?;

    writer
        .write_event(Event::Start(BytesStart::new("head")))
        .context("Failed to write head element")?;
    writer
        .write_event(Event::Start(BytesStart::new("title")))
        .context("Failed to write title element")?;
    writer
        .write_event(Event::Text(BytesText::new("feedsync subscriptions")))
        .context("Failed to write title text")?;
    writer
        .write_event(Event::End(BytesEnd::new("title")))
        .context("Failed to write title end")?;
    writer
        .write_event(Event::End(BytesEnd::new("head")))
        .context("Failed to write head end")?;

    writer
        .write_event(Event::Start(BytesStart::new("body")))
        .context("Failed to write body element")?;

    // Uncategorized leaves first
    for candidate in candidates.iter().filter(|c| c.category.is_empty()) {
        write_leaf(&mut writer, candidate)?;
    }

    // Then a folder per category, in first-appearance order
    let mut seen: Vec<&str> = Vec::new();
    for candidate in candidates {
        if candidate.category.is_empty() || seen.contains(&candidate.category.as_str()) {
            continue;
        }
        seen.push(&candidate.category);

        let mut folder = BytesStart::new("outline");
        folder.push_attribute(("text", candidate.category.as_str()));
        folder.push_attribute(("title", candidate.category.as_str()));
        writer
            .write_event(Event::Start(folder))
            .context("Failed to write folder outline")?;
        for entry in candidates.iter().filter(|c| c.category == candidate.category) {
            write_leaf(&mut writer, entry)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("outline")))
            .context("Failed to write folder end")?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("body")))
        .context("Failed to write body end")?;
    writer
        .write_event(Event::End(BytesEnd::new("opml")))
        .context("Failed to write opml end")?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).context("Generated subscription list is not valid UTF-8")
}

fn write_leaf(
    writer: &mut quick_xml::Writer<std::io::Cursor<Vec<u8>>>,
    candidate: &CandidateBlog,
) -> Result<()> {
    use quick_xml::events::{BytesStart, Event};

    let mut outline = BytesStart::new("outline");
    outline.push_attribute(("type", candidate.feed_type.as_str()));
    outline.push_attribute(("text", candidate.title.as_str()));
    outline.push_attribute(("title", candidate.title.as_str()));
    outline.push_attribute(("xmlUrl", candidate.feed_url.as_str()));
    if let Some(ref site_url) = candidate.site_url {
        outline.push_attribute(("htmlUrl", site_url.as_str()));
    }
    writer
        .write_event(Event::Empty(outline))
        .context("Failed to write subscription outline")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const THREE_CANDIDATES: &str = r#"<?xml version="1.0"?>
<opml version="2.0">
  <head><title>subs</title></head>
  <body>
    <outline type="rss" text="Top Blog" xmlUrl="https://top.example.com/feed" htmlUrl="https://top.example.com"/>
    <outline text="Tech">
      <outline type="atom" text="Tech One" xmlUrl="https://one.example.com/feed"/>
      <outline text="Tech Two" xmlUrl="https://two.example.com/feed"/>
    </outline>
  </body>
</opml>"#;

    #[test]
    fn test_folder_labels_descendants_top_level_is_uncategorized() {
        let candidates = parse_subscription_list(THREE_CANDIDATES).unwrap();
        assert_eq!(candidates.len(), 3);

        assert_eq!(candidates[0].title, "Top Blog");
        assert_eq!(candidates[0].category, "");
        assert_eq!(
            candidates[0].site_url.as_deref(),
            Some("https://top.example.com")
        );

        assert_eq!(candidates[1].title, "Tech One");
        assert_eq!(candidates[1].category, "Tech");
        assert_eq!(candidates[1].feed_type, "atom");

        assert_eq!(candidates[2].title, "Tech Two");
        assert_eq!(candidates[2].category, "Tech");
        assert_eq!(candidates[2].feed_type, "rss");
    }

    #[test]
    fn test_deep_nesting_keeps_top_level_category_only() {
        let doc = r#"<opml><body>
            <outline text="Outer">
              <outline text="Inner">
                <outline text="Deep Feed" xmlUrl="https://deep.example.com/feed"/>
              </outline>
            </outline>
        </body></opml>"#;
        let candidates = parse_subscription_list(doc).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].category, "Outer");
    }

    #[test]
    fn test_invalid_urls_skipped_not_fatal() {
        let doc = r#"<opml><body>
            <outline text="Bad" xmlUrl="http://localhost/feed"/>
            <outline text="Worse" xmlUrl="ftp://example.com/feed"/>
            <outline text="Good" xmlUrl="https://good.example.com/feed"/>
        </body></opml>"#;
        let candidates = parse_subscription_list(doc).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "Good");
    }

    #[test]
    fn test_depth_limit_enforced() {
        let mut doc = String::from("<opml><body>");
        for _ in 0..60 {
            doc.push_str("<outline text=\"nest\">");
        }
        doc.push_str("<outline text=\"leaf\" xmlUrl=\"https://x.example.com/feed\"/>");
        for _ in 0..60 {
            doc.push_str("</outline>");
        }
        doc.push_str("</body></opml>");

        let result = parse_subscription_list(&doc);
        assert!(matches!(result, Err(SublistError::MaxDepthExceeded(_))));
    }

    #[test]
    fn test_title_attribute_wins_over_text() {
        let doc = r#"<opml><body>
            <outline text="text-name" title="title-name" xmlUrl="https://x.example.com/feed"/>
        </body></opml>"#;
        let candidates = parse_subscription_list(doc).unwrap();
        assert_eq!(candidates[0].title, "title-name");
    }

    #[test]
    fn test_custom_entities_rejected_not_expanded() {
        let doc = r#"<?xml version="1.0"?>
<!DOCTYPE opml [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<opml><body>
  <outline text="&xxe;" xmlUrl="https://x.example.com/feed"/>
</body></opml>"#;
        // quick-xml has no entity expansion; the unknown entity surfaces
        // as a parse error rather than file contents
        assert!(parse_subscription_list(doc).is_err());
    }

    #[test]
    fn test_export_parse_round_trip() {
        let original = vec![
            CandidateBlog {
                title: "Solo".to_string(),
                feed_url: "https://solo.example.com/feed".to_string(),
                site_url: Some("https://solo.example.com".to_string()),
                feed_type: "rss".to_string(),
                category: String::new(),
            },
            CandidateBlog {
                title: "Tech One".to_string(),
                feed_url: "https://one.example.com/feed".to_string(),
                site_url: None,
                feed_type: "atom".to_string(),
                category: "Tech".to_string(),
            },
            CandidateBlog {
                title: "News & Views".to_string(),
                feed_url: "https://news.example.com/feed".to_string(),
                site_url: None,
                feed_type: "rss".to_string(),
                category: "News".to_string(),
            },
        ];

        let document = generate_subscription_list(&original).unwrap();
        let parsed = parse_subscription_list(&document).unwrap();
        assert_eq!(parsed, original);
    }
}
