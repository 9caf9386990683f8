//! Feed discovery: probe a URL that may be a feed or an HTML page.
//!
//! HTML pages are scanned for `<link rel="alternate">` feed references with
//! plain string matching; no HTML parser dependency. Every URL that crosses
//! this boundary is SSRF-validated, including ones discovered inside the
//! fetched page.

use thiserror::Error;

use crate::feed::fetcher::{fetch_feed, FetchError, FetchOptions, NormalizedFeed};
use crate::util::validate_url;

/// Feed metadata discovered at (or via) a probed URL.
#[derive(Debug, Clone)]
pub struct DiscoveredFeed {
    pub title: String,
    /// URL of the feed document itself, possibly not the probed URL
    pub feed_url: String,
    pub site_url: Option<String>,
    pub feed_type: String,
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The probed or discovered URL failed validation
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    /// No feed content and no feed link in the page
    #[error("not a feed: no RSS/Atom/JSON feed found")]
    NotAFeed,
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Probes a URL for a feed.
///
/// A URL that parses as a feed wins directly. Otherwise the body is
/// treated as HTML, scanned for a feed link, and the discovered URL is
/// validated and fetched in turn.
pub async fn discover_feed(
    client: &reqwest::Client,
    url: &str,
    options: &FetchOptions,
) -> Result<DiscoveredFeed, DiscoveryError> {
    let validated = validate_url(url).map_err(|e| DiscoveryError::InvalidUrl(e.to_string()))?;
    probe(client, validated.as_str(), options).await
}

/// Discovery without the initial URL validation; tests point this at a
/// local mock server.
pub(crate) async fn probe(
    client: &reqwest::Client,
    url: &str,
    options: &FetchOptions,
) -> Result<DiscoveredFeed, DiscoveryError> {
    match fetch_feed(client, url, options).await {
        Ok(feed) => return Ok(discovered(feed, url)),
        Err(FetchError::Parse(_)) => {}
        Err(e) => return Err(e.into()),
    }

    // Not a feed: re-fetch as text and scan for a feed link. Two requests
    // keep fetch_feed's streaming/size-cap path unchanged for the common
    // case.
    let body = tokio::time::timeout(options.timeout, async {
        client.get(url).send().await?.text().await
    })
    .await
    .map_err(|_| FetchError::Timeout)?
    .map_err(FetchError::from)?;

    let feed_href = find_feed_link_in_html(&body, url).ok_or(DiscoveryError::NotAFeed)?;
    validate_url(&feed_href).map_err(|e| DiscoveryError::InvalidUrl(e.to_string()))?;

    let feed = fetch_feed(client, &feed_href, options)
        .await
        .map_err(|e| match e {
            FetchError::Parse(_) => DiscoveryError::NotAFeed,
            other => other.into(),
        })?;

    let mut result = discovered(feed, &feed_href);
    if result.site_url.is_none() {
        result.site_url = Some(url.to_string());
    }
    Ok(result)
}

fn discovered(feed: NormalizedFeed, feed_url: &str) -> DiscoveredFeed {
    DiscoveredFeed {
        title: feed.title,
        feed_url: feed_url.to_string(),
        site_url: feed.site_url,
        feed_type: feed.feed_type,
    }
}

/// Scans HTML for `<link rel="alternate">` tags with an RSS/Atom/JSON feed
/// type, returning the first matching href resolved against the base URL.
fn find_feed_link_in_html(html: &str, base_url: &str) -> Option<String> {
    let html_lower = html.to_lowercase();
    let mut search_from = 0;

    while let Some(link_start) = html_lower[search_from..].find("<link") {
        let abs_start = search_from + link_start;
        let remaining = &html_lower[abs_start..];
        let tag_end = remaining.find('>')?;
        let tag = &remaining[..=tag_end];

        if has_attr_value(tag, "rel", "alternate") && is_feed_type(tag) {
            // Extract href from the original casing to preserve the URL
            let original_tag = &html[abs_start..abs_start + tag_end + 1];
            if let Some(href) = extract_attr_value(original_tag, "href") {
                return Some(resolve_url(href, base_url));
            }
        }

        search_from = abs_start + tag_end + 1;
    }
    None
}

fn has_attr_value(tag: &str, name: &str, value: &str) -> bool {
    tag.contains(&format!("{name}=\"{value}\"")) || tag.contains(&format!("{name}='{value}'"))
}

fn is_feed_type(tag: &str) -> bool {
    tag.contains("application/rss+xml")
        || tag.contains("application/atom+xml")
        || tag.contains("application/feed+json")
        || tag.contains("application/json")
}

fn extract_attr_value<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let tag_lower = tag.to_lowercase();
    let prefix = format!("{name}=");
    let start = tag_lower.find(&prefix)? + prefix.len();
    let rest = tag.get(start..)?;
    let quote = *rest.as_bytes().first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let inner = &rest[1..];
    let end = inner.find(quote as char)?;
    Some(&inner[..end])
}

/// Resolves a possibly-relative href against the page URL. Protocol-relative
/// hrefs go through the URL parser so malformed authority sections cannot
/// smuggle credentials past later validation.
fn resolve_url(href: &str, base_url: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    if href.starts_with("//") {
        if let Ok(parsed) = url::Url::parse(&format!("https:{}", href)) {
            return parsed.to_string();
        }
    }
    if let Ok(base) = url::Url::parse(base_url) {
        if let Ok(resolved) = base.join(href) {
            return resolved.to_string();
        }
    }
    href.to_string()
}
