//! Feed acquisition and normalization: HTTP fetching, RSS/Atom/JSON Feed
//! parsing, HTML sanitization, subscription-list documents, and discovery.

pub mod discovery;
pub mod fetcher;
mod json_feed;
pub mod sanitize;
pub mod sublist;

pub use discovery::{discover_feed, DiscoveredFeed, DiscoveryError};
pub use fetcher::{fetch_feed, normalize_feed_bytes, FetchError, FetchOptions, NormalizedFeed};
pub use sublist::{
    fetch_subscription_list, generate_subscription_list, parse_subscription_list, CandidateBlog,
    SublistError,
};
