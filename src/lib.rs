//! feedsync: a feed aggregation sync engine.
//!
//! Periodically reconciles a local blog/item store against configured
//! sources: subscription-list documents (fetched or inline), a read-only
//! mirror of a foreign subscription subsystem, and hosted remote
//! directories. Individual feeds are fetched concurrently, normalized
//! across RSS/Atom/JSON Feed, sanitized, and upserted idempotently.

pub mod config;
pub mod feed;
pub mod storage;
pub mod sync;
pub mod util;
