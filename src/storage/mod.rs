//! SQLite-backed store: schema and migrations plus the query layers for
//! sources, blogs, items, run statistics, and the foreign mirror tables.

mod blogs;
mod items;
mod mirror;
mod schema;
mod sources;
mod stats;
mod types;

pub use mirror::{ItemSource, MirrorChannel, MirrorFeed, MirrorStore};
pub use schema::Database;
pub use types::{
    Blog, BlogStatus, BlogUpsert, Item, NewBlog, NewItem, NewSource, RunStats, Source, SourceKind,
    StoreError,
};
