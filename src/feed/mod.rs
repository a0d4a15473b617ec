//! Feed retrieval: HTTP fetching, RSS/Atom parsing and OPML import/export.
//!
//! - [`client`] - the [`FeedClient`] trait and its `reqwest` implementation
//! - [`parser`] - `feed-rs` based parsing into [`Feed`] / [`RemoteEntry`]
//! - [`opml`] - subscription list import and export

mod client;
mod opml;
mod parser;

pub use client::{http_client, redirect_policy, FeedClient, FetchError, HttpFeedClient};
pub(crate) use client::{read_limited_bytes, within};
pub use opml::{export_opml, export_to_file, parse_opml, read_opml, OpmlError, OpmlOutline};
pub use parser::{parse_feed, Feed, RemoteEntry};
