//! Shared fixtures: a canned feed client, a favicon stub and feed builders.
#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use prophet::favicon::{FaviconError, FaviconFetcher};
use prophet::feed::{Feed, FeedClient, FetchError, RemoteEntry};
use prophet::storage::Database;
use prophet::sync::SyncEngine;

pub type TestEngine = SyncEngine<CannedClient, StubFavicons>;

/// Serves feeds from memory. URLs without a feed fail with a 503.
#[derive(Default)]
pub struct CannedClient {
    feeds: Mutex<HashMap<String, Feed>>,
    requests: Mutex<Vec<String>>,
}

impl CannedClient {
    pub fn serve(&self, url: &str, feed: Feed) {
        self.feeds.lock().unwrap().insert(url.to_string(), feed);
    }

    pub fn take_down(&self, url: &str) {
        self.feeds.lock().unwrap().remove(url);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl FeedClient for CannedClient {
    async fn fetch(&self, url: &str) -> Result<Feed, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        self.feeds
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or(FetchError::HttpStatus(503))
    }
}

/// Hands out `/favicons/{id}.ico` and remembers removals.
#[derive(Default)]
pub struct StubFavicons {
    removed: Mutex<Vec<i64>>,
}

impl StubFavicons {
    pub fn removed(&self) -> Vec<i64> {
        self.removed.lock().unwrap().clone()
    }
}

impl FaviconFetcher for StubFavicons {
    async fn fetch_favicon(&self, _site_url: &str, source_id: i64) -> Result<String, FaviconError> {
        Ok(format!("/favicons/{source_id}.ico"))
    }

    fn remove_favicon(&self, source_id: i64) -> Result<(), FaviconError> {
        self.removed.lock().unwrap().push(source_id);
        Ok(())
    }
}

pub async fn engine() -> TestEngine {
    let db = Database::open(":memory:").await.unwrap();
    SyncEngine::new(db, CannedClient::default(), StubFavicons::default())
}

/// Midnight UTC of the given day as a unix timestamp
pub fn day(y: i32, m: u32, d: u32) -> i64 {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap().timestamp()
}

pub fn entry(slug: &str, published: i64) -> RemoteEntry {
    RemoteEntry {
        title: slug.to_string(),
        url: Some(format!("https://example.com/posts/{slug}")),
        published,
        content: Some(format!("<p>{slug}</p>")),
        summary: Some(format!("{slug} summary")),
    }
}

/// A feed whose entries are given newest-first
pub fn feed(site: &str, entries: Vec<RemoteEntry>) -> Feed {
    Feed {
        title: Some(site.to_string()),
        url: Some(site.to_string()),
        entries,
    }
}
