//! Fixtures shared by the unit tests: canned feeds, a favicon stub and a
//! server whose response body never finishes.

use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::favicon::{FaviconError, FaviconFetcher};
use crate::feed::{Feed, FeedClient, FetchError, RemoteEntry};
use crate::storage::Database;
use crate::sync::SyncEngine;

pub(crate) type FakeEngine = SyncEngine<FakeClient, FakeFavicons>;

pub(crate) fn ts(y: i32, m: u32, d: u32) -> i64 {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap().timestamp()
}

pub(crate) fn entry(title: &str, published: i64) -> RemoteEntry {
    RemoteEntry {
        title: title.to_string(),
        url: Some(format!("https://example.com/{title}")),
        published,
        content: Some(format!("<p>{title}</p>")),
        summary: None,
    }
}

pub(crate) fn feed(entries: Vec<RemoteEntry>) -> Feed {
    Feed {
        title: Some("Example".to_string()),
        url: Some("https://example.com/".to_string()),
        entries,
    }
}

/// Serves canned feeds by URL; unknown URLs fail with 503.
#[derive(Default)]
pub(crate) struct FakeClient {
    feeds: Mutex<HashMap<String, Feed>>,
}

impl FakeClient {
    pub(crate) fn serve(&self, url: &str, feed: Feed) {
        self.feeds.lock().unwrap().insert(url.to_string(), feed);
    }
}

impl FeedClient for FakeClient {
    async fn fetch(&self, url: &str) -> Result<Feed, FetchError> {
        self.feeds
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or(FetchError::HttpStatus(503))
    }
}

pub(crate) struct FakeFavicons {
    pub(crate) available: bool,
}

impl FaviconFetcher for FakeFavicons {
    async fn fetch_favicon(&self, _site_url: &str, source_id: i64) -> Result<String, FaviconError> {
        if self.available {
            Ok(format!("/favicons/{source_id}.ico"))
        } else {
            Err(FaviconError::Empty)
        }
    }

    fn remove_favicon(&self, _source_id: i64) -> Result<(), FaviconError> {
        Ok(())
    }
}

pub(crate) async fn engine(favicons: bool) -> FakeEngine {
    let db = Database::open(":memory:").await.unwrap();
    SyncEngine::new(db, FakeClient::default(), FakeFavicons { available: favicons })
        .with_tag_color("#123456")
}

/// Make every insert of an entry for `source_id` fail, as a full disk would.
pub(crate) async fn fail_entry_writes(db: &Database, source_id: i64) {
    sqlx::query(&format!(
        "CREATE TRIGGER fail_entries_{source_id} BEFORE INSERT ON entry_bodies \
         WHEN (SELECT source_id FROM entries WHERE id = NEW.entry_id) = {source_id} \
         BEGIN SELECT RAISE(ABORT, 'disk full'); END"
    ))
    .execute(&db.pool)
    .await
    .unwrap();
}

/// Accept connections, send headers announcing 1000 bytes, send four of
/// them and then stall. Returns a URL on the server.
pub(crate) async fn stalled_body_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = [0u8; 1024];
                let _ = socket.read(&mut request).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n<rss")
                    .await;
                tokio::time::sleep(Duration::from_secs(30)).await;
            });
        }
    });
    format!("http://{addr}/feed")
}
