//! Integration tests for the source lifecycle: register, tag, edit, browse, remove.

mod common;

use common::{day, engine, entry, feed};
use pretty_assertions::assert_eq;
use prophet::config::Config;
use prophet::favicon::HttpFaviconFetcher;
use prophet::feed::{export_opml, http_client, parse_opml, HttpFeedClient};
use prophet::storage::{Database, DatabaseError, EntryFilter};
use prophet::sync::{SourceChanges, SyncEngine, SyncError};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FEED_URL: &str = "https://blog.example.com/rss";

#[tokio::test]
async fn test_register_then_browse() {
    let engine = engine().await;
    engine.client().serve(
        FEED_URL,
        feed(
            "https://blog.example.com/",
            vec![entry("second", day(2024, 1, 2)), entry("first", day(2024, 1, 1))],
        ),
    );

    let (source, result) = engine.register("Blog", FEED_URL, "rust").await.unwrap();
    assert_eq!(result.new_entry_count, 2);
    assert_eq!(source.favicon.as_deref(), Some(format!("/favicons/{}.ico", source.id).as_str()));

    let db = engine.database();
    let by_tag = db
        .list_entries(&EntryFilter {
            tag: Some("rust".to_string()),
            ..EntryFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(by_tag.len(), 2);
    assert_eq!(by_tag[0].source_name, "Blog");

    let first = by_tag[1].id;
    assert!(db.set_entry_read(first, true).await.unwrap());
    assert!(db.toggle_entry_fav(first).await.unwrap());

    let unread = db
        .list_entries(&EntryFilter {
            unread_only: true,
            ..EntryFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(unread.len(), 1);
    assert_eq!(unread[0].title, "second");

    let favorites = db
        .list_entries(&EntryFilter {
            favorites_only: true,
            ..EntryFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(favorites.len(), 1);
    assert_eq!(favorites[0].title, "first");
}

#[tokio::test]
async fn test_tagging_only_adds_until_cleared() {
    let engine = engine().await;
    engine.client().serve(FEED_URL, feed("https://blog.example.com/", vec![]));
    let (source, _) = engine.register("Blog", FEED_URL, "a").await.unwrap();
    let db = engine.database();

    let tags = db.tag_source(source.id, "b, a ,", "#ffffff").await.unwrap();
    let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);

    let cleared = db.tag_source(source.id, "  ", "#ffffff").await.unwrap();
    assert!(cleared.is_empty());

    // Tags survive detaching until cleaned
    assert_eq!(db.get_tags().await.unwrap().len(), 2);
    assert_eq!(db.clean_tags().await.unwrap(), 2);
    assert!(db.get_tags().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_edit_rename_keeps_entries() {
    let engine = engine().await;
    engine.client().serve(
        FEED_URL,
        feed("https://blog.example.com/", vec![entry("post", day(2024, 1, 1))]),
    );
    let (source, _) = engine.register("Blog", FEED_URL, "").await.unwrap();

    let renamed = engine
        .update_source(
            source.id,
            SourceChanges {
                name: Some("Renamed".to_string()),
                // Same URL: nothing is refetched
                url: Some(FEED_URL.to_string()),
                tags: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(renamed.name, "Renamed");
    assert_eq!(renamed.last_update, source.last_update);
    let entries = engine.database().entries_for_source(source.id, None).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].source_name, "Renamed");
    assert_eq!(engine.client().requests(), vec![FEED_URL.to_string()]);
}

#[tokio::test]
async fn test_edit_to_registered_url_is_rejected() {
    let engine = engine().await;
    let other_url = "https://other.example.com/rss";
    engine.client().serve(FEED_URL, feed("https://blog.example.com/", vec![]));
    engine.client().serve(other_url, feed("https://other.example.com/", vec![]));
    let (blog, _) = engine.register("Blog", FEED_URL, "").await.unwrap();
    engine.register("Other", other_url, "").await.unwrap();

    let err = engine
        .update_source(
            blog.id,
            SourceChanges {
                name: Some("Renamed".to_string()),
                url: Some(other_url.to_string()),
                tags: Some("moved".to_string()),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::PersistenceFailure(DatabaseError::DuplicateSource(_))
    ));

    // Rejected before any write or fetch
    let after = engine.database().require_source(blog.id).await.unwrap();
    assert_eq!(after, blog);
    assert_eq!(after.name, "Blog");
    assert_eq!(
        engine.client().requests(),
        vec![FEED_URL.to_string(), other_url.to_string()]
    );
}

#[tokio::test]
async fn test_remove_cascades_and_drops_favicon() {
    let engine = engine().await;
    engine.client().serve(
        FEED_URL,
        feed(
            "https://blog.example.com/",
            vec![entry("b", day(2024, 1, 2)), entry("a", day(2024, 1, 1))],
        ),
    );
    let (source, _) = engine.register("Blog", FEED_URL, "tech").await.unwrap();

    assert_eq!(engine.remove_source(source.id).await.unwrap(), 2);

    let db = engine.database();
    assert!(db.get_sources().await.unwrap().is_empty());
    assert!(db.list_entries(&EntryFilter::default()).await.unwrap().is_empty());
    assert_eq!(engine.favicons().removed(), vec![source.id]);
    assert_eq!(db.clean_tags().await.unwrap(), 1);

    // The URL can be registered again
    engine.register("Blog", FEED_URL, "").await.unwrap();
}

#[tokio::test]
async fn test_export_lists_registered_sources() {
    let engine = engine().await;
    engine.client().serve(FEED_URL, feed("https://blog.example.com/", vec![]));
    engine.register("Blog", FEED_URL, "rust").await.unwrap();

    let sources = engine.database().get_sources().await.unwrap();
    let opml = export_opml(&sources).unwrap();
    assert!(opml.contains("xmlUrl=\"https://blog.example.com/rss\""));
    assert!(opml.contains("htmlUrl=\"https://blog.example.com/\""));
    assert!(opml.contains("category=\"rust\""));
}

#[tokio::test]
async fn test_export_then_import_into_fresh_store() {
    let original = engine().await;
    original.client().serve(
        FEED_URL,
        feed("https://blog.example.com/", vec![entry("post", day(2024, 1, 1))]),
    );
    original.register("Blog", FEED_URL, "rust,tech").await.unwrap();
    let opml = export_opml(&original.database().get_sources().await.unwrap()).unwrap();

    let fresh = engine().await;
    fresh.client().serve(
        FEED_URL,
        feed("https://blog.example.com/", vec![entry("post", day(2024, 1, 1))]),
    );
    let report = fresh.import_outlines(&parse_opml(&opml).unwrap()).await;

    assert_eq!(report.imported, vec!["Blog"]);
    assert_eq!(report.new_entry_count, 1);
    let sources = fresh.database().get_sources().await.unwrap();
    assert_eq!(sources[0].url, FEED_URL);
    assert_eq!(sources[0].tags_list(), "rust,tech");
}

// ============================================================================
// Over HTTP
// ============================================================================

const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
<channel>
    <title>Served</title>
    <item>
        <title>Newer</title>
        <link>https://served.example.com/2</link>
        <pubDate>Wed, 03 Jan 2024 00:00:00 GMT</pubDate>
        <description>Newer summary</description>
    </item>
    <item>
        <title>Older</title>
        <link>https://served.example.com/1</link>
        <pubDate>Tue, 02 Jan 2024 00:00:00 GMT</pubDate>
        <description>Older summary</description>
    </item>
</channel>
</rss>"#;

#[tokio::test]
async fn test_register_and_update_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/favicon.ico"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8, 0, 1, 0]))
        .mount(&server)
        .await;

    let favicon_dir = std::env::temp_dir().join(format!("prophet_it_{}", std::process::id()));
    let config = Config {
        allow_private_hosts: true,
        request_timeout_secs: 5,
        ..Config::default()
    };
    let http = http_client(&config).unwrap();
    let client = HttpFeedClient::from_config(http.clone(), &config);
    let favicons = HttpFaviconFetcher::new(http, favicon_dir.clone(), "/favicons/");
    let db = Database::open(":memory:").await.unwrap();
    let engine = SyncEngine::new(db, client, favicons).allow_private_hosts(true);

    let feed_url = format!("{}/feed.xml", server.uri());
    let (source, result) = engine.register("Served", &feed_url, "").await.unwrap();

    assert_eq!(result.new_entry_count, 2);
    assert!(!result.favicon_failed);
    // The channel has no link, so the response URL stands in
    assert_eq!(source.html_url.as_deref(), Some(feed_url.as_str()));
    assert_eq!(source.favicon.as_deref(), Some(format!("/favicons/{}.ico", source.id).as_str()));
    assert!(favicon_dir.join(format!("{}.ico", source.id)).exists());

    let report = engine
        .sync_all(&engine.database().get_sources().await.unwrap())
        .await
        .unwrap();
    assert!(report.new_entries.is_empty());
    assert!(report.failed_sources.is_empty());

    engine.remove_source(source.id).await.unwrap();
    assert!(!favicon_dir.join(format!("{}.ico", source.id)).exists());
    std::fs::remove_dir_all(&favicon_dir).ok();
}

#[tokio::test]
async fn test_private_hosts_rejected_by_default() {
    let engine = engine().await;
    let err = engine
        .register("Local", "http://127.0.0.1:8080/feed.xml", "")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidUrl(_)));
    assert!(engine.client().requests().is_empty());
}
