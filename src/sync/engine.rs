use serde::Serialize;
use thiserror::Error;

use crate::favicon::FaviconFetcher;
use crate::feed::{Feed, FeedClient, FetchError};
use crate::storage::{Database, DatabaseError, NewEntry, Source};
use crate::util::{strip_control_chars, validate_feed_url, UrlValidationError};

/// Why a source could not be synced or changed.
///
/// Every variant is contained to the source it concerns; the batch runner
/// records the source as failed and moves on.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The feed could not be fetched or parsed
    #[error("Feed unavailable: {0}")]
    FeedUnavailable(#[from] FetchError),

    /// Writing to the store failed
    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[from] DatabaseError),

    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),

    #[error("Invalid source: {0}")]
    InvalidSource(String),
}

/// Outcome of one successful sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub new_entry_count: usize,
    /// Watermark after the sync; `None` only while a source has never seen an entry
    pub updated_watermark: Option<i64>,
    /// The favicon step ran and failed (the sync itself still succeeded)
    pub favicon_failed: bool,
}

/// Changes applied by [`SyncEngine::update_source`]. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct SourceChanges {
    pub name: Option<String>,
    pub url: Option<String>,
    /// Comma-separated tag list; an empty string clears the source's tags
    pub tags: Option<String>,
}

/// Pulls feeds into the store, one source at a time.
pub struct SyncEngine<C, F> {
    db: Database,
    client: C,
    favicons: F,
    tag_color: String,
    allow_private_hosts: bool,
}

impl<C: FeedClient, F: FaviconFetcher> SyncEngine<C, F> {
    pub fn new(db: Database, client: C, favicons: F) -> Self {
        Self {
            db,
            client,
            favicons,
            tag_color: "#ffffff".to_string(),
            allow_private_hosts: false,
        }
    }

    /// Color of tags created while registering or editing a source
    pub fn with_tag_color(mut self, color: impl Into<String>) -> Self {
        self.tag_color = color.into();
        self
    }

    pub fn allow_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn favicons(&self) -> &F {
        &self.favicons
    }

    /// Sync one source against its feed.
    ///
    /// Entries newer than the source's watermark are appended oldest-first,
    /// then the site URL and watermark are recorded. A fetch failure leaves
    /// the source untouched.
    pub async fn sync(&self, source: &Source) -> Result<SyncResult, SyncError> {
        let feed = self.client.fetch(&source.url).await?;
        let (new_entry_count, updated_watermark) =
            self.ingest(source.id, source.last_update, &feed).await?;

        let favicon_failed = if source.favicon.is_none() {
            let site = feed.url.as_deref().or(source.html_url.as_deref());
            !self.refresh_favicon(source.id, site).await
        } else {
            false
        };

        tracing::info!(
            source_id = source.id,
            new_entries = new_entry_count,
            watermark = ?updated_watermark,
            "Synced source"
        );

        Ok(SyncResult {
            new_entry_count,
            updated_watermark,
            favicon_failed,
        })
    }

    /// Sync the source with this id, reading its current watermark first.
    pub async fn sync_by_id(&self, source_id: i64) -> Result<SyncResult, SyncError> {
        let source = self.db.require_source(source_id).await?;
        self.sync(&source).await
    }

    /// Register a new source and import its whole feed.
    ///
    /// The feed is fetched before anything is written, so an unreachable
    /// feed leaves no trace. `tags` is a comma-separated list and may be empty.
    pub async fn register(
        &self,
        name: &str,
        url: &str,
        tags: &str,
    ) -> Result<(Source, SyncResult), SyncError> {
        let name = clean_name(name)?;
        let url = validate_feed_url(url, self.allow_private_hosts)?;

        let feed = self.client.fetch(url.as_str()).await?;
        let source_id = self.db.insert_source(&name, url.as_str()).await?;
        let (new_entry_count, updated_watermark) = self.ingest(source_id, None, &feed).await?;

        if !tags.trim().is_empty() {
            self.db.tag_source(source_id, tags, &self.tag_color).await?;
        }

        let favicon_failed = !self.refresh_favicon(source_id, feed.url.as_deref()).await;

        tracing::info!(
            source_id = source_id,
            url = %url,
            entries = new_entry_count,
            "Registered source"
        );

        let source = self.db.require_source(source_id).await?;
        Ok((
            source,
            SyncResult {
                new_entry_count,
                updated_watermark,
                favicon_failed,
            },
        ))
    }

    /// Edit a source.
    ///
    /// A new URL is checked against the other sources and fetched before
    /// anything changes; on success the source's entries are replaced by a
    /// fresh import of the new feed. The favicon is fetched again when the
    /// URL changed or none is stored.
    pub async fn update_source(
        &self,
        source_id: i64,
        changes: SourceChanges,
    ) -> Result<Source, SyncError> {
        let source = self.db.require_source(source_id).await?;

        let name = changes.name.as_deref().map(clean_name).transpose()?;
        let new_url = match changes.url.as_deref() {
            Some(raw) => {
                let url = validate_feed_url(raw, self.allow_private_hosts)?;
                (url.as_str() != source.url).then(|| url.to_string())
            }
            None => None,
        };
        let new_feed = match new_url.as_deref() {
            Some(url) => {
                if let Some(owner) = self.db.source_id_by_url(url).await? {
                    if owner != source_id {
                        return Err(DatabaseError::DuplicateSource(url.to_owned()).into());
                    }
                }
                Some(self.client.fetch(url).await?)
            }
            None => None,
        };

        let mut site = source.html_url.clone();
        if let (Some(url), Some(feed)) = (new_url.as_deref(), new_feed.as_ref()) {
            self.db.set_source_url(source_id, url).await?;
            let removed = self.db.clear_source_entries(source_id).await?;
            let (imported, _) = self.ingest(source_id, None, feed).await?;
            tracing::info!(
                source_id = source_id,
                url = %url,
                removed = removed,
                imported = imported,
                "Source URL changed, entries re-imported"
            );
            site = feed.url.clone().or(site);
        }

        if let Some(ref name) = name {
            self.db.rename_source(source_id, name).await?;
        }

        if let Some(ref tags) = changes.tags {
            self.db.tag_source(source_id, tags, &self.tag_color).await?;
        }

        if new_feed.is_some() || source.favicon.is_none() {
            self.refresh_favicon(source_id, site.as_deref()).await;
        }

        Ok(self.db.require_source(source_id).await?)
    }

    /// Delete a source with its entries, tag links and favicon.
    ///
    /// Returns the number of entries deleted with it.
    pub async fn remove_source(&self, source_id: i64) -> Result<u64, SyncError> {
        let source = self.db.require_source(source_id).await?;
        let removed = self.db.delete_source(source_id).await?;

        if let Err(e) = self.favicons.remove_favicon(source_id) {
            tracing::warn!(source_id = source_id, error = %e, "Failed to remove favicon");
        }

        tracing::info!(source_id = source_id, name = %source.name, entries = removed, "Removed source");
        Ok(removed)
    }

    /// Append the feed's new entries and record the sync on the source.
    ///
    /// Returns the number of entries inserted and the new watermark.
    async fn ingest(
        &self,
        source_id: i64,
        last_update: Option<i64>,
        feed: &Feed,
    ) -> Result<(usize, Option<i64>), DatabaseError> {
        let candidates = select_new_entries(feed, last_update);
        let inserted = self.db.append_entries(source_id, &candidates).await?;

        let watermark = next_watermark(last_update, feed);
        if let (Some(old), Some(newest)) = (last_update, feed.most_recent_published()) {
            if newest < old {
                tracing::warn!(
                    source_id = source_id,
                    watermark = old,
                    newest = newest,
                    "Feed went back in time, keeping watermark"
                );
            }
        }

        self.db
            .record_source_sync(source_id, feed.url.as_deref(), watermark)
            .await?;
        Ok((inserted, watermark))
    }

    /// Fetch and store a favicon. Returns whether it succeeded.
    async fn refresh_favicon(&self, source_id: i64, site_url: Option<&str>) -> bool {
        let Some(site_url) = site_url else {
            tracing::debug!(source_id = source_id, "No site URL, skipping favicon");
            return false;
        };

        let reference = match self.favicons.fetch_favicon(site_url, source_id).await {
            Ok(reference) => reference,
            Err(e) => {
                tracing::warn!(source_id = source_id, site = %site_url, error = %e, "Favicon unavailable");
                return false;
            }
        };

        match self.db.set_source_favicon(source_id, Some(&reference)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(source_id = source_id, error = %e, "Failed to store favicon reference");
                false
            }
        }
    }
}

/// Entries of `feed` newer than `last_update`, oldest first.
///
/// Feeds list entries newest-first; the order is reversed so an interrupted
/// import has committed the older entries. Without a watermark every entry
/// is new.
pub fn select_new_entries(feed: &Feed, last_update: Option<i64>) -> Vec<NewEntry> {
    feed.entries
        .iter()
        .rev()
        .filter(|entry| last_update.map_or(true, |watermark| entry.published > watermark))
        .map(|entry| NewEntry {
            title: entry.title.clone(),
            url: entry.url.clone(),
            published: entry.published,
            body: entry.body().to_owned(),
        })
        .collect()
}

/// Watermark after syncing `feed`: its most recent entry, never moving backward.
///
/// An empty feed keeps the current watermark.
pub fn next_watermark(last_update: Option<i64>, feed: &Feed) -> Option<i64> {
    match (last_update, feed.most_recent_published()) {
        (Some(old), Some(newest)) => Some(old.max(newest)),
        (old, newest) => newest.or(old),
    }
}

fn clean_name(name: &str) -> Result<String, SyncError> {
    let clean = strip_control_chars(name);
    let trimmed = clean.trim();
    if trimmed.is_empty() {
        return Err(SyncError::InvalidSource(
            "Source name cannot be empty".to_string(),
        ));
    }
    Ok(trimmed.to_owned())
}
