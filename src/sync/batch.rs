use serde::Serialize;

use super::engine::SyncEngine;
use crate::favicon::FaviconFetcher;
use crate::feed::FeedClient;
use crate::storage::{DatabaseError, Entry, EntryFilter, Source};

/// Result of syncing a set of sources.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    /// Entries published after the batch's starting point, newest first
    pub new_entries: Vec<Entry>,
    pub succeeded_sources: Vec<String>,
    /// Names of sources whose sync failed, in batch order
    pub failed_sources: Vec<String>,
}

impl BatchReport {
    pub fn new_entry_count(&self) -> usize {
        self.new_entries.len()
    }

    /// One-line summary, e.g. `"3 new entries"`
    pub fn summary(&self) -> String {
        match self.new_entry_count() {
            1 => "1 new entry".to_string(),
            n => format!("{n} new entries"),
        }
    }
}

impl<C: FeedClient, F: FaviconFetcher> SyncEngine<C, F> {
    /// Sync every source in order, then report what is new.
    ///
    /// The newest stored entry is captured before the first sync and used
    /// as the cutoff for [`BatchReport::new_entries`].
    pub async fn sync_all(&self, sources: &[Source]) -> Result<BatchReport, DatabaseError> {
        let prior_watermark = self.database().latest_entry_timestamp_global().await?;
        self.sync_all_since(sources, prior_watermark).await
    }

    /// Sync every source in order, reporting entries published after
    /// `prior_watermark` (every entry when `None`).
    ///
    /// A failing source is recorded and skipped; only the final entry
    /// query can fail the batch.
    pub async fn sync_all_since(
        &self,
        sources: &[Source],
        prior_watermark: Option<i64>,
    ) -> Result<BatchReport, DatabaseError> {
        let mut report = BatchReport::default();

        for source in sources {
            match self.sync(source).await {
                Ok(_) => report.succeeded_sources.push(source.name.clone()),
                Err(e) => {
                    tracing::warn!(
                        source_id = source.id,
                        source = %source.name,
                        error = %e,
                        "Sync failed"
                    );
                    report.failed_sources.push(source.name.clone());
                }
            }
        }

        report.new_entries = self
            .database()
            .list_entries(&EntryFilter::published_after(prior_watermark))
            .await?;

        tracing::info!(
            sources = sources.len(),
            failed = report.failed_sources.len(),
            new_entries = report.new_entry_count(),
            "Batch finished"
        );
        Ok(report)
    }
}
