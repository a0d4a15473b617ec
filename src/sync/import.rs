use serde::Serialize;

use super::engine::{SyncEngine, SyncError};
use crate::favicon::FaviconFetcher;
use crate::feed::{FeedClient, OpmlOutline};
use crate::storage::DatabaseError;

/// A subscription that could not be registered.
#[derive(Debug, Clone, Serialize)]
pub struct ImportFailure {
    pub name: String,
    pub url: String,
    pub error: String,
}

/// Result of importing a subscription list.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    /// Names of the sources registered, in file order
    pub imported: Vec<String>,
    /// Outlines whose URL was already registered
    pub skipped: Vec<String>,
    pub failed: Vec<ImportFailure>,
    /// Entries imported across all new sources
    pub new_entry_count: usize,
}

impl ImportReport {
    pub fn summary(&self) -> String {
        format!(
            "Imported {} sources ({} entries), {} already registered, {} failed",
            self.imported.len(),
            self.new_entry_count,
            self.skipped.len(),
            self.failed.len()
        )
    }
}

impl<C: FeedClient, F: FaviconFetcher> SyncEngine<C, F> {
    /// Register every outline, one after the other.
    ///
    /// Each outline goes through [`register`](Self::register); a failing
    /// one is recorded and the rest are still imported.
    pub async fn import_outlines(&self, outlines: &[OpmlOutline]) -> ImportReport {
        let mut report = ImportReport::default();

        for outline in outlines {
            match self
                .register(&outline.name, &outline.xml_url, &outline.tags)
                .await
            {
                Ok((source, result)) => {
                    report.new_entry_count += result.new_entry_count;
                    report.imported.push(source.name);
                }
                Err(SyncError::PersistenceFailure(DatabaseError::DuplicateSource(_))) => {
                    tracing::debug!(url = %outline.xml_url, "Already registered, skipping");
                    report.skipped.push(outline.name.clone());
                }
                Err(e) => {
                    tracing::warn!(
                        source = %outline.name,
                        url = %outline.xml_url,
                        error = %e,
                        "Import failed"
                    );
                    report.failed.push(ImportFailure {
                        name: outline.name.clone(),
                        url: outline.xml_url.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            imported = report.imported.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Import finished"
        );
        report
    }
}
