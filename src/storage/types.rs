use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds a lock on the database file
    #[error("Another instance of prophet appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A source with the same feed URL is already registered
    #[error("A source with URL {0} already exists")]
    DuplicateSource(String),

    /// A row addressed by id does not exist
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }

    /// Map a UNIQUE(url) violation on `sources` to [`DatabaseError::DuplicateSource`].
    pub(crate) fn from_source_write(err: sqlx::Error, url: &str) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DatabaseError::DuplicateSource(url.to_owned())
            }
            _ => DatabaseError::Other(err),
        }
    }
}

// ============================================================================
// Helper Types
// ============================================================================

/// Row type for source queries (tags are attached separately)
pub(crate) type SourceRow = (
    i64,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<i64>,
);

/// An entry ready to be stored, produced by the sync engine from a remote entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub title: String,
    pub url: Option<String>,
    /// Unix timestamp (seconds)
    pub published: i64,
    /// HTML body: the remote content, or its summary when content is empty
    pub body: String,
}

/// Internal row type for Entry queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EntryRow {
    pub id: i64,
    pub source_id: i64,
    pub source_name: String,
    pub title: String,
    pub url: Option<String>,
    pub published: i64,
    pub read: bool,
    pub fav: bool,
    pub body: String,
}

impl EntryRow {
    pub(crate) fn into_entry(self) -> Entry {
        Entry {
            id: self.id,
            source_id: self.source_id,
            source_name: self.source_name,
            title: self.title,
            url: self.url,
            published: self.published,
            read: self.read,
            fav: self.fav,
            body: self.body,
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A registered feed source.
///
/// `last_update` is the watermark: the published time of the most recent
/// entry known to be ingested. `None` means the source was never synced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub html_url: Option<String>,
    pub favicon: Option<String>,
    pub last_update: Option<i64>,
    pub tags: Vec<Tag>,
}

impl Source {
    pub(crate) fn from_row(row: SourceRow, tags: Vec<Tag>) -> Self {
        let (id, name, url, html_url, favicon, last_update) = row;
        Self {
            id,
            name,
            url,
            html_url,
            favicon,
            last_update,
            tags,
        }
    }

    /// Comma-separated tag names, in the form accepted by `tag_source`.
    pub fn tags_list(&self) -> String {
        self.tags
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A stored entry together with its body and the name of its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub id: i64,
    pub source_id: i64,
    pub source_name: String,
    pub title: String,
    pub url: Option<String>,
    pub published: i64,
    pub read: bool,
    pub fav: bool,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub color: String,
}

/// Filter for entry queries. The default matches every entry, unbounded.
///
/// Results are always ordered newest-first (`published DESC`, then `id DESC`).
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    /// Only entries of the source with this name
    pub source: Option<String>,
    /// Only entries of the source with this id
    pub source_id: Option<i64>,
    /// Only entries of sources carrying this tag
    pub tag: Option<String>,
    pub unread_only: bool,
    pub favorites_only: bool,
    /// Only entries published strictly after this timestamp
    pub published_after: Option<i64>,
    pub limit: Option<i64>,
}

impl EntryFilter {
    pub fn for_source(source_id: i64) -> Self {
        Self {
            source_id: Some(source_id),
            ..Self::default()
        }
    }

    pub fn published_after(timestamp: Option<i64>) -> Self {
        Self {
            published_after: timestamp,
            ..Self::default()
        }
    }
}
