use feed_rs::model;
use feed_rs::parser;

use super::client::FetchError;
use crate::util::strip_control_chars;

/// A parsed feed document. Ephemeral: consumed by one sync and discarded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Feed {
    pub title: Option<String>,
    /// Canonical site URL (the feed's own non-self link, or the URL the
    /// document was finally served from)
    pub url: Option<String>,
    /// Entries in document order, which feeds publish newest-first
    pub entries: Vec<RemoteEntry>,
}

impl Feed {
    /// Published time of the feed's first entry, the most recent one by convention
    pub fn most_recent_published(&self) -> Option<i64> {
        self.entries.first().map(|e| e.published)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub title: String,
    pub url: Option<String>,
    /// Unix timestamp (seconds)
    pub published: i64,
    pub content: Option<String>,
    pub summary: Option<String>,
}

impl RemoteEntry {
    /// HTML body to store: the content, or the summary when content is empty.
    pub fn body(&self) -> &str {
        match self.content.as_deref() {
            Some(content) if !content.trim().is_empty() => content,
            _ => self.summary.as_deref().unwrap_or(""),
        }
    }
}

/// Parse an RSS or Atom document.
///
/// Entries fall back to `updated` when `published` is missing; an entry
/// with neither fails the whole document with [`FetchError::MissingTimestamp`].
pub fn parse_feed(bytes: &[u8]) -> Result<Feed, FetchError> {
    let feed = parser::parse(bytes).map_err(|e| FetchError::Parse(e.to_string()))?;

    let url = feed
        .links
        .iter()
        .find(|l| l.rel.as_deref() != Some("self"))
        .map(|l| l.href.clone());
    let title = feed
        .title
        .map(|t| strip_control_chars(&t.content).into_owned());

    let entries = feed
        .entries
        .into_iter()
        .map(remote_entry)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Feed {
        title,
        url,
        entries,
    })
}

fn remote_entry(entry: model::Entry) -> Result<RemoteEntry, FetchError> {
    let title = entry
        .title
        .map(|t| strip_control_chars(&t.content).trim().to_owned())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());

    let published = entry
        .published
        .or(entry.updated)
        .map(|dt| dt.timestamp())
        .ok_or_else(|| FetchError::MissingTimestamp(title.clone()))?;

    let url = entry
        .links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| entry.links.first())
        .map(|l| l.href.clone());

    Ok(RemoteEntry {
        title,
        url,
        published,
        content: entry.content.and_then(|c| c.body),
        summary: entry.summary.map(|s| s.content),
    })
}
