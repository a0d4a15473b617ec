use futures::stream::{BoxStream, StreamExt, TryStreamExt};

use super::schema::Database;
use super::types::{DatabaseError, Entry, EntryFilter, EntryRow, NewEntry};

/// Entry listing query. Every filter is optional; an unset parameter
/// disables its predicate. `LIMIT -1` means unbounded in SQLite.
///
/// The inner join on `entry_bodies` keeps an entry invisible until its body
/// exists.
const ENTRY_QUERY: &str = r#"
    SELECT e.id, e.source_id, s.name AS source_name, e.title, e.url, e.published,
           e.read, e.fav, b.html AS body
    FROM entries e
    JOIN sources s ON s.id = e.source_id
    JOIN entry_bodies b ON b.entry_id = e.id
    WHERE (?1 IS NULL OR s.name = ?1)
      AND (?2 IS NULL OR e.source_id = ?2)
      AND (?3 IS NULL OR EXISTS (
            SELECT 1 FROM source_tags st
            JOIN tags t ON t.id = st.tag_id
            WHERE st.source_id = e.source_id AND t.name = ?3))
      AND (?4 = 0 OR e.read = 0)
      AND (?5 = 0 OR e.fav = 1)
      AND (?6 IS NULL OR e.published > ?6)
    ORDER BY e.published DESC, e.id DESC
    LIMIT ?7
"#;

impl Database {
    // ========================================================================
    // Entry Store
    // ========================================================================

    /// Append entries to a source in the given order, returning how many were inserted.
    ///
    /// Each entry and its body are written in one transaction, so an entry is
    /// never observable without its body. Entries are committed one by one:
    /// if a write fails mid-batch, the entries already committed stay.
    ///
    /// An entry whose url is already stored for this source is skipped.
    pub async fn append_entries(
        &self,
        source_id: i64,
        entries: &[NewEntry],
    ) -> Result<usize, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let mut inserted = 0;

        for entry in entries {
            let mut tx = self.pool.begin().await?;

            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO entries (source_id, title, url, published, fetched_at)
                VALUES (?, ?, ?, ?, ?)
            "#,
            )
            .bind(source_id)
            .bind(&entry.title)
            .bind(&entry.url)
            .bind(entry.published)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                tracing::debug!(
                    source_id = source_id,
                    url = ?entry.url,
                    "Entry url already stored, skipping"
                );
                tx.rollback().await?;
                continue;
            }

            sqlx::query("INSERT INTO entry_bodies (entry_id, html) VALUES (?, ?)")
                .bind(result.last_insert_rowid())
                .bind(&entry.body)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            inserted += 1;
        }

        Ok(inserted)
    }

    /// Published time of the newest entry of a source, if it has any
    pub async fn latest_entry_timestamp(&self, source_id: i64) -> Result<Option<i64>, DatabaseError> {
        let row: (Option<i64>,) =
            sqlx::query_as("SELECT MAX(published) FROM entries WHERE source_id = ?")
                .bind(source_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    /// Published time of the newest entry across all sources
    pub async fn latest_entry_timestamp_global(&self) -> Result<Option<i64>, DatabaseError> {
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(published) FROM entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Stream entries matching `filter`, newest first.
    ///
    /// The stream is lazy and finite; call again to restart it.
    pub fn entries(&self, filter: &EntryFilter) -> BoxStream<'_, Result<Entry, DatabaseError>> {
        sqlx::query_as::<_, EntryRow>(ENTRY_QUERY)
            .bind(filter.source.clone())
            .bind(filter.source_id)
            .bind(filter.tag.clone())
            .bind(filter.unread_only)
            .bind(filter.favorites_only)
            .bind(filter.published_after)
            .bind(filter.limit.unwrap_or(-1))
            .fetch(&self.pool)
            .map_ok(EntryRow::into_entry)
            .map_err(DatabaseError::from)
            .boxed()
    }

    /// Collect [`entries`](Self::entries) into a `Vec`
    pub async fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<Entry>, DatabaseError> {
        self.entries(filter).try_collect().await
    }

    pub async fn entries_for_source(
        &self,
        source_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<Entry>, DatabaseError> {
        let filter = EntryFilter {
            limit,
            ..EntryFilter::for_source(source_id)
        };
        self.list_entries(&filter).await
    }

    pub async fn get_entry(&self, entry_id: i64) -> Result<Option<Entry>, DatabaseError> {
        let row = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT e.id, e.source_id, s.name AS source_name, e.title, e.url, e.published,
                   e.read, e.fav, b.html AS body
            FROM entries e
            JOIN sources s ON s.id = e.source_id
            JOIN entry_bodies b ON b.entry_id = e.id
            WHERE e.id = ?
        "#,
        )
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(EntryRow::into_entry))
    }

    /// Set the read flag. Returns true if the flag changed.
    pub async fn set_entry_read(&self, entry_id: i64, read: bool) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE entries SET read = ? WHERE id = ? AND read != ?")
            .bind(read)
            .bind(entry_id)
            .bind(read)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Flip the favorite flag, returning the new value.
    pub async fn toggle_entry_fav(&self, entry_id: i64) -> Result<bool, DatabaseError> {
        let row: Option<(bool,)> =
            sqlx::query_as("UPDATE entries SET fav = NOT fav WHERE id = ? RETURNING fav")
                .bind(entry_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(fav,)| fav).ok_or(DatabaseError::NotFound {
            kind: "entry",
            id: entry_id,
        })
    }

    /// Mark every entry read, or only those of one source. Returns rows changed.
    pub async fn mark_all_read(&self, source_id: Option<i64>) -> Result<u64, DatabaseError> {
        let result = sqlx::query("UPDATE entries SET read = 1 WHERE read = 0 AND (? IS NULL OR source_id = ?)")
            .bind(source_id)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete one entry (its body cascades). Returns true if it existed.
    pub async fn delete_entry(&self, entry_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM entries WHERE id = ?")
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
