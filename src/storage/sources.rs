use std::collections::HashMap;

use super::schema::Database;
use super::types::{DatabaseError, Source, SourceRow, Tag};

const SOURCE_COLUMNS: &str = "id, name, url, html_url, favicon, last_update";

impl Database {
    // ========================================================================
    // Source Operations
    // ========================================================================

    /// Insert a new source, returning its ID.
    ///
    /// The source starts without a watermark; the sync engine sets it after
    /// the first import.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::DuplicateSource`] if a source with this URL exists.
    pub async fn insert_source(&self, name: &str, url: &str) -> Result<i64, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO sources (name, url, created_at) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(name)
        .bind(url)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DatabaseError::from_source_write(e, url))?;

        Ok(row.0)
    }

    /// Get all sources with their tags, ordered by name
    pub async fn get_sources(&self) -> Result<Vec<Source>, DatabaseError> {
        let rows: Vec<SourceRow> = sqlx::query_as(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources ORDER BY name COLLATE NOCASE, id"
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut tags_by_source = self.tags_by_source().await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let tags = tags_by_source.remove(&row.0).unwrap_or_default();
                Source::from_row(row, tags)
            })
            .collect())
    }

    pub async fn get_source(&self, source_id: i64) -> Result<Option<Source>, DatabaseError> {
        let row: Option<SourceRow> =
            sqlx::query_as(&format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?"))
                .bind(source_id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(row) => {
                let tags = self.tags_for_source(row.0).await?;
                Ok(Some(Source::from_row(row, tags)))
            }
            None => Ok(None),
        }
    }

    /// Look up a source by display name (first match by id if names repeat)
    pub async fn get_source_by_name(&self, name: &str) -> Result<Option<Source>, DatabaseError> {
        let id: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM sources WHERE name = ? ORDER BY id LIMIT 1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        match id {
            Some((id,)) => self.get_source(id).await,
            None => Ok(None),
        }
    }

    /// Id of the source registered with this feed URL, if any
    pub async fn source_id_by_url(&self, url: &str) -> Result<Option<i64>, DatabaseError> {
        let id: Option<(i64,)> = sqlx::query_as("SELECT id FROM sources WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id.map(|(id,)| id))
    }

    /// Like [`get_source`](Self::get_source), but a missing row is an error.
    pub async fn require_source(&self, source_id: i64) -> Result<Source, DatabaseError> {
        self.get_source(source_id)
            .await?
            .ok_or(DatabaseError::NotFound {
                kind: "source",
                id: source_id,
            })
    }

    pub async fn rename_source(&self, source_id: i64, name: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE sources SET name = ? WHERE id = ?")
            .bind(name)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                kind: "source",
                id: source_id,
            });
        }
        Ok(())
    }

    /// Point a source at a new feed URL.
    ///
    /// Existing entries are left alone; callers that re-import use
    /// [`clear_source_entries`](Self::clear_source_entries).
    pub async fn set_source_url(&self, source_id: i64, url: &str) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE sources SET url = ? WHERE id = ?")
            .bind(url)
            .bind(source_id)
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::from_source_write(e, url))?;
        Ok(())
    }

    /// Record the outcome of a successful sync: site URL and watermark.
    ///
    /// A `None` html_url keeps the stored one.
    pub async fn record_source_sync(
        &self,
        source_id: i64,
        html_url: Option<&str>,
        last_update: Option<i64>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE sources SET html_url = COALESCE(?, html_url), last_update = ? WHERE id = ?",
        )
        .bind(html_url)
        .bind(last_update)
        .bind(source_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_source_favicon(
        &self,
        source_id: i64,
        favicon: Option<&str>,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE sources SET favicon = ? WHERE id = ?")
            .bind(favicon)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete every entry of a source and reset its watermark.
    ///
    /// Bodies go with their entries (ON DELETE CASCADE). Returns the number
    /// of entries removed.
    pub async fn clear_source_entries(&self, source_id: i64) -> Result<u64, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM entries WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("UPDATE sources SET last_update = NULL WHERE id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(removed)
    }

    /// Delete a source. Entries, bodies and tag links cascade.
    ///
    /// Returns the number of entries that went with it; deleting a missing
    /// source is a no-op returning 0.
    pub async fn delete_source(&self, source_id: i64) -> Result<u64, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let (entries,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entries WHERE source_id = ?")
            .bind(source_id)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!(source_id = source_id, entries = entries, "Deleted source");
        Ok(entries as u64)
    }

    /// All tag assignments, grouped by source id
    async fn tags_by_source(&self) -> Result<HashMap<i64, Vec<Tag>>, DatabaseError> {
        let rows: Vec<(i64, i64, String, String)> = sqlx::query_as(
            r#"
            SELECT st.source_id, t.id, t.name, t.color
            FROM source_tags st
            JOIN tags t ON t.id = st.tag_id
            ORDER BY t.name
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<i64, Vec<Tag>> = HashMap::new();
        for (source_id, id, name, color) in rows {
            grouped
                .entry(source_id)
                .or_default()
                .push(Tag { id, name, color });
        }
        Ok(grouped)
    }
}
