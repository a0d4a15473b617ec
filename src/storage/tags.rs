use anyhow::{bail, Result};

use super::schema::Database;
use super::types::{DatabaseError, Tag};
use crate::util::strip_control_chars;

impl Database {
    // ========================================================================
    // Tag Operations
    // ========================================================================

    /// Sanitize and validate a tag name.
    ///
    /// Strips control characters and surrounding whitespace. Commas are
    /// rejected because tag lists are comma-separated.
    fn sanitize_tag_name(name: &str) -> Result<String> {
        let sanitized = strip_control_chars(name);
        let trimmed = sanitized.trim();
        if trimmed.is_empty() {
            bail!("Tag name cannot be empty or whitespace-only");
        }
        if trimmed.contains(',') {
            bail!("Tag name cannot contain a comma");
        }
        Ok(trimmed.to_owned())
    }

    /// Split a comma-separated tag list into clean, de-duplicated names.
    pub fn parse_tag_list(list: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for piece in list.split(',') {
            let clean = strip_control_chars(piece);
            let name = clean.trim();
            if !name.is_empty() && !names.iter().any(|n| n == name) {
                names.push(name.to_owned());
            }
        }
        names
    }

    /// Create a tag, returning its ID. Names are unique.
    pub async fn create_tag(&self, name: &str, color: &str) -> Result<i64> {
        let clean_name = Self::sanitize_tag_name(name)?;

        let row: (i64,) = match sqlx::query_as(
            "INSERT INTO tags (name, color) VALUES (?, ?) RETURNING id",
        )
        .bind(&clean_name)
        .bind(color)
        .fetch_one(&self.pool)
        .await
        {
            Ok(row) => row,
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                bail!("Tag '{}' already exists", clean_name)
            }
            Err(e) => return Err(e.into()),
        };

        Ok(row.0)
    }

    /// Rename a tag and/or change its color. `None` leaves a field as is.
    pub async fn update_tag(&self, id: i64, name: Option<&str>, color: Option<&str>) -> Result<()> {
        let clean_name = name.map(Self::sanitize_tag_name).transpose()?;

        let result = sqlx::query(
            "UPDATE tags SET name = COALESCE(?, name), color = COALESCE(?, color) WHERE id = ?",
        )
        .bind(clean_name.as_deref())
        .bind(color)
        .bind(id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(r) if r.rows_affected() == 0 => bail!("Tag {} not found", id),
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                bail!("Tag '{}' already exists", clean_name.unwrap_or_default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a tag. Sources carrying it lose it (ON DELETE CASCADE on source_tags).
    pub async fn delete_tag(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tags WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All tags ordered by name
    pub async fn get_tags(&self) -> Result<Vec<Tag>> {
        let tags = sqlx::query_as::<_, Tag>("SELECT id, name, color FROM tags ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(tags)
    }

    pub async fn get_tag_by_name(&self, name: &str) -> Result<Option<Tag>> {
        let tag = sqlx::query_as::<_, Tag>("SELECT id, name, color FROM tags WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tag)
    }

    /// Delete every tag no source carries. Returns how many were removed.
    pub async fn clean_tags(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM tags WHERE id NOT IN (SELECT DISTINCT tag_id FROM source_tags)",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn tags_for_source(&self, source_id: i64) -> Result<Vec<Tag>, DatabaseError> {
        let tags = sqlx::query_as::<_, Tag>(
            r#"
            SELECT t.id, t.name, t.color
            FROM tags t
            JOIN source_tags st ON st.tag_id = t.id
            WHERE st.source_id = ?
            ORDER BY t.name
        "#,
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tags)
    }

    /// Tag a source from a comma-separated list.
    ///
    /// Existing tags are reused; missing ones are created with `color`.
    /// Tags already on the source stay, so this only ever adds. An empty
    /// list (after trimming) removes every tag from the source instead.
    ///
    /// Returns the source's tags after the change.
    pub async fn tag_source(
        &self,
        source_id: i64,
        list: &str,
        color: &str,
    ) -> Result<Vec<Tag>, DatabaseError> {
        let names = Self::parse_tag_list(list);
        let mut tx = self.pool.begin().await?;

        if names.is_empty() {
            sqlx::query("DELETE FROM source_tags WHERE source_id = ?")
                .bind(source_id)
                .execute(&mut *tx)
                .await?;
        }

        for name in &names {
            sqlx::query("INSERT INTO tags (name, color) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
                .bind(name)
                .bind(color)
                .execute(&mut *tx)
                .await?;

            sqlx::query(
                r#"
                INSERT OR IGNORE INTO source_tags (source_id, tag_id)
                SELECT ?, id FROM tags WHERE name = ?
            "#,
            )
            .bind(source_id)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.tags_for_source(source_id).await
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    async fn seed_source(db: &Database, name: &str) -> i64 {
        db.insert_source(name, &format!("https://{name}.example.com/rss"))
            .await
            .unwrap()
    }

    fn names(tags: &[crate::storage::Tag]) -> Vec<&str> {
        tags.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn test_parse_tag_list() {
        assert_eq!(
            Database::parse_tag_list(" rust, news ,,rust,\u{1b}[31mred"),
            vec!["rust", "news", "red"]
        );
        assert!(Database::parse_tag_list("").is_empty());
        assert!(Database::parse_tag_list(" , ").is_empty());
    }

    #[tokio::test]
    async fn test_create_tag_rejects_duplicates_and_blank() {
        let db = test_db().await;

        let id = db.create_tag("Tech", "#ff0000").await.unwrap();
        assert!(id > 0);
        assert!(db.create_tag("Tech", "#00ff00").await.is_err());
        assert!(db.create_tag("   ", "#00ff00").await.is_err());
        assert!(db.create_tag("a,b", "#00ff00").await.is_err());
    }

    #[tokio::test]
    async fn test_tag_source_reuses_existing_tags() {
        let db = test_db().await;
        let a = seed_source(&db, "a").await;
        let b = seed_source(&db, "b").await;

        db.create_tag("rust", "#b7410e").await.unwrap();
        db.tag_source(a, "rust,news", "#ffffff").await.unwrap();
        let tags_b = db.tag_source(b, "news", "#ffffff").await.unwrap();

        let all = db.get_tags().await.unwrap();
        assert_eq!(names(&all), vec!["news", "rust"]);
        assert_eq!(all[1].color, "#b7410e", "existing color kept");
        assert_eq!(all[0].color, "#ffffff", "new tag gets the default color");
        assert_eq!(names(&tags_b), vec!["news"]);
    }

    #[tokio::test]
    async fn test_tag_source_is_additive_and_idempotent() {
        let db = test_db().await;
        let a = seed_source(&db, "a").await;

        db.tag_source(a, "rust", "#ffffff").await.unwrap();
        db.tag_source(a, "rust", "#ffffff").await.unwrap();
        let tags = db.tag_source(a, "news", "#ffffff").await.unwrap();

        assert_eq!(names(&tags), vec!["news", "rust"]);
    }

    #[tokio::test]
    async fn test_empty_list_clears_source_tags() {
        let db = test_db().await;
        let a = seed_source(&db, "a").await;
        db.tag_source(a, "rust,news", "#ffffff").await.unwrap();

        let tags = db.tag_source(a, "  ", "#ffffff").await.unwrap();
        assert!(tags.is_empty());
        assert_eq!(db.get_tags().await.unwrap().len(), 2, "tags themselves remain");
    }

    #[tokio::test]
    async fn test_clean_tags_removes_unused() {
        let db = test_db().await;
        let a = seed_source(&db, "a").await;
        db.tag_source(a, "used", "#ffffff").await.unwrap();
        db.create_tag("orphan", "#000000").await.unwrap();

        assert_eq!(db.clean_tags().await.unwrap(), 1);
        assert_eq!(names(&db.get_tags().await.unwrap()), vec!["used"]);
    }

    #[tokio::test]
    async fn test_update_and_delete_tag() {
        let db = test_db().await;
        let a = seed_source(&db, "a").await;
        let tags = db.tag_source(a, "old", "#ffffff").await.unwrap();
        let id = tags[0].id;

        db.update_tag(id, Some("new"), Some("#123456")).await.unwrap();
        let tag = db.get_tag_by_name("new").await.unwrap().unwrap();
        assert_eq!(tag.color, "#123456");

        db.update_tag(id, None, Some("#654321")).await.unwrap();
        let tag = db.get_tag_by_name("new").await.unwrap().unwrap();
        assert_eq!(tag.color, "#654321");

        assert!(db.delete_tag(id).await.unwrap());
        assert!(db.tags_for_source(a).await.unwrap().is_empty());
        assert!(db.update_tag(id, Some("ghost"), None).await.is_err());
    }
}
