//! Post repository: row-level operations for the `posts` table.
//!
//! Every write goes through a version check: `insert_if_absent` only
//! creates, `update_if_version` only overwrites the version it read.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw post row from the database. JSON columns are kept as text.
#[derive(Debug, Clone, PartialEq)]
pub struct PostRow {
    pub id: String,
    pub upload_id: String,
    pub platform: String,
    pub source_id: String,
    pub user_id: Option<String>,
    pub raw_text: String,
    pub cleaned_text: Option<String>,
    pub language: Option<String>,
    pub sentiment: Option<String>,
    pub entities: String,
    pub media: String,
    pub has_media: bool,
    pub timestamp: String,
    pub timestamp_inferred: bool,
    pub missing_media: bool,
    pub metadata: String,
    pub enrichment_state: String,
    pub failed_stage: Option<String>,
    pub last_error: Option<String>,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl PostRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            upload_id: row.get("upload_id")?,
            platform: row.get("platform")?,
            source_id: row.get("source_id")?,
            user_id: row.get("user_id")?,
            raw_text: row.get("raw_text")?,
            cleaned_text: row.get("cleaned_text")?,
            language: row.get("language")?,
            sentiment: row.get("sentiment")?,
            entities: row.get("entities")?,
            media: row.get("media")?,
            has_media: row.get("has_media")?,
            timestamp: row.get("timestamp")?,
            timestamp_inferred: row.get("timestamp_inferred")?,
            missing_media: row.get("missing_media")?,
            metadata: row.get("metadata")?,
            enrichment_state: row.get("enrichment_state")?,
            failed_stage: row.get("failed_stage")?,
            last_error: row.get("last_error")?,
            version: row.get("version")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Query filter parameters for post listing. All set conditions are ANDed.
#[derive(Debug, Default, Clone)]
pub struct PostRowFilter {
    pub platform: Option<String>,
    pub sentiment: Option<String>,
    pub language: Option<String>,
    pub has_media: Option<bool>,
    pub upload_id: Option<String>,
    /// Matches any of the listed states. Empty means no state condition.
    pub states: Vec<String>,
    /// Inclusive lower bound on `timestamp`.
    pub timestamp_from: Option<String>,
    /// Exclusive upper bound on `timestamp`.
    pub timestamp_before: Option<String>,
    /// Case-insensitive substring match on raw or cleaned text.
    pub search_text: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts the row unless a post with the same id exists.
/// Returns `true` when the row was created.
pub fn insert_if_absent(db: &Database, post: &PostRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "INSERT INTO posts (id, upload_id, platform, source_id, user_id, raw_text,
             cleaned_text, language, sentiment, entities, media, has_media, timestamp,
             timestamp_inferred, missing_media, metadata, enrichment_state, failed_stage,
             last_error, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
             ?17, ?18, ?19, ?20, ?21, ?22)
             ON CONFLICT(id) DO NOTHING",
            params![
                post.id,
                post.upload_id,
                post.platform,
                post.source_id,
                post.user_id,
                post.raw_text,
                post.cleaned_text,
                post.language,
                post.sentiment,
                post.entities,
                post.media,
                post.has_media,
                post.timestamp,
                post.timestamp_inferred,
                post.missing_media,
                post.metadata,
                post.enrichment_state,
                post.failed_stage,
                post.last_error,
                post.version,
                post.created_at,
                post.updated_at,
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Overwrites every column except `id` and `created_at`, but only if the
/// stored version still equals `expected_version`. On success the stored
/// version becomes `expected_version + 1`.
pub fn update_if_version(
    db: &Database,
    post: &PostRow,
    expected_version: i64,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE posts SET upload_id=?2, platform=?3, source_id=?4, user_id=?5, raw_text=?6,
             cleaned_text=?7, language=?8, sentiment=?9, entities=?10, media=?11,
             has_media=?12, timestamp=?13, timestamp_inferred=?14, missing_media=?15,
             metadata=?16, enrichment_state=?17, failed_stage=?18, last_error=?19,
             version=?20 + 1, updated_at=?21
             WHERE id=?1 AND version=?20",
            params![
                post.id,
                post.upload_id,
                post.platform,
                post.source_id,
                post.user_id,
                post.raw_text,
                post.cleaned_text,
                post.language,
                post.sentiment,
                post.entities,
                post.media,
                post.has_media,
                post.timestamp,
                post.timestamp_inferred,
                post.missing_media,
                post.metadata,
                post.enrichment_state,
                post.failed_stage,
                post.last_error,
                expected_version,
                post.updated_at,
            ],
        )?;
        Ok(changed == 1)
    })
}

fn find_in(conn: &Connection, id: &str) -> Result<Option<PostRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM posts WHERE id = ?1",
            params![id],
            PostRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Finds a post by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<PostRow>, DatabaseError> {
    db.with_conn(|conn| find_in(conn, id))
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Queries posts with filters, ordered by `(timestamp, id)` ascending.
pub fn query(db: &Database, filter: &PostRowFilter) -> Result<Vec<PostRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref platform) = filter.platform {
            conditions.push(format!("platform = ?{}", param_values.len() + 1));
            param_values.push(Box::new(platform.clone()));
        }
        if let Some(ref sentiment) = filter.sentiment {
            conditions.push(format!("sentiment = ?{}", param_values.len() + 1));
            param_values.push(Box::new(sentiment.clone()));
        }
        if let Some(ref language) = filter.language {
            conditions.push(format!("language = ?{}", param_values.len() + 1));
            param_values.push(Box::new(language.clone()));
        }
        if let Some(has_media) = filter.has_media {
            conditions.push(format!("has_media = ?{}", param_values.len() + 1));
            param_values.push(Box::new(has_media));
        }
        if let Some(ref upload_id) = filter.upload_id {
            conditions.push(format!("upload_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(upload_id.clone()));
        }
        if !filter.states.is_empty() {
            let mut slots = Vec::with_capacity(filter.states.len());
            for state in &filter.states {
                param_values.push(Box::new(state.clone()));
                slots.push(format!("?{}", param_values.len()));
            }
            conditions.push(format!("enrichment_state IN ({})", slots.join(", ")));
        }
        if let Some(ref from) = filter.timestamp_from {
            conditions.push(format!("timestamp >= ?{}", param_values.len() + 1));
            param_values.push(Box::new(from.clone()));
        }
        if let Some(ref before) = filter.timestamp_before {
            conditions.push(format!("timestamp < ?{}", param_values.len() + 1));
            param_values.push(Box::new(before.clone()));
        }
        if let Some(ref text) = filter.search_text {
            let slot = param_values.len() + 1;
            conditions.push(format!(
                "(raw_text LIKE ?{slot} ESCAPE '\\' OR COALESCE(cleaned_text, '') LIKE ?{slot} ESCAPE '\\')"
            ));
            param_values.push(Box::new(escape_like(text)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        // SQLite needs a LIMIT before OFFSET; -1 means unbounded.
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM posts {} ORDER BY timestamp ASC, id ASC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<PostRow> = stmt
            .query_map(params_ref.as_slice(), PostRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    })
}

/// Counts the posts of an upload per enrichment state.
pub fn count_by_state(db: &Database, upload_id: &str) -> Result<Vec<(String, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT enrichment_state, COUNT(*) FROM posts WHERE upload_id = ?1
             GROUP BY enrichment_state ORDER BY enrichment_state",
        )?;
        let rows = stmt
            .query_map(params![upload_id], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open_in_memory().expect("Failed to create test database");
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO uploads (id, filename, created_at) VALUES ('up-1', 'a.json', '2026-01-01T00:00:00.000000Z')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        db
    }

    fn sample_post(id: &str) -> PostRow {
        PostRow {
            id: id.to_string(),
            upload_id: "up-1".to_string(),
            platform: "twitter".to_string(),
            source_id: id.to_string(),
            user_id: Some("alice".to_string()),
            raw_text: "Loving the new Rust release".to_string(),
            cleaned_text: None,
            language: None,
            sentiment: None,
            entities: "[]".to_string(),
            media: "[]".to_string(),
            has_media: false,
            timestamp: "2026-01-01T10:00:00.000000Z".to_string(),
            timestamp_inferred: false,
            missing_media: false,
            metadata: "{}".to_string(),
            enrichment_state: "raw".to_string(),
            failed_stage: None,
            last_error: None,
            version: 0,
            created_at: "2026-01-01T00:00:00.000000Z".to_string(),
            updated_at: "2026-01-01T00:00:00.000000Z".to_string(),
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        assert!(insert_if_absent(&db, &sample_post("p1")).unwrap());

        let found = find_by_id(&db, "p1").unwrap().unwrap();
        assert_eq!(found.platform, "twitter");
        assert_eq!(found.user_id.as_deref(), Some("alice"));
        assert_eq!(found.version, 0);
    }

    #[test]
    fn test_insert_if_absent_keeps_existing() {
        let db = test_db();
        insert_if_absent(&db, &sample_post("p1")).unwrap();

        let mut other = sample_post("p1");
        other.raw_text = "changed".to_string();
        assert!(!insert_if_absent(&db, &other).unwrap());

        let found = find_by_id(&db, "p1").unwrap().unwrap();
        assert_eq!(found.raw_text, "Loving the new Rust release");
    }

    #[test]
    fn test_find_nonexistent() {
        let db = test_db();
        assert!(find_by_id(&db, "nope").unwrap().is_none());
    }

    #[test]
    fn test_update_if_version_bumps_version() {
        let db = test_db();
        insert_if_absent(&db, &sample_post("p1")).unwrap();

        let mut post = find_by_id(&db, "p1").unwrap().unwrap();
        post.enrichment_state = "cleaning".to_string();
        assert!(update_if_version(&db, &post, 0).unwrap());

        let found = find_by_id(&db, "p1").unwrap().unwrap();
        assert_eq!(found.enrichment_state, "cleaning");
        assert_eq!(found.version, 1);
    }

    #[test]
    fn test_update_with_stale_version_is_rejected() {
        let db = test_db();
        insert_if_absent(&db, &sample_post("p1")).unwrap();

        let mut post = find_by_id(&db, "p1").unwrap().unwrap();
        post.sentiment = Some("positive".to_string());
        assert!(update_if_version(&db, &post, 0).unwrap());

        post.sentiment = Some("negative".to_string());
        assert!(!update_if_version(&db, &post, 0).unwrap());

        let found = find_by_id(&db, "p1").unwrap().unwrap();
        assert_eq!(found.sentiment.as_deref(), Some("positive"));
    }

    #[test]
    fn test_query_orders_by_timestamp_then_id() {
        let db = test_db();
        let mut late = sample_post("a");
        late.timestamp = "2026-01-02T00:00:00.000000Z".to_string();
        insert_if_absent(&db, &late).unwrap();
        insert_if_absent(&db, &sample_post("c")).unwrap();
        insert_if_absent(&db, &sample_post("b")).unwrap();

        let ids: Vec<String> = query(&db, &PostRowFilter::default())
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_query_filters_combine() {
        let db = test_db();
        let mut insta = sample_post("i1");
        insta.platform = "instagram".to_string();
        insta.has_media = true;
        insta.enrichment_state = "enriched".to_string();
        insert_if_absent(&db, &insta).unwrap();
        insert_if_absent(&db, &sample_post("t1")).unwrap();

        let rows = query(
            &db,
            &PostRowFilter {
                platform: Some("instagram".to_string()),
                has_media: Some(true),
                states: vec!["enriched".to_string(), "enrichment_failed".to_string()],
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "i1");
    }

    #[test]
    fn test_query_time_window_is_half_open() {
        let db = test_db();
        let mut edge = sample_post("edge");
        edge.timestamp = "2026-01-02T00:00:00.000000Z".to_string();
        insert_if_absent(&db, &edge).unwrap();
        insert_if_absent(&db, &sample_post("inside")).unwrap();

        let rows = query(
            &db,
            &PostRowFilter {
                timestamp_from: Some("2026-01-01T00:00:00.000000Z".to_string()),
                timestamp_before: Some("2026-01-02T00:00:00.000000Z".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "inside");
    }

    #[test]
    fn test_query_search_text_is_case_insensitive_and_literal() {
        let db = test_db();
        insert_if_absent(&db, &sample_post("p1")).unwrap();
        let mut percent = sample_post("p2");
        percent.raw_text = "100% organic".to_string();
        insert_if_absent(&db, &percent).unwrap();

        let rust = query(
            &db,
            &PostRowFilter {
                search_text: Some("rust RELEASE".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(rust.len(), 1);
        assert_eq!(rust[0].id, "p1");

        let literal = query(
            &db,
            &PostRowFilter {
                search_text: Some("0%".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(literal.len(), 1);
        assert_eq!(literal[0].id, "p2");
    }

    #[test]
    fn test_query_pagination() {
        let db = test_db();
        for i in 0..10 {
            let mut post = sample_post(&format!("p{}", i));
            post.timestamp = format!("2026-01-{:02}T00:00:00.000000Z", i + 1);
            insert_if_absent(&db, &post).unwrap();
        }

        let rows = query(
            &db,
            &PostRowFilter {
                limit: Some(3),
                offset: Some(2),
                ..Default::default()
            },
        )
        .unwrap();
        let ids: Vec<String> = rows.into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["p2", "p3", "p4"]);
    }

    #[test]
    fn test_count_by_state() {
        let db = test_db();
        insert_if_absent(&db, &sample_post("c1")).unwrap();
        insert_if_absent(&db, &sample_post("c2")).unwrap();
        let mut done = sample_post("c3");
        done.enrichment_state = "enriched".to_string();
        insert_if_absent(&db, &done).unwrap();

        let counts = count_by_state(&db, "up-1").unwrap();
        assert_eq!(
            counts,
            vec![("enriched".to_string(), 1), ("raw".to_string(), 2)]
        );
    }
}
