// Document-store port for stories and comments - isolates all database
// side effects behind an async trait the repository consumes.
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use std::sync::Arc;
use thiserror::Error;

use crate::state::DbPool;
use crate::stories::domain::{Comment, CommentId, NewComment, NewStory, Story, StoryId, StoryQuery};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid timestamp: {0}")]
    Timestamp(String),
}

/// Store trait - the capability the story core consumes. Mutations that the
/// model treats as deltas (`points`, `comment_ids`) have atomic primitives
/// here; whole-record `save` persists only the mutable fields.
#[async_trait]
pub trait StoryStore: Send + Sync {
    /// Persist a new story. Assigns id and created_at.
    async fn insert(&self, new: NewStory) -> Result<Story, StoreError>;

    /// Every story, store order.
    async fn find_all(&self) -> Result<Vec<Story>, StoreError>;

    async fn find_by_id(&self, id: &StoryId) -> Result<Option<Story>, StoreError>;

    /// Stories matching the filter, newest first, at most `limit`.
    async fn query(&self, query: &StoryQuery) -> Result<Vec<Story>, StoreError>;

    /// Persist the mutable fields of an existing story.
    async fn save(&self, story: &Story) -> Result<(), StoreError>;

    /// Atomically add `delta` to points. Returns the updated story, or None
    /// if no story has this id.
    async fn add_points(&self, id: &StoryId, delta: i64) -> Result<Option<Story>, StoreError>;

    /// Atomically append a comment reference. None if the story is absent.
    async fn push_comment(
        &self,
        id: &StoryId,
        comment_id: &CommentId,
    ) -> Result<Option<Story>, StoreError>;

    /// Atomically remove the first occurrence of a comment reference; a
    /// reference that is not present leaves the story unchanged. None if the
    /// story is absent.
    async fn pull_comment(
        &self,
        id: &StoryId,
        comment_id: &CommentId,
    ) -> Result<Option<Story>, StoreError>;

    /// Persist a new comment. Assigns id and created_at.
    async fn insert_comment(&self, new: NewComment) -> Result<Comment, StoreError>;

    /// Resolve comment references to full records, preserving input order.
    /// Dangling references are skipped.
    async fn comments_by_ids(&self, ids: &[CommentId]) -> Result<Vec<Comment>, StoreError>;
}

/// Type alias for Arc-wrapped store (for the repository)
pub type DynStoryStore = Arc<dyn StoryStore>;

// Timestamps are stored as fixed-width RFC 3339 UTC so that string
// comparison in SQL equals chronological comparison.
fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| StoreError::Timestamp(raw.to_string()))
}

// "Now" truncated to stored precision, so the record handed back by an
// insert compares equal to what a later fetch returns.
fn assign_created_at() -> Result<DateTime<Utc>, StoreError> {
    decode_ts(&encode_ts(&Utc::now()))
}

const STORY_COLUMNS: &str =
    "id, text, image, author_user_id, author_username, created_at, is_active, points, tags, comment_ids";

// Raw row as it comes out of SQLite, before JSON/timestamp decoding
struct StoryRow {
    id: String,
    text: String,
    image: String,
    author_user_id: String,
    author_username: String,
    created_at: String,
    is_active: bool,
    points: i64,
    tags: String,
    comment_ids: String,
}

fn read_story_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoryRow> {
    Ok(StoryRow {
        id: row.get(0)?,
        text: row.get(1)?,
        image: row.get(2)?,
        author_user_id: row.get(3)?,
        author_username: row.get(4)?,
        created_at: row.get(5)?,
        is_active: row.get(6)?,
        points: row.get(7)?,
        tags: row.get(8)?,
        comment_ids: row.get(9)?,
    })
}

fn decode_story(row: StoryRow) -> Result<Story, StoreError> {
    Ok(Story {
        id: StoryId::new(row.id),
        text: row.text,
        image: row.image,
        author_user_id: row.author_user_id,
        author_username: row.author_username,
        created_at: decode_ts(&row.created_at)?,
        is_active: row.is_active,
        points: row.points,
        tags: serde_json::from_str(&row.tags)?,
        comment_ids: serde_json::from_str(&row.comment_ids)?,
    })
}

fn fetch_story(conn: &Connection, id: &StoryId) -> Result<Option<Story>, StoreError> {
    let result = conn.query_row(
        &format!("SELECT {STORY_COLUMNS} FROM stories WHERE id = ?1"),
        params![id.as_str()],
        read_story_row,
    );

    match result {
        Ok(row) => Ok(Some(decode_story(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn fetch_comment(conn: &Connection, id: &CommentId) -> Result<Option<Comment>, StoreError> {
    let result = conn.query_row(
        "SELECT id, text, author_user_id, author_username, created_at
         FROM comments WHERE id = ?1",
        params![id.as_str()],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        },
    );

    match result {
        Ok((id, text, author_user_id, author_username, created_at)) => Ok(Some(Comment {
            id: CommentId::new(id),
            text,
            author_user_id,
            author_username,
            created_at: decode_ts(&created_at)?,
        })),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// SQLite implementation
pub struct SqliteStoryStore {
    pool: DbPool,
}

impl SqliteStoryStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    // Read-modify-write of comment_ids under BEGIN IMMEDIATE, so two
    // concurrent comment mutations on the same story serialize instead of
    // overwriting each other.
    fn mutate_comment_ids(
        &self,
        id: &StoryId,
        mutate: impl FnOnce(&mut Story),
    ) -> Result<Option<Story>, StoreError> {
        let conn = self.pool.get()?;
        conn.execute("BEGIN IMMEDIATE", [])?;

        let result: Result<Option<Story>, StoreError> = (|| {
            let mut story = match fetch_story(&conn, id)? {
                Some(story) => story,
                None => return Ok(None),
            };

            mutate(&mut story);

            conn.execute(
                "UPDATE stories SET comment_ids = ?1 WHERE id = ?2",
                params![serde_json::to_string(&story.comment_ids)?, id.as_str()],
            )?;

            Ok(Some(story))
        })();

        match result {
            Ok(story) => {
                conn.execute("COMMIT", [])?;
                Ok(story)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl StoryStore for SqliteStoryStore {
    async fn insert(&self, new: NewStory) -> Result<Story, StoreError> {
        let story = Story {
            id: StoryId::generate(),
            text: new.text,
            image: new.image,
            author_user_id: new.author_user_id,
            author_username: new.author_username,
            created_at: assign_created_at()?,
            is_active: true,
            points: 0,
            tags: new.tags,
            comment_ids: Vec::new(),
        };

        let conn = self.pool.get()?;
        conn.execute(
            &format!(
                "INSERT INTO stories ({STORY_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                story.id.as_str(),
                story.text,
                story.image,
                story.author_user_id,
                story.author_username,
                encode_ts(&story.created_at),
                story.is_active,
                story.points,
                serde_json::to_string(&story.tags)?,
                serde_json::to_string(&story.comment_ids)?,
            ],
        )?;

        Ok(story)
    }

    async fn find_all(&self) -> Result<Vec<Story>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!("SELECT {STORY_COLUMNS} FROM stories"))?;

        let rows: Vec<StoryRow> = stmt
            .query_map([], read_story_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(decode_story).collect()
    }

    async fn find_by_id(&self, id: &StoryId) -> Result<Option<Story>, StoreError> {
        let conn = self.pool.get()?;
        fetch_story(&conn, id)
    }

    async fn query(&self, query: &StoryQuery) -> Result<Vec<Story>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {STORY_COLUMNS} FROM stories
             WHERE is_active = ?1
               AND created_at < ?2
               AND (?3 IS NULL OR EXISTS (
                   SELECT 1 FROM json_each(stories.tags) WHERE json_each.value = ?3))
             ORDER BY created_at DESC
             LIMIT ?4"
        ))?;

        let rows: Vec<StoryRow> = stmt
            .query_map(
                params![
                    query.is_active,
                    encode_ts(&query.before),
                    query.tag,
                    query.limit as i64,
                ],
                read_story_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(decode_story).collect()
    }

    async fn save(&self, story: &Story) -> Result<(), StoreError> {
        // id, author and created_at are immutable; only the mutable field
        // group is written back.
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE stories
             SET text = ?1, image = ?2, is_active = ?3, points = ?4, tags = ?5, comment_ids = ?6
             WHERE id = ?7",
            params![
                story.text,
                story.image,
                story.is_active,
                story.points,
                serde_json::to_string(&story.tags)?,
                serde_json::to_string(&story.comment_ids)?,
                story.id.as_str(),
            ],
        )?;

        Ok(())
    }

    async fn add_points(&self, id: &StoryId, delta: i64) -> Result<Option<Story>, StoreError> {
        let conn = self.pool.get()?;
        let rows = conn.execute(
            "UPDATE stories SET points = points + ?1 WHERE id = ?2",
            params![delta, id.as_str()],
        )?;

        if rows == 0 {
            return Ok(None);
        }

        fetch_story(&conn, id)
    }

    async fn push_comment(
        &self,
        id: &StoryId,
        comment_id: &CommentId,
    ) -> Result<Option<Story>, StoreError> {
        let comment_id = comment_id.clone();
        self.mutate_comment_ids(id, move |story| story.push_comment(comment_id))
    }

    async fn pull_comment(
        &self,
        id: &StoryId,
        comment_id: &CommentId,
    ) -> Result<Option<Story>, StoreError> {
        self.mutate_comment_ids(id, |story| {
            story.pull_comment(comment_id);
        })
    }

    async fn insert_comment(&self, new: NewComment) -> Result<Comment, StoreError> {
        let comment = Comment {
            id: CommentId::generate(),
            text: new.text,
            author_user_id: new.author_user_id,
            author_username: new.author_username,
            created_at: assign_created_at()?,
        };

        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO comments (id, text, author_user_id, author_username, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                comment.id.as_str(),
                comment.text,
                comment.author_user_id,
                comment.author_username,
                encode_ts(&comment.created_at),
            ],
        )?;

        Ok(comment)
    }

    async fn comments_by_ids(&self, ids: &[CommentId]) -> Result<Vec<Comment>, StoreError> {
        let conn = self.pool.get()?;
        let mut comments = Vec::with_capacity(ids.len());

        for id in ids {
            if let Some(comment) = fetch_comment(&conn, id)? {
                comments.push(comment);
            }
        }

        Ok(comments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::Duration;
    use r2d2_sqlite::SqliteConnectionManager;

    fn test_store() -> SqliteStoryStore {
        let manager = SqliteConnectionManager::memory();
        let pool = r2d2::Pool::builder().max_size(1).build(manager).unwrap();
        db::run_migrations(&pool).unwrap();
        SqliteStoryStore::new(pool)
    }

    fn new_story(text: &str) -> NewStory {
        NewStory {
            text: text.into(),
            image: "img.png".into(),
            author_user_id: "u1".into(),
            author_username: "alice".into(),
            tags: vec!["a".into(), "b".into()],
        }
    }

    fn backdate(store: &SqliteStoryStore, id: &StoryId, ts: DateTime<Utc>) {
        let conn = store.pool.get().unwrap();
        conn.execute(
            "UPDATE stories SET created_at = ?1 WHERE id = ?2",
            params![encode_ts(&ts), id.as_str()],
        )
        .unwrap();
    }

    #[tokio::test]
    async fn insert_assigns_id_and_defaults() {
        let store = test_store();
        let story = store.insert(new_story("hello")).await.unwrap();

        assert!(!story.id.as_str().is_empty());
        assert!(story.is_active);
        assert_eq!(story.points, 0);
        assert_eq!(story.tags, vec!["a", "b"]);
        assert!(story.comment_ids.is_empty());

        let loaded = store.find_by_id(&story.id).await.unwrap();
        assert_eq!(loaded, Some(story));
    }

    #[tokio::test]
    async fn find_by_id_missing_returns_none() {
        let store = test_store();
        let loaded = store.find_by_id(&StoryId::new("missing")).await.unwrap();
        assert_eq!(loaded, None);
    }

    #[tokio::test]
    async fn save_persists_mutable_fields() {
        let store = test_store();
        let mut story = store.insert(new_story("hello")).await.unwrap();

        story.text = "edited".into();
        story.tags = vec!["z".into()];
        story.is_active = false;
        store.save(&story).await.unwrap();

        let loaded = store.find_by_id(&story.id).await.unwrap().unwrap();
        assert_eq!(loaded.text, "edited");
        assert_eq!(loaded.tags, vec!["z"]);
        assert!(!loaded.is_active);
        // Immutable fields survive a save untouched
        assert_eq!(loaded.author_username, "alice");
        assert_eq!(loaded.created_at, story.created_at);
    }

    #[tokio::test]
    async fn query_filters_by_active_tag_and_cursor() {
        let store = test_store();
        let now = Utc::now();

        let s1 = store.insert(new_story("oldest")).await.unwrap();
        backdate(&store, &s1.id, now - Duration::hours(3));

        let s2 = store.insert(new_story("middle")).await.unwrap();
        backdate(&store, &s2.id, now - Duration::hours(2));

        let mut s3 = store.insert(new_story("archived")).await.unwrap();
        backdate(&store, &s3.id, now - Duration::hours(1));
        s3.is_active = false;
        store.save(&s3).await.unwrap();

        // Active stories only, newest first
        let active = store
            .query(&StoryQuery {
                is_active: true,
                tag: None,
                before: now,
                limit: 50,
            })
            .await
            .unwrap();
        let texts: Vec<&str> = active.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["middle", "oldest"]);

        // Archived listing sees only the archived story
        let archived = store
            .query(&StoryQuery {
                is_active: false,
                tag: None,
                before: now,
                limit: 50,
            })
            .await
            .unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].text, "archived");

        // Tag filter
        let tagged = store
            .query(&StoryQuery {
                is_active: true,
                tag: Some("a".into()),
                before: now,
                limit: 50,
            })
            .await
            .unwrap();
        assert_eq!(tagged.len(), 2);

        let untagged = store
            .query(&StoryQuery {
                is_active: true,
                tag: Some("zzz".into()),
                before: now,
                limit: 50,
            })
            .await
            .unwrap();
        assert!(untagged.is_empty());

        // Cursor excludes stories at or after `before`
        let older = store
            .query(&StoryQuery {
                is_active: true,
                tag: None,
                before: now - Duration::hours(2),
                limit: 50,
            })
            .await
            .unwrap();
        let texts: Vec<&str> = older.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["oldest"]);
    }

    #[tokio::test]
    async fn query_respects_limit() {
        let store = test_store();
        let now = Utc::now();

        for i in 0..5 {
            let story = store.insert(new_story(&format!("s{}", i))).await.unwrap();
            backdate(&store, &story.id, now - Duration::minutes(i + 1));
        }

        let page = store
            .query(&StoryQuery {
                is_active: true,
                tag: None,
                before: now,
                limit: 3,
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 3);
        let texts: Vec<&str> = page.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["s0", "s1", "s2"]);
    }

    #[tokio::test]
    async fn add_points_accumulates() {
        let store = test_store();
        let story = store.insert(new_story("hello")).await.unwrap();

        let after = store.add_points(&story.id, 5).await.unwrap().unwrap();
        assert_eq!(after.points, 5);

        let after = store.add_points(&story.id, -2).await.unwrap().unwrap();
        assert_eq!(after.points, 3);
    }

    #[tokio::test]
    async fn add_points_missing_story_returns_none() {
        let store = test_store();
        let result = store.add_points(&StoryId::new("missing"), 1).await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn push_and_pull_comment_round_trip() {
        let store = test_store();
        let story = store.insert(new_story("hello")).await.unwrap();
        let c1 = CommentId::new("c1");
        let c2 = CommentId::new("c2");

        store.push_comment(&story.id, &c1).await.unwrap().unwrap();
        let after = store.push_comment(&story.id, &c2).await.unwrap().unwrap();
        assert_eq!(after.comment_ids, vec![c1.clone(), c2.clone()]);

        let after = store.pull_comment(&story.id, &c1).await.unwrap().unwrap();
        assert_eq!(after.comment_ids, vec![c2]);
    }

    #[tokio::test]
    async fn pull_comment_removes_one_of_duplicates() {
        let store = test_store();
        let story = store.insert(new_story("hello")).await.unwrap();
        let c1 = CommentId::new("c1");

        store.push_comment(&story.id, &c1).await.unwrap();
        store.push_comment(&story.id, &c1).await.unwrap();

        let after = store.pull_comment(&story.id, &c1).await.unwrap().unwrap();
        assert_eq!(after.comment_ids, vec![c1]);
    }

    #[tokio::test]
    async fn pull_absent_comment_is_a_noop() {
        let store = test_store();
        let story = store.insert(new_story("hello")).await.unwrap();
        let c1 = CommentId::new("c1");
        store.push_comment(&story.id, &c1).await.unwrap();

        let after = store
            .pull_comment(&story.id, &CommentId::new("zzz"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.comment_ids, vec![c1]);
    }

    #[tokio::test]
    async fn comment_ops_on_missing_story_return_none() {
        let store = test_store();
        let missing = StoryId::new("missing");
        let c1 = CommentId::new("c1");

        assert_eq!(store.push_comment(&missing, &c1).await.unwrap(), None);
        assert_eq!(store.pull_comment(&missing, &c1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn comments_by_ids_preserves_order_and_skips_missing() {
        let store = test_store();

        let c1 = store
            .insert_comment(NewComment {
                text: "first".into(),
                author_user_id: "u1".into(),
                author_username: "alice".into(),
            })
            .await
            .unwrap();
        let c2 = store
            .insert_comment(NewComment {
                text: "second".into(),
                author_user_id: "u2".into(),
                author_username: "bob".into(),
            })
            .await
            .unwrap();

        let ids = vec![c2.id.clone(), CommentId::new("missing"), c1.id.clone()];
        let comments = store.comments_by_ids(&ids).await.unwrap();
        let texts: Vec<&str> = comments.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["second", "first"]);
    }

    #[test]
    fn encoded_timestamps_order_lexicographically() {
        let base = Utc::now();
        let earlier = encode_ts(&(base - Duration::microseconds(1)));
        let later = encode_ts(&base);
        assert!(earlier < later);
        // Round trip is exact at microsecond precision
        assert_eq!(encode_ts(&decode_ts(&later).unwrap()), later);
    }
}
