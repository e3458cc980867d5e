// Story repository - all story lifecycle, query and authorization-sensitive
// mutation logic. Every operation resolves to exactly one envelope:
// Ok(payload) or a StoryError that maps to a status code.
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::state::DbPool;
use crate::stories::domain::{
    Comment, CommentId, NewComment, NewStory, Story, StoryId, StoryQuery, StoryWithComments,
};
use crate::stories::store::{DynStoryStore, SqliteStoryStore, StoreError};

/// Listing page size; callers page backward in time with the `before` cursor.
pub const PAGE_SIZE: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum StoryError {
    /// A required field failed validation
    #[error("{0}")]
    Validation(String),

    /// The caller may not perform this operation
    #[error("{0}")]
    Unauthorized(String),

    #[error("Could not find story")]
    NotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StoryError {
    pub fn status(&self) -> StatusCode {
        match self {
            StoryError::Validation(_) | StoryError::Unauthorized(_) => StatusCode::FORBIDDEN,
            StoryError::NotFound => StatusCode::NOT_FOUND,
            StoryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn unauthorized() -> Self {
        StoryError::Unauthorized("Operation unauthorized".to_string())
    }
}

#[derive(Clone)]
pub struct StoryRepository {
    store: DynStoryStore,
}

impl StoryRepository {
    pub fn new(store: DynStoryStore) -> Self {
        Self { store }
    }

    pub fn sqlite(pool: DbPool) -> Self {
        Self::new(Arc::new(SqliteStoryStore::new(pool)))
    }

    /// Every story, active or not, in store order.
    pub async fn get_all(&self) -> Result<Vec<Story>, StoryError> {
        Ok(self.store.find_all().await?)
    }

    /// Up to [`PAGE_SIZE`] stories strictly older than `start_date` (now when
    /// absent), newest first, optionally filtered by tag. Pass the last
    /// item's `created_at` as the next `start_date` to page backward.
    pub async fn get_stories(
        &self,
        tag: Option<&str>,
        is_active: bool,
        start_date: Option<DateTime<Utc>>,
    ) -> Result<Vec<Story>, StoryError> {
        let query = StoryQuery {
            is_active,
            tag: tag.map(str::to_string),
            before: start_date.unwrap_or_else(Utc::now),
            limit: PAGE_SIZE,
        };
        Ok(self.store.query(&query).await?)
    }

    /// Validate and persist a new story. Nothing is written when validation
    /// fails.
    pub async fn create_new(&self, input: NewStory) -> Result<Story, StoryError> {
        if input.text.is_empty() {
            return Err(StoryError::Validation(
                "You cannot leave the text blank".to_string(),
            ));
        }
        if input.image.is_empty() {
            return Err(StoryError::Validation(
                "Please upload a picture".to_string(),
            ));
        }

        Ok(self.store.insert(input).await?)
    }

    /// One story with its comment references expanded, in association order.
    pub async fn get_story(&self, id: &StoryId) -> Result<StoryWithComments, StoryError> {
        let story = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(StoryError::NotFound)?;
        let comments = self.store.comments_by_ids(&story.comment_ids).await?;

        Ok(StoryWithComments { story, comments })
    }

    /// Soft-delete: flips `is_active` to false. Idempotent; there is no
    /// un-archive.
    pub async fn archive_story(&self, id: &StoryId) -> Result<Story, StoryError> {
        let mut story = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(StoryError::NotFound)?;

        story.is_active = false;
        self.store.save(&story).await?;

        Ok(story)
    }

    /// Replace the tag list wholesale.
    pub async fn update_tags(
        &self,
        id: &StoryId,
        new_tags: Vec<String>,
    ) -> Result<Story, StoryError> {
        let mut story = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(StoryError::NotFound)?;

        story.tags = new_tags;
        self.store.save(&story).await?;

        Ok(story)
    }

    /// Replace the story text. Only the original author may edit, matched by
    /// the denormalized author username.
    pub async fn update_text(
        &self,
        id: &StoryId,
        requesting_username: &str,
        new_text: String,
    ) -> Result<Story, StoryError> {
        if new_text.is_empty() {
            return Err(StoryError::Validation(
                "You cannot leave the text blank".to_string(),
            ));
        }

        let mut story = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(StoryError::NotFound)?;

        if story.author_username != requesting_username {
            return Err(StoryError::unauthorized());
        }

        story.text = new_text;
        self.store.save(&story).await?;

        Ok(story)
    }

    /// Append a comment reference to the story.
    pub async fn add_comment(
        &self,
        id: &StoryId,
        comment_id: &CommentId,
    ) -> Result<Story, StoryError> {
        self.store
            .push_comment(id, comment_id)
            .await?
            .ok_or(StoryError::NotFound)
    }

    /// Remove the first occurrence of a comment reference. Removing an id
    /// that is not present succeeds without changing the story.
    pub async fn remove_comment(
        &self,
        id: &StoryId,
        comment_id: &CommentId,
    ) -> Result<Story, StoryError> {
        self.store
            .pull_comment(id, comment_id)
            .await?
            .ok_or(StoryError::NotFound)
    }

    /// Apply a point delta, positive or negative. Atomic at the store, so
    /// concurrent votes never drop each other.
    pub async fn update_points(&self, id: &StoryId, delta: i64) -> Result<Story, StoryError> {
        self.store
            .add_points(id, delta)
            .await?
            .ok_or(StoryError::NotFound)
    }

    /// Persist a comment record and link it to the story in one step.
    pub async fn create_comment(
        &self,
        story_id: &StoryId,
        input: NewComment,
    ) -> Result<Comment, StoryError> {
        if input.text.is_empty() {
            return Err(StoryError::Validation(
                "You cannot leave the text blank".to_string(),
            ));
        }

        // Check the story first so a bad id never leaves an orphan record
        if self.store.find_by_id(story_id).await?.is_none() {
            return Err(StoryError::NotFound);
        }

        let comment = self.store.insert_comment(input).await?;
        match self.store.push_comment(story_id, &comment.id).await? {
            Some(_) => Ok(comment),
            None => Err(StoryError::NotFound),
        }
    }

    pub async fn get_comment(&self, id: &CommentId) -> Result<Option<Comment>, StoryError> {
        let comments = self.store.comments_by_ids(std::slice::from_ref(id)).await?;
        Ok(comments.into_iter().next())
    }
}
