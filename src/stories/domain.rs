// Domain types - Pure, immutable where the model says so, no side effects
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// New types for compile-time safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoryId(pub String);

impl StoryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommentId(pub String);

impl CommentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user-authored story. `id`, `author_user_id`, `author_username` and
/// `created_at` never change after creation; `is_active` only moves
/// true -> false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: StoryId,
    pub text: String,
    pub image: String,
    pub author_user_id: String,
    pub author_username: String,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
    pub points: i64,
    pub tags: Vec<String>,
    pub comment_ids: Vec<CommentId>,
}

impl Story {
    /// Append a comment reference. Insertion order is preserved, duplicates
    /// are allowed.
    pub fn push_comment(&mut self, comment_id: CommentId) {
        self.comment_ids.push(comment_id);
    }

    /// Remove the first occurrence of `comment_id`. Returns whether anything
    /// was removed; an absent id leaves the sequence untouched.
    pub fn pull_comment(&mut self, comment_id: &CommentId) -> bool {
        match self.comment_ids.iter().position(|c| c == comment_id) {
            Some(index) => {
                self.comment_ids.remove(index);
                true
            }
            None => false,
        }
    }
}

/// Input for creating a story. The store assigns id and created_at.
#[derive(Debug, Clone)]
pub struct NewStory {
    pub text: String,
    pub image: String,
    pub author_user_id: String,
    pub author_username: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub text: String,
    pub author_user_id: String,
    pub author_username: String,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a comment. The store assigns id and created_at.
#[derive(Debug, Clone)]
pub struct NewComment {
    pub text: String,
    pub author_user_id: String,
    pub author_username: String,
}

/// A story with its comment references expanded to full records, in
/// `comment_ids` order.
#[derive(Debug, Clone, Serialize)]
pub struct StoryWithComments {
    #[serde(flatten)]
    pub story: Story,
    pub comments: Vec<Comment>,
}

/// Filter for the paginated story listing. `before` is the pagination
/// cursor: only stories strictly older than it are returned.
#[derive(Debug, Clone)]
pub struct StoryQuery {
    pub is_active: bool,
    pub tag: Option<String>,
    pub before: DateTime<Utc>,
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story_with_comments(ids: &[&str]) -> Story {
        Story {
            id: StoryId::new("s1"),
            text: "hello".into(),
            image: "img.png".into(),
            author_user_id: "u1".into(),
            author_username: "alice".into(),
            created_at: Utc::now(),
            is_active: true,
            points: 0,
            tags: vec![],
            comment_ids: ids.iter().map(|i| CommentId::new(*i)).collect(),
        }
    }

    #[test]
    fn push_comment_appends_in_order() {
        let mut story = story_with_comments(&["a"]);
        story.push_comment(CommentId::new("b"));
        story.push_comment(CommentId::new("c"));
        let ids: Vec<&str> = story.comment_ids.iter().map(|c| c.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn push_comment_allows_duplicates() {
        let mut story = story_with_comments(&["a"]);
        story.push_comment(CommentId::new("a"));
        assert_eq!(story.comment_ids.len(), 2);
    }

    #[test]
    fn pull_comment_removes_first_occurrence_only() {
        let mut story = story_with_comments(&["a", "b", "a"]);
        assert!(story.pull_comment(&CommentId::new("a")));
        let ids: Vec<&str> = story.comment_ids.iter().map(|c| c.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn pull_comment_absent_id_is_a_noop() {
        let mut story = story_with_comments(&["a", "b"]);
        assert!(!story.pull_comment(&CommentId::new("zzz")));
        let ids: Vec<&str> = story.comment_ids.iter().map(|c| c.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn story_id_generate_is_unique() {
        assert_ne!(StoryId::generate(), StoryId::generate());
    }
}
