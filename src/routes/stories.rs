use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::extractors::CurrentUser;
use crate::routes::success;
use crate::state::AppState;
use crate::stories::{CommentId, NewComment, NewStory, StoryError, StoryId};

// --- Request types ---

#[derive(Deserialize)]
pub struct ListParams {
    pub tag: Option<String>,
    pub active: Option<bool>,
    /// Pagination cursor; only stories strictly older than this are returned.
    pub before: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct CreateStoryRequest {
    pub text: String,
    pub image: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Deserialize)]
pub struct UpdateTagsRequest {
    pub tags: Vec<String>,
}

#[derive(Deserialize)]
pub struct UpdateTextRequest {
    pub text: String,
}

#[derive(Deserialize)]
pub struct PointsRequest {
    pub delta: i64,
}

#[derive(Deserialize)]
pub struct CreateCommentRequest {
    pub text: String,
}

// --- Router ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/stories", get(list_stories).post(create_story))
        .route("/api/stories/all", get(list_all_stories))
        .route("/api/stories/{id}", get(get_story))
        .route("/api/stories/{id}/archive", post(archive_story))
        .route("/api/stories/{id}/tags", put(update_tags))
        .route("/api/stories/{id}/text", put(update_text))
        .route("/api/stories/{id}/points", post(update_points))
        .route("/api/stories/{id}/comments", post(create_comment))
        .route(
            "/api/stories/{id}/comments/{comment_id}",
            delete(remove_comment),
        )
}

// --- Guards ---

// Archiving and retagging are capability-gated in the repository; the
// authorization decision lives here at the transport boundary, keyed on the
// stable user id rather than the display name.
async fn require_story_owner(
    state: &AppState,
    user: &CurrentUser,
    id: &StoryId,
) -> Result<(), StoryError> {
    let story = state.stories.get_story(id).await?;
    if story.story.author_user_id != user.id && !user.is_admin {
        return Err(StoryError::Unauthorized(
            "You are not authorized to perform this action".to_string(),
        ));
    }
    Ok(())
}

// --- Handlers ---

/// GET /api/stories: paginated listing, newest first.
async fn list_stories(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Response, StoryError> {
    let stories = state
        .stories
        .get_stories(params.tag.as_deref(), params.active.unwrap_or(true), params.before)
        .await?;
    Ok(success(stories))
}

/// GET /api/stories/all: every story, archived included. Admin only.
async fn list_all_stories(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Response, StoryError> {
    if !user.is_admin {
        return Err(StoryError::Unauthorized(
            "You are not authorized to perform this action".to_string(),
        ));
    }
    Ok(success(state.stories.get_all().await?))
}

/// POST /api/stories: the author identity comes from the session, never
/// from the request body.
async fn create_story(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<CreateStoryRequest>,
) -> Result<Response, StoryError> {
    let story = state
        .stories
        .create_new(NewStory {
            text: request.text,
            image: request.image,
            author_user_id: user.id,
            author_username: user.username,
            tags: request.tags,
        })
        .await?;
    Ok(success(story))
}

/// GET /api/stories/{id}: one story with comments expanded.
async fn get_story(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, StoryError> {
    let story = state.stories.get_story(&StoryId::new(id)).await?;
    Ok(success(story))
}

/// POST /api/stories/{id}/archive
async fn archive_story(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Response, StoryError> {
    let id = StoryId::new(id);
    require_story_owner(&state, &user, &id).await?;
    let story = state.stories.archive_story(&id).await?;
    Ok(success(story))
}

/// PUT /api/stories/{id}/tags
async fn update_tags(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(request): Json<UpdateTagsRequest>,
) -> Result<Response, StoryError> {
    let id = StoryId::new(id);
    require_story_owner(&state, &user, &id).await?;
    let story = state.stories.update_tags(&id, request.tags).await?;
    Ok(success(story))
}

/// PUT /api/stories/{id}/text: authorship is enforced by the repository.
async fn update_text(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(request): Json<UpdateTextRequest>,
) -> Result<Response, StoryError> {
    let story = state
        .stories
        .update_text(&StoryId::new(id), &user.username, request.text)
        .await?;
    Ok(success(story))
}

/// POST /api/stories/{id}/points: any logged-in user may vote.
async fn update_points(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
    Json(request): Json<PointsRequest>,
) -> Result<Response, StoryError> {
    let story = state
        .stories
        .update_points(&StoryId::new(id), request.delta)
        .await?;
    Ok(success(story))
}

/// POST /api/stories/{id}/comments: create a comment and link it.
async fn create_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(request): Json<CreateCommentRequest>,
) -> Result<Response, StoryError> {
    let comment = state
        .stories
        .create_comment(
            &StoryId::new(id),
            NewComment {
                text: request.text,
                author_user_id: user.id,
                author_username: user.username,
            },
        )
        .await?;
    Ok(success(comment))
}

/// DELETE /api/stories/{id}/comments/{comment_id}: only the commenter or
/// an admin may unlink; an already-absent reference is a no-op.
async fn remove_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((id, comment_id)): Path<(String, String)>,
) -> Result<Response, StoryError> {
    let comment_id = CommentId::new(comment_id);

    if let Some(comment) = state.stories.get_comment(&comment_id).await? {
        if comment.author_user_id != user.id && !user.is_admin {
            return Err(StoryError::Unauthorized(
                "You are not authorized to perform this action".to_string(),
            ));
        }
    }

    let story = state
        .stories
        .remove_comment(&StoryId::new(id), &comment_id)
        .await?;
    Ok(success(story))
}
