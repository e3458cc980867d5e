pub mod domain;
pub mod repository;
pub mod store;

pub use domain::{
    Comment, CommentId, NewComment, NewStory, Story, StoryId, StoryQuery, StoryWithComments,
};
pub use repository::{StoryError, StoryRepository};
