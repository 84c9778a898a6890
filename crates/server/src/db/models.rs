use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::thread::Threaded;

/// A comment as persisted, one row per comment regardless of nesting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CommentRecord {
    pub id: String,
    pub file_id: String,
    pub user_id: String,
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub is_pinned: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorProfile {
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// A comment with its read-time joins: author profile, like count and
/// whether the requesting viewer liked it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentView {
    #[serde(flatten)]
    pub comment: CommentRecord,
    pub author: Option<AuthorProfile>,
    pub likes_count: i64,
    pub liked_by_viewer: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Profile {
    pub id: String,
    pub username: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct File {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl Threaded for CommentRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn is_pinned(&self) -> bool {
        self.is_pinned
    }
}

impl Threaded for CommentView {
    fn id(&self) -> &str {
        self.comment.id()
    }

    fn parent_id(&self) -> Option<&str> {
        self.comment.parent_id()
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.comment.created_at()
    }

    fn is_pinned(&self) -> bool {
        self.comment.is_pinned()
    }
}
