use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{into_forest, validate_new_comment, validate_parent, CommentGateway};
use crate::{
    db::{
        models::{AuthorProfile, CommentRecord, CommentView},
        Database,
    },
    error::{AppError, Result},
    services::thread::{self, Thread},
};

const COMMENT_COLUMNS: &str =
    "id, file_id, user_id, content, parent_id, created_at, is_deleted, is_pinned";

/// Comment store over the local SQLite mirror.
pub struct LocalGateway {
    db: Database,
}

impl LocalGateway {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[derive(sqlx::FromRow)]
struct CommentViewRow {
    id: String,
    file_id: String,
    user_id: String,
    content: String,
    parent_id: Option<String>,
    created_at: DateTime<Utc>,
    is_deleted: bool,
    is_pinned: bool,
    likes_count: i64,
    username: Option<String>,
    avatar_url: Option<String>,
    liked_by_viewer: bool,
}

impl From<CommentViewRow> for CommentView {
    fn from(row: CommentViewRow) -> Self {
        let author = row.username.map(|username| AuthorProfile {
            username,
            avatar_url: row.avatar_url,
        });
        CommentView {
            comment: CommentRecord {
                id: row.id,
                file_id: row.file_id,
                user_id: row.user_id,
                content: row.content,
                parent_id: row.parent_id,
                created_at: row.created_at,
                is_deleted: row.is_deleted,
                is_pinned: row.is_pinned,
            },
            author,
            likes_count: row.likes_count,
            liked_by_viewer: row.liked_by_viewer,
        }
    }
}

#[async_trait]
impl CommentGateway for LocalGateway {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn list(&self, file_id: &str, viewer_id: &str) -> Result<Vec<Thread<CommentView>>> {
        let rows = sqlx::query_as::<_, CommentViewRow>(
            r#"
            SELECT c.id, c.file_id, c.user_id, c.content, c.parent_id, c.created_at,
                   c.is_deleted, c.is_pinned, c.likes_count, p.username, p.avatar_url,
                   EXISTS (
                       SELECT 1 FROM comment_likes l
                       WHERE l.comment_id = c.id AND l.user_id = ?
                   ) AS liked_by_viewer
            FROM comments c
            LEFT JOIN profiles p ON p.id = c.user_id
            WHERE c.file_id = ? AND c.is_deleted = 0
            "#,
        )
        .bind(viewer_id)
        .bind(file_id)
        .fetch_all(&self.db.pool)
        .await?;

        let views: Vec<CommentView> = rows.into_iter().map(CommentView::from).collect();
        Ok(into_forest(views))
    }

    async fn add(
        &self,
        file_id: &str,
        author_id: &str,
        content: &str,
        parent_id: Option<&str>,
    ) -> Result<CommentRecord> {
        let content = validate_new_comment(file_id, author_id, content)?;

        if let Some(parent_id) = parent_id {
            let parent = self.find(parent_id).await?;
            validate_parent(parent.as_ref(), file_id)?;
        }

        let comment = CommentRecord {
            id: Uuid::new_v4().to_string(),
            file_id: file_id.to_string(),
            user_id: author_id.to_string(),
            content: content.to_string(),
            parent_id: parent_id.map(str::to_string),
            created_at: Utc::now(),
            is_deleted: false,
            is_pinned: false,
        };

        sqlx::query(
            "INSERT INTO comments (id, file_id, user_id, content, parent_id, created_at, likes_count, is_deleted, is_pinned) VALUES (?, ?, ?, ?, ?, ?, 0, 0, 0)",
        )
        .bind(&comment.id)
        .bind(&comment.file_id)
        .bind(&comment.user_id)
        .bind(&comment.content)
        .bind(&comment.parent_id)
        .bind(comment.created_at.to_rfc3339())
        .execute(&self.db.pool)
        .await?;

        tracing::debug!(comment_id = %comment.id, file_id, "Comment added");
        Ok(comment)
    }

    async fn delete(&self, comment_id: &str) -> Result<usize> {
        let mut tx = self.db.pool.begin().await?;

        let (file_id,) = sqlx::query_as::<_, (String,)>(
            "SELECT file_id FROM comments WHERE id = ? AND is_deleted = 0",
        )
        .bind(comment_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;

        let siblings = sqlx::query_as::<_, CommentRecord>(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE file_id = ? AND is_deleted = 0"
        ))
        .bind(&file_id)
        .fetch_all(&mut *tx)
        .await?;

        let doomed = thread::descendants(&siblings, comment_id);
        for id in &doomed {
            sqlx::query("DELETE FROM comment_likes WHERE comment_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM comments WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        tracing::info!(comment_id, removed = doomed.len(), "Comment thread deleted");
        Ok(doomed.len())
    }

    async fn toggle_like(&self, comment_id: &str, viewer_id: &str) -> Result<bool> {
        let mut tx = self.db.pool.begin().await?;

        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM comments WHERE id = ? AND is_deleted = 0",
        )
        .bind(comment_id)
        .fetch_one(&mut *tx)
        .await?;
        if exists == 0 {
            return Err(AppError::NotFound("Comment not found".to_string()));
        }

        let removed = sqlx::query("DELETE FROM comment_likes WHERE comment_id = ? AND user_id = ?")
            .bind(comment_id)
            .bind(viewer_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let liked = if removed > 0 {
            sqlx::query("UPDATE comments SET likes_count = MAX(likes_count - 1, 0) WHERE id = ?")
                .bind(comment_id)
                .execute(&mut *tx)
                .await?;
            false
        } else {
            sqlx::query("INSERT INTO comment_likes (user_id, comment_id, created_at) VALUES (?, ?, ?)")
                .bind(viewer_id)
                .bind(comment_id)
                .bind(Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await?;
            sqlx::query("UPDATE comments SET likes_count = likes_count + 1 WHERE id = ?")
                .bind(comment_id)
                .execute(&mut *tx)
                .await?;
            true
        };

        tx.commit().await?;

        tracing::debug!(comment_id, viewer_id, liked, "Comment like toggled");
        Ok(liked)
    }

    async fn toggle_pin(&self, comment_id: &str, pinned: bool) -> Result<bool> {
        let updated = sqlx::query("UPDATE comments SET is_pinned = ? WHERE id = ? AND is_deleted = 0")
            .bind(pinned)
            .bind(comment_id)
            .execute(&self.db.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(AppError::NotFound("Comment not found".to_string()));
        }

        tracing::debug!(comment_id, pinned, "Comment pin toggled");
        Ok(pinned)
    }

    async fn find(&self, comment_id: &str) -> Result<Option<CommentRecord>> {
        let comment = sqlx::query_as::<_, CommentRecord>(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ? AND is_deleted = 0"
        ))
        .bind(comment_id)
        .fetch_optional(&self.db.pool)
        .await?;

        Ok(comment)
    }

    async fn file_owner(&self, file_id: &str) -> Result<Option<String>> {
        let owner = sqlx::query_scalar::<_, String>("SELECT user_id FROM files WHERE id = ?")
            .bind(file_id)
            .fetch_optional(&self.db.pool)
            .await?;

        Ok(owner)
    }
}
