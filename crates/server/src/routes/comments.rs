use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    db::models::{CommentRecord, CommentView},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    services::thread::{self, count_forest, Thread},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/files/:file_id/comments",
            get(list_comments).post(create_comment),
        )
        .route("/comments/:id", axum::routing::delete(delete_comment))
        .route("/comments/:id/like", post(toggle_like))
        .route("/comments/:id/pin", put(toggle_pin))
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PinRequest {
    pub pinned: bool,
}

#[derive(Debug)]
pub struct CommentsListResponse {
    pub comments: Vec<Thread<CommentView>>,
    pub total: usize,
}

// Encoded by hand: reply chains can nest deeper than a serializer should
// recurse.
impl IntoResponse for CommentsListResponse {
    fn into_response(self) -> Response {
        let mut body = br#"{"comments":"#.to_vec();
        if let Err(e) = thread::write_json(&self.comments, &mut body) {
            return AppError::Internal(format!("Failed to encode comments: {e}")).into_response();
        }
        body.extend_from_slice(format!(r#","total":{}}}"#, self.total).as_bytes());

        ([(header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: usize,
}

#[derive(Debug, Serialize)]
pub struct LikeResponse {
    pub liked: bool,
}

#[derive(Debug, Serialize)]
pub struct PinResponse {
    pub pinned: bool,
}

// Only the comment's author or the owner of the file it belongs to may
// moderate it.
async fn moderated_comment(state: &AppState, id: &str, user: &AuthUser) -> Result<CommentRecord> {
    let comment = state
        .gateway
        .find(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;

    if comment.user_id == user.id {
        return Ok(comment);
    }

    let owner = state.gateway.file_owner(&comment.file_id).await?;
    if owner.as_deref() == Some(user.id.as_str()) {
        return Ok(comment);
    }

    Err(AppError::Forbidden(
        "Only the author or the file owner can do this".to_string(),
    ))
}

async fn list_comments(
    State(state): State<AppState>,
    user: AuthUser,
    Path(file_id): Path<String>,
) -> Result<CommentsListResponse> {
    let comments = state.gateway.list(&file_id, &user.id).await?;
    let total = count_forest(&comments);

    Ok(CommentsListResponse { comments, total })
}

async fn create_comment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(file_id): Path<String>,
    Json(body): Json<CreateCommentRequest>,
) -> Result<Json<CommentRecord>> {
    if body.content.trim().is_empty() {
        return Err(AppError::Validation(
            "Comment content is required".to_string(),
        ));
    }

    let comment = state
        .gateway
        .add(&file_id, &user.id, &body.content, body.parent_id.as_deref())
        .await?;

    Ok(Json(comment))
}

async fn delete_comment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>> {
    moderated_comment(&state, &id, &user).await?;

    let deleted = state.gateway.delete(&id).await?;

    Ok(Json(DeleteResponse { deleted }))
}

async fn toggle_like(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<LikeResponse>> {
    let liked = state.gateway.toggle_like(&id, &user.id).await?;

    Ok(Json(LikeResponse { liked }))
}

async fn toggle_pin(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<PinRequest>,
) -> Result<Json<PinResponse>> {
    let comment = moderated_comment(&state, &id, &user).await?;

    if comment.parent_id.is_some() {
        return Err(AppError::Validation(
            "Only top-level comments can be pinned".to_string(),
        ));
    }

    let pinned = state.gateway.toggle_pin(&id, body.pinned).await?;

    Ok(Json(PinResponse { pinned }))
}
