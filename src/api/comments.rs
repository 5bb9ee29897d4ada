use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
};
use serde::Deserialize;

use super::{AppState, Pagination, require_id, require_text};
use crate::aggregate::Page;
use crate::envelope::{ApiResponse, Empty};
use crate::error::{ApiError, ApiResult};
use crate::guard::{Principal, ensure_owner};
use crate::store::comments::{CommentRecord, CommentView};

#[derive(Debug, Deserialize)]
pub struct CommentBody {
    pub content: Option<String>,
}

pub async fn list_comments(
    State(state): State<AppState>,
    principal: Principal,
    Path(video_id): Path<String>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<ApiResponse<Page<CommentView>>> {
    let video_id = require_id(&video_id, "video")?;
    let page = pagination.request()?;
    if !state.store.video_visible_to(&video_id, principal.id()).await? {
        return Err(ApiError::not_found("Video not found"));
    }
    let comments = state
        .store
        .video_comments(&video_id, principal.id(), page)
        .await?;
    Ok(ApiResponse::ok(comments, "Comments fetched successfully"))
}

pub async fn add_comment(
    State(state): State<AppState>,
    principal: Principal,
    Path(video_id): Path<String>,
    body: Result<Json<CommentBody>, JsonRejection>,
) -> ApiResult<ApiResponse<CommentRecord>> {
    let video_id = require_id(&video_id, "video")?;
    let Json(body) = body?;
    let content = require_text(body.content.as_deref(), "Content is required")?;
    if !state.store.video_visible_to(&video_id, principal.id()).await? {
        return Err(ApiError::not_found("Video not found"));
    }

    let comment = state
        .store
        .create_comment(&video_id, principal.id(), &content)
        .await?;
    tracing::info!(comment = %comment.id, video = %video_id, "comment added");
    Ok(ApiResponse::created(comment, "Comment added successfully"))
}

pub async fn update_comment(
    State(state): State<AppState>,
    principal: Principal,
    Path(comment_id): Path<String>,
    body: Result<Json<CommentBody>, JsonRejection>,
) -> ApiResult<ApiResponse<CommentRecord>> {
    let comment_id = require_id(&comment_id, "comment")?;
    let Json(body) = body?;
    let content = require_text(body.content.as_deref(), "Content is required")?;

    let existing = state
        .store
        .get_comment(&comment_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Comment not found"))?;
    ensure_owner(&principal, &existing.owner, "edit this comment")?;

    let comment = state
        .store
        .update_comment(&comment_id, principal.id(), &content)
        .await?
        .ok_or_else(|| ApiError::not_found("Comment not found"))?;
    tracing::info!(comment = %comment.id, "comment updated");
    Ok(ApiResponse::ok(comment, "Comment updated successfully"))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    principal: Principal,
    Path(comment_id): Path<String>,
) -> ApiResult<ApiResponse<Empty>> {
    let comment_id = require_id(&comment_id, "comment")?;
    let existing = state
        .store
        .get_comment(&comment_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Comment not found"))?;
    ensure_owner(&principal, &existing.owner, "delete this comment")?;

    if !state.store.delete_comment(&comment_id, principal.id()).await? {
        return Err(ApiError::not_found("Comment not found"));
    }
    tracing::info!(comment = %comment_id, "comment deleted");
    Ok(ApiResponse::ok(Empty {}, "Comment deleted successfully"))
}
