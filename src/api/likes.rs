use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};

use super::{AppState, Pagination, require_id};
use crate::aggregate::Page;
use crate::envelope::{ApiResponse, Empty};
use crate::error::{ApiError, ApiResult};
use crate::guard::Principal;
use crate::store::relations::{LikeTarget, ToggleOutcome};
use crate::store::videos::VideoSummary;

pub async fn toggle_video_like(
    State(state): State<AppState>,
    principal: Principal,
    Path(video_id): Path<String>,
) -> ApiResult<Response> {
    toggle(state, principal, LikeTarget::Video, &video_id).await
}

pub async fn toggle_comment_like(
    State(state): State<AppState>,
    principal: Principal,
    Path(comment_id): Path<String>,
) -> ApiResult<Response> {
    toggle(state, principal, LikeTarget::Comment, &comment_id).await
}

pub async fn toggle_tweet_like(
    State(state): State<AppState>,
    principal: Principal,
    Path(tweet_id): Path<String>,
) -> ApiResult<Response> {
    toggle(state, principal, LikeTarget::Tweet, &tweet_id).await
}

async fn toggle(
    state: AppState,
    principal: Principal,
    target: LikeTarget,
    raw_id: &str,
) -> ApiResult<Response> {
    let target_id = require_id(raw_id, target.kind())?;
    let outcome = state
        .store
        .toggle_like(principal.id(), target, &target_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("{} not found", capitalized(target.kind()))))?;

    tracing::info!(
        user = principal.id(),
        kind = target.kind(),
        target = %target_id,
        added = matches!(outcome, ToggleOutcome::Added(_)),
        "like toggled"
    );
    Ok(match outcome {
        ToggleOutcome::Added(like) => ApiResponse::created(like, "Like added").into_response(),
        ToggleOutcome::Removed => ApiResponse::ok(Empty {}, "Like removed").into_response(),
    })
}

fn capitalized(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

pub async fn liked_videos(
    State(state): State<AppState>,
    principal: Principal,
    Query(pagination): Query<Pagination>,
) -> ApiResult<ApiResponse<Page<VideoSummary>>> {
    let page = pagination.request()?;
    let videos = state.store.liked_videos(principal.id(), page).await?;
    Ok(ApiResponse::ok(videos, "Liked videos fetched successfully"))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;
    use crate::api::testing::{ApiTestContext, body_json, error_status};
    use crate::store::testing::video;

    #[tokio::test]
    async fn second_like_reports_removed() {
        let ctx = ApiTestContext::new().await;
        let owner = ctx.principal("owner").await;
        let fan = ctx.principal("fan").await;
        let id = video(ctx.store(), owner.id(), "clip").await.unwrap();

        let first = toggle_video_like(State(ctx.state.clone()), fan.clone(), Path(id.clone()))
            .await
            .unwrap();
        let (status, json) = body_json(first).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["message"], "Like added");
        assert_eq!(json["data"]["targetId"], id.as_str());

        let second = toggle_video_like(State(ctx.state.clone()), fan.clone(), Path(id.clone()))
            .await
            .unwrap();
        let (status, json) = body_json(second).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "Like removed");
        assert_eq!(json["data"], serde_json::json!({}));

        let liked = liked_videos(
            State(ctx.state.clone()),
            fan,
            Query(Pagination::default()),
        )
        .await
        .unwrap();
        assert_eq!(liked.data.total_docs, 0);
    }

    #[tokio::test]
    async fn drafts_cannot_be_liked_by_others() {
        let ctx = ApiTestContext::new().await;
        let owner = ctx.principal("owner").await;
        let fan = ctx.principal("fan").await;
        let id = video(ctx.store(), owner.id(), "draft").await.unwrap();
        ctx.store()
            .toggle_like(fan.id(), LikeTarget::Video, &id)
            .await
            .unwrap();
        ctx.store().toggle_publish(&id, owner.id()).await.unwrap().unwrap();

        let liked = liked_videos(
            State(ctx.state.clone()),
            fan.clone(),
            Query(Pagination::default()),
        )
        .await
        .unwrap();
        assert_eq!(liked.data.total_docs, 0);

        let denied = toggle_video_like(State(ctx.state.clone()), fan, Path(id.clone())).await;
        assert_eq!(error_status(denied).await, StatusCode::NOT_FOUND);

        let own = toggle_video_like(State(ctx.state.clone()), owner, Path(id))
            .await
            .unwrap();
        assert_eq!(own.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn toggles_validate_target() {
        let ctx = ApiTestContext::new().await;
        let fan = ctx.principal("fan").await;

        let malformed =
            toggle_tweet_like(State(ctx.state.clone()), fan.clone(), Path("nope".into())).await;
        assert_eq!(error_status(malformed).await, StatusCode::BAD_REQUEST);

        let missing = toggle_comment_like(
            State(ctx.state.clone()),
            fan,
            Path("0123456789abcdef01234567".into()),
        )
        .await;
        let err = missing.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Comment not found");
    }

    #[tokio::test]
    async fn tweet_and_comment_likes_toggle_independently() {
        let ctx = ApiTestContext::new().await;
        let owner = ctx.principal("owner").await;
        let fan = ctx.principal("fan").await;
        let tweet = ctx.store().create_tweet(owner.id(), "hi").await.unwrap();
        let id = video(ctx.store(), owner.id(), "clip").await.unwrap();
        let comment = ctx
            .store()
            .create_comment(&id, owner.id(), "pinned")
            .await
            .unwrap();

        let response = toggle_tweet_like(State(ctx.state.clone()), fan.clone(), Path(tweet.id))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let response = toggle_comment_like(State(ctx.state.clone()), fan, Path(comment.id))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            ctx.store()
                .count("SELECT COUNT(*) FROM likes", vec![])
                .await
                .unwrap(),
            2
        );
    }
}
