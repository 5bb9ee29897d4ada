use axum::extract::State;

use super::AppState;
use crate::envelope::ApiResponse;
use crate::error::ApiResult;
use crate::guard::Principal;
use crate::store::stats::ChannelStats;
use crate::store::videos::VideoView;

pub async fn channel_stats(
    State(state): State<AppState>,
    principal: Principal,
) -> ApiResult<ApiResponse<ChannelStats>> {
    let stats = state.store.channel_stats(principal.id()).await?;
    Ok(ApiResponse::ok(stats, "Channel stats fetched successfully"))
}

/// Drafts included; the dashboard is the owner's own view.
pub async fn channel_videos(
    State(state): State<AppState>,
    principal: Principal,
) -> ApiResult<ApiResponse<Vec<VideoView>>> {
    let videos = state.store.channel_videos(principal.id()).await?;
    Ok(ApiResponse::ok(videos, "Channel videos fetched successfully"))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::api::testing::{ApiTestContext, PRINCIPAL_HEADER, body_json};
    use crate::store::relations::LikeTarget;
    use crate::store::testing::video;

    #[tokio::test]
    async fn stats_reflect_views_likes_and_subscribers() {
        let ctx = ApiTestContext::new().await;
        let creator = ctx.principal("creator").await;
        let fan = ctx.principal("fan").await;
        let clip = video(ctx.store(), creator.id(), "clip").await.unwrap();
        ctx.store().record_view(&clip, fan.id()).await.unwrap();
        ctx.store()
            .toggle_like(fan.id(), LikeTarget::Video, &clip)
            .await
            .unwrap();
        ctx.store()
            .toggle_subscription(fan.id(), creator.id())
            .await
            .unwrap();

        let response = ctx
            .router()
            .oneshot(
                Request::get("/api/v1/dashboard/stats")
                    .header(PRINCIPAL_HEADER, creator.id())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let (status, json) = body_json(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json["data"],
            serde_json::json!({
                "totalVideos": 1,
                "totalSubscribers": 1,
                "totalViews": 1,
                "totalLikes": 1,
            })
        );
    }

    #[tokio::test]
    async fn channel_videos_include_drafts() {
        let ctx = ApiTestContext::new().await;
        let creator = ctx.principal("creator").await;
        let clip = video(ctx.store(), creator.id(), "clip").await.unwrap();
        ctx.store()
            .toggle_publish(&clip, creator.id())
            .await
            .unwrap()
            .unwrap();

        let videos = channel_videos(State(ctx.state.clone()), creator).await.unwrap();
        assert_eq!(videos.data.len(), 1);
        assert!(!videos.data[0].video.is_published);
    }
}
