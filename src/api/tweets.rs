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
use crate::store::tweets::{TweetRecord, TweetView};

#[derive(Debug, Deserialize)]
pub struct TweetBody {
    pub content: Option<String>,
}

pub async fn create_tweet(
    State(state): State<AppState>,
    principal: Principal,
    body: Result<Json<TweetBody>, JsonRejection>,
) -> ApiResult<ApiResponse<TweetRecord>> {
    let Json(body) = body?;
    let content = require_text(body.content.as_deref(), "Tweet content is required")?;
    let tweet = state.store.create_tweet(principal.id(), &content).await?;
    tracing::info!(tweet = %tweet.id, "tweet created");
    Ok(ApiResponse::created(tweet, "Tweet created successfully"))
}

pub async fn user_tweets(
    State(state): State<AppState>,
    principal: Principal,
    Path(user_id): Path<String>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<ApiResponse<Page<TweetView>>> {
    let user_id = require_id(&user_id, "user")?;
    let page = pagination.request()?;
    if !state.store.exists("users", &user_id).await? {
        return Err(ApiError::not_found("User not found"));
    }
    let tweets = state
        .store
        .user_tweets(&user_id, principal.id(), page)
        .await?;
    Ok(ApiResponse::ok(tweets, "Tweets fetched successfully"))
}

pub async fn update_tweet(
    State(state): State<AppState>,
    principal: Principal,
    Path(tweet_id): Path<String>,
    body: Result<Json<TweetBody>, JsonRejection>,
) -> ApiResult<ApiResponse<TweetRecord>> {
    let tweet_id = require_id(&tweet_id, "tweet")?;
    let Json(body) = body?;
    let content = require_text(body.content.as_deref(), "Tweet content is required")?;

    let existing = state
        .store
        .get_tweet(&tweet_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Tweet not found"))?;
    ensure_owner(&principal, &existing.owner, "update this tweet")?;

    let tweet = state
        .store
        .update_tweet(&tweet_id, principal.id(), &content)
        .await?
        .ok_or_else(|| ApiError::not_found("Tweet not found"))?;
    tracing::info!(tweet = %tweet.id, "tweet updated");
    Ok(ApiResponse::ok(tweet, "Tweet updated successfully"))
}

pub async fn delete_tweet(
    State(state): State<AppState>,
    principal: Principal,
    Path(tweet_id): Path<String>,
) -> ApiResult<ApiResponse<Empty>> {
    let tweet_id = require_id(&tweet_id, "tweet")?;
    let existing = state
        .store
        .get_tweet(&tweet_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Tweet not found"))?;
    ensure_owner(&principal, &existing.owner, "delete this tweet")?;

    if !state.store.delete_tweet(&tweet_id, principal.id()).await? {
        return Err(ApiError::not_found("Tweet not found"));
    }
    tracing::info!(tweet = %tweet_id, "tweet deleted");
    Ok(ApiResponse::ok(Empty {}, "Tweet deleted successfully"))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    use super::*;
    use crate::api::testing::{ApiTestContext, PRINCIPAL_HEADER, body_json, error_status};

    #[tokio::test]
    async fn create_and_list_over_http() {
        let ctx = ApiTestContext::new().await;
        let alice = ctx.principal("alice").await;

        let response = ctx
            .router()
            .oneshot(
                Request::post("/api/v1/tweets")
                    .header(PRINCIPAL_HEADER, alice.id())
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"content":"first post"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let (status, json) = body_json(response).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["data"]["content"], "first post");

        let response = ctx
            .router()
            .oneshot(
                Request::get(format!("/api/v1/tweets/user/{}", alice.id()))
                    .header(PRINCIPAL_HEADER, alice.id())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let (status, json) = body_json(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["totalDocs"], 1);
        assert_eq!(json["data"]["docs"][0]["owner"]["username"], "alice");
        assert_eq!(json["data"]["docs"][0]["likesCount"], 0);
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let ctx = ApiTestContext::new().await;
        let alice = ctx.principal("alice").await;
        let response = ctx
            .router()
            .oneshot(
                Request::post("/api/v1/tweets")
                    .header(PRINCIPAL_HEADER, alice.id())
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        let (status, json) = body_json(response).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn non_owner_cannot_touch_tweet() {
        let ctx = ApiTestContext::new().await;
        let alice = ctx.principal("alice").await;
        let bob = ctx.principal("bob").await;
        let tweet = ctx.store().create_tweet(alice.id(), "mine").await.unwrap();

        let denied = update_tweet(
            State(ctx.state.clone()),
            bob.clone(),
            Path(tweet.id.clone()),
            Ok(Json(TweetBody {
                content: Some("yours now".into()),
            })),
        )
        .await;
        assert_eq!(error_status(denied).await, StatusCode::FORBIDDEN);
        let denied = delete_tweet(State(ctx.state.clone()), bob, Path(tweet.id.clone())).await;
        assert_eq!(error_status(denied).await, StatusCode::FORBIDDEN);
        assert_eq!(
            ctx.store().get_tweet(&tweet.id).await.unwrap().unwrap().content,
            "mine"
        );

        let missing = user_tweets(
            State(ctx.state.clone()),
            alice,
            Path("0123456789abcdef01234567".into()),
            Query(Pagination::default()),
        )
        .await;
        assert_eq!(error_status(missing).await, StatusCode::NOT_FOUND);
    }
}
