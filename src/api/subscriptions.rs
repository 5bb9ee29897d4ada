use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};

use super::{AppState, Pagination, require_id};
use crate::aggregate::Page;
use crate::envelope::{ApiResponse, Empty};
use crate::error::{ApiError, ApiResult};
use crate::guard::{Principal, is_owner};
use crate::store::relations::{SubscriptionMember, ToggleOutcome};

pub async fn toggle_subscription(
    State(state): State<AppState>,
    principal: Principal,
    Path(channel_id): Path<String>,
) -> ApiResult<Response> {
    let channel_id = require_id(&channel_id, "channel")?;
    if is_owner(Some(principal.id()), &channel_id) {
        return Err(ApiError::bad_request("You cannot subscribe to your own channel"));
    }

    let outcome = state
        .store
        .toggle_subscription(principal.id(), &channel_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Channel not found"))?;

    tracing::info!(
        subscriber = principal.id(),
        channel = %channel_id,
        subscribed = matches!(outcome, ToggleOutcome::Added(_)),
        "subscription toggled"
    );
    Ok(match outcome {
        ToggleOutcome::Added(subscription) => {
            ApiResponse::created(subscription, "Subscribed successfully").into_response()
        }
        ToggleOutcome::Removed => {
            ApiResponse::ok(Empty {}, "Unsubscribed successfully").into_response()
        }
    })
}

pub async fn channel_subscribers(
    State(state): State<AppState>,
    _principal: Principal,
    Path(channel_id): Path<String>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<ApiResponse<Page<SubscriptionMember>>> {
    let channel_id = require_id(&channel_id, "channel")?;
    let page = pagination.request()?;
    if !state.store.exists("users", &channel_id).await? {
        return Err(ApiError::not_found("Channel not found"));
    }
    let subscribers = state.store.channel_subscribers(&channel_id, page).await?;
    Ok(ApiResponse::ok(subscribers, "Subscribers fetched successfully"))
}

pub async fn subscribed_channels(
    State(state): State<AppState>,
    _principal: Principal,
    Path(subscriber_id): Path<String>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<ApiResponse<Page<SubscriptionMember>>> {
    let subscriber_id = require_id(&subscriber_id, "subscriber")?;
    let page = pagination.request()?;
    if !state.store.exists("users", &subscriber_id).await? {
        return Err(ApiError::not_found("User not found"));
    }
    let channels = state.store.subscribed_channels(&subscriber_id, page).await?;
    Ok(ApiResponse::ok(
        channels,
        "Subscribed channels fetched successfully",
    ))
}
