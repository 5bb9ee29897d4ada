use axum::{
    Json,
    extract::{Multipart, Path, Query, State, rejection::JsonRejection, multipart::MultipartRejection},
};
use serde::Deserialize;

use super::upload::{MultipartForm, upload_staged};
use super::{AppState, Pagination, require_text};
use crate::aggregate::Page;
use crate::envelope::ApiResponse;
use crate::error::{ApiError, ApiResult};
use crate::guard::Principal;
use crate::media::MediaKind;
use crate::store::users::{AccountChange, ChannelProfile, ProfileImage, UserRecord};
use crate::store::videos::VideoSummary;

pub async fn current_user(principal: Principal) -> ApiResponse<UserRecord> {
    ApiResponse::ok(principal.user, "User fetched successfully")
}

#[derive(Debug, Deserialize)]
pub struct AccountUpdate {
    pub fullname: Option<String>,
    pub email: Option<String>,
}

pub async fn update_account(
    State(state): State<AppState>,
    principal: Principal,
    body: Result<Json<AccountUpdate>, JsonRejection>,
) -> ApiResult<ApiResponse<UserRecord>> {
    let Json(body) = body?;
    let fullname = require_text(body.fullname.as_deref(), "All fields are required")?;
    let email = require_text(body.email.as_deref(), "All fields are required")?;
    if !email.contains('@') {
        return Err(ApiError::bad_request("Invalid email address"));
    }

    let user = match state
        .store
        .update_account(principal.id(), &fullname, &email)
        .await?
    {
        AccountChange::Updated(user) => user,
        AccountChange::EmailTaken => return Err(ApiError::conflict("Email is already in use")),
        AccountChange::Missing => return Err(ApiError::not_found("User not found")),
    };
    tracing::info!(user = %user.id, "account details updated");
    Ok(ApiResponse::ok(user, "Account details updated successfully"))
}

pub async fn update_avatar(
    State(state): State<AppState>,
    principal: Principal,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<ApiResponse<UserRecord>> {
    replace_image(state, principal, multipart?, ProfileImage::Avatar).await
}

pub async fn update_cover_image(
    State(state): State<AppState>,
    principal: Principal,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<ApiResponse<UserRecord>> {
    replace_image(state, principal, multipart?, ProfileImage::CoverImage).await
}

async fn replace_image(
    state: AppState,
    principal: Principal,
    multipart: Multipart,
    image: ProfileImage,
) -> ApiResult<ApiResponse<UserRecord>> {
    let (field, label) = match image {
        ProfileImage::Avatar => ("avatar", "Avatar"),
        ProfileImage::CoverImage => ("coverImage", "Cover image"),
    };
    let mut form = MultipartForm::read(multipart, &[field]).await?;
    let file = form
        .take_file(field)
        .ok_or_else(|| ApiError::bad_request(format!("{label} file is missing")))?;
    file.ensure_kind(MediaKind::Image, field)?;

    let uploaded = upload_staged(&state, &file, MediaKind::Image).await?;
    let (user, previous) = state
        .store
        .replace_profile_image(principal.id(), image, &uploaded.url)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    state.purge_media(previous.as_slice()).await;

    tracing::info!(user = %user.id, field, "profile image replaced");
    Ok(ApiResponse::ok(user, format!("{label} updated successfully")))
}

pub async fn watch_history(
    State(state): State<AppState>,
    principal: Principal,
    Query(pagination): Query<Pagination>,
) -> ApiResult<ApiResponse<Page<VideoSummary>>> {
    let page = pagination.request()?;
    let history = state.store.watch_history(principal.id(), page).await?;
    Ok(ApiResponse::ok(history, "Watch history fetched successfully"))
}

pub async fn channel_profile(
    State(state): State<AppState>,
    principal: Principal,
    Path(username): Path<String>,
) -> ApiResult<ApiResponse<ChannelProfile>> {
    let username = require_text(Some(&username), "Username is missing")?;
    let profile = state
        .store
        .channel_profile(&username, principal.id())
        .await?
        .ok_or_else(|| ApiError::not_found("Channel does not exist"))?;
    Ok(ApiResponse::ok(profile, "User channel fetched successfully"))
}
