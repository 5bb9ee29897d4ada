use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use serde::Deserialize;

use super::{AppState, require_id, require_text};
use crate::envelope::{ApiResponse, Empty};
use crate::error::{ApiError, ApiResult};
use crate::guard::{Principal, ensure_owner};
use crate::store::playlists::{PlaylistDetail, PlaylistRecord, PlaylistSummary};

#[derive(Debug, Deserialize)]
pub struct PlaylistBody {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl PlaylistBody {
    fn validated(&self) -> ApiResult<(String, String)> {
        Ok((
            require_text(self.name.as_deref(), "Playlist name is required")?,
            require_text(
                self.description.as_deref(),
                "Playlist description is required",
            )?,
        ))
    }
}

pub async fn create_playlist(
    State(state): State<AppState>,
    principal: Principal,
    body: Result<Json<PlaylistBody>, JsonRejection>,
) -> ApiResult<ApiResponse<PlaylistRecord>> {
    let Json(body) = body?;
    let (name, description) = body.validated()?;
    let playlist = state
        .store
        .create_playlist(principal.id(), &name, &description)
        .await?;
    tracing::info!(playlist = %playlist.id, "playlist created");
    Ok(ApiResponse::created(playlist, "Playlist created successfully"))
}

pub async fn user_playlists(
    State(state): State<AppState>,
    principal: Principal,
    Path(user_id): Path<String>,
) -> ApiResult<ApiResponse<Vec<PlaylistSummary>>> {
    let user_id = require_id(&user_id, "user")?;
    let playlists = state.store.user_playlists(&user_id, principal.id()).await?;
    Ok(ApiResponse::ok(
        playlists,
        "User playlists retrieved successfully",
    ))
}

pub async fn get_playlist(
    State(state): State<AppState>,
    principal: Principal,
    Path(playlist_id): Path<String>,
) -> ApiResult<ApiResponse<PlaylistDetail>> {
    let playlist_id = require_id(&playlist_id, "playlist")?;
    let playlist = state
        .store
        .playlist_detail(&playlist_id, principal.id())
        .await?
        .ok_or_else(|| ApiError::not_found("Playlist not found"))?;
    Ok(ApiResponse::ok(playlist, "Playlist fetched successfully"))
}

pub async fn update_playlist(
    State(state): State<AppState>,
    principal: Principal,
    Path(playlist_id): Path<String>,
    body: Result<Json<PlaylistBody>, JsonRejection>,
) -> ApiResult<ApiResponse<PlaylistRecord>> {
    let playlist_id = require_id(&playlist_id, "playlist")?;
    let Json(body) = body?;
    let (name, description) = body.validated()?;

    let existing = owned_playlist(&state, &principal, &playlist_id, "update this playlist").await?;
    let playlist = state
        .store
        .update_playlist(&existing.id, principal.id(), &name, &description)
        .await?
        .ok_or_else(|| ApiError::not_found("Playlist not found"))?;
    tracing::info!(playlist = %playlist.id, "playlist updated");
    Ok(ApiResponse::ok(playlist, "Playlist updated successfully"))
}

pub async fn delete_playlist(
    State(state): State<AppState>,
    principal: Principal,
    Path(playlist_id): Path<String>,
) -> ApiResult<ApiResponse<Empty>> {
    let playlist_id = require_id(&playlist_id, "playlist")?;
    owned_playlist(&state, &principal, &playlist_id, "delete this playlist").await?;
    if !state.store.delete_playlist(&playlist_id, principal.id()).await? {
        return Err(ApiError::not_found("Playlist not found"));
    }
    tracing::info!(playlist = %playlist_id, "playlist deleted");
    Ok(ApiResponse::ok(Empty {}, "Playlist deleted successfully"))
}

pub async fn add_video(
    State(state): State<AppState>,
    principal: Principal,
    Path((video_id, playlist_id)): Path<(String, String)>,
) -> ApiResult<ApiResponse<PlaylistRecord>> {
    let (video_id, playlist_id) = membership_ids(&video_id, &playlist_id)?;
    if !state.store.video_visible_to(&video_id, principal.id()).await? {
        return Err(ApiError::not_found("Video not found"));
    }
    owned_playlist(
        &state,
        &principal,
        &playlist_id,
        "add videos to this playlist",
    )
    .await?;

    let playlist = state
        .store
        .add_to_playlist(&playlist_id, principal.id(), &video_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Playlist not found"))?;
    tracing::info!(playlist = %playlist_id, video = %video_id, "video added to playlist");
    Ok(ApiResponse::ok(
        playlist,
        "Video added to playlist successfully",
    ))
}

pub async fn remove_video(
    State(state): State<AppState>,
    principal: Principal,
    Path((video_id, playlist_id)): Path<(String, String)>,
) -> ApiResult<ApiResponse<PlaylistRecord>> {
    let (video_id, playlist_id) = membership_ids(&video_id, &playlist_id)?;
    owned_playlist(
        &state,
        &principal,
        &playlist_id,
        "remove videos from this playlist",
    )
    .await?;

    let playlist = state
        .store
        .remove_from_playlist(&playlist_id, principal.id(), &video_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Playlist not found"))?;
    tracing::info!(playlist = %playlist_id, video = %video_id, "video removed from playlist");
    Ok(ApiResponse::ok(
        playlist,
        "Video removed from playlist successfully",
    ))
}

fn membership_ids(video_id: &str, playlist_id: &str) -> ApiResult<(String, String)> {
    Ok((
        require_id(video_id, "video")?,
        require_id(playlist_id, "playlist")?,
    ))
}

/// Existence first, then ownership.
async fn owned_playlist(
    state: &AppState,
    principal: &Principal,
    playlist_id: &str,
    action: &str,
) -> ApiResult<PlaylistRecord> {
    let playlist = state
        .store
        .get_playlist(playlist_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Playlist not found"))?;
    ensure_owner(principal, &playlist.owner, action)?;
    Ok(playlist)
}
