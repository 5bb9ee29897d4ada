#![forbid(unsafe_code)]

//! HTTP surface. Every controller follows the same shape: validate input,
//! look the document up, check ownership, mutate or aggregate, and answer
//! with the response envelope.

pub mod comments;
pub mod dashboard;
pub mod likes;
pub mod playlists;
pub mod subscriptions;
pub mod tweets;
pub mod upload;
pub mod users;
pub mod videos;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tokio_util::io::ReaderStream;

use crate::aggregate::PageRequest;
use crate::envelope::ApiResponse;
use crate::error::{ApiError, ApiResult};
use crate::ids::parse_id;
use crate::media::{LocalMediaHost, MediaHost, MediaKind, purge};
use crate::store::Store;
use crate::store::media_queue::PendingDeletion;

/// Shared handles for every request.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub media: Arc<dyn MediaHost>,
    /// Files served under `/media` by the local host.
    pub media_files: Arc<LocalMediaHost>,
    pub principal_header: HeaderName,
}

impl AppState {
    /// Best-effort removal of queued media after a committed write. Anything
    /// that fails stays queued for `vidtube sweep-media`.
    pub(crate) async fn purge_media(&self, entries: &[PendingDeletion]) {
        if entries.is_empty() {
            return;
        }
        let report = purge(&self.store, self.media.as_ref(), entries).await;
        if report.failed > 0 {
            tracing::warn!(
                deleted = report.deleted,
                failed = report.failed,
                "some media deletions were deferred"
            );
        }
    }

    /// Removes uploads that never made it into a committed row.
    pub(crate) async fn discard_uploads(&self, uploads: &[(&str, MediaKind)]) {
        for &(url, kind) in uploads {
            if let Err(err) = self.media.delete(url, kind).await {
                tracing::warn!(error = ?err, %url, "failed to remove orphaned upload");
            }
        }
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let api = Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/users/me", get(users::current_user).patch(users::update_account))
        .route("/users/me/avatar", patch(users::update_avatar))
        .route("/users/me/cover-image", patch(users::update_cover_image))
        .route("/users/history", get(users::watch_history))
        .route("/users/c/{username}", get(users::channel_profile))
        .route("/videos", get(videos::list_videos).post(videos::publish_video))
        .route(
            "/videos/{video_id}",
            get(videos::get_video)
                .patch(videos::update_video)
                .delete(videos::delete_video),
        )
        .route(
            "/videos/toggle/publish/{video_id}",
            patch(videos::toggle_publish),
        )
        .route(
            "/comments/{video_id}",
            get(comments::list_comments).post(comments::add_comment),
        )
        .route(
            "/comments/c/{comment_id}",
            patch(comments::update_comment).delete(comments::delete_comment),
        )
        .route("/tweets", post(tweets::create_tweet))
        .route("/tweets/user/{user_id}", get(tweets::user_tweets))
        .route(
            "/tweets/{tweet_id}",
            patch(tweets::update_tweet).delete(tweets::delete_tweet),
        )
        .route("/likes/toggle/v/{video_id}", post(likes::toggle_video_like))
        .route("/likes/toggle/c/{comment_id}", post(likes::toggle_comment_like))
        .route("/likes/toggle/t/{tweet_id}", post(likes::toggle_tweet_like))
        .route("/likes/videos", get(likes::liked_videos))
        .route(
            "/subscriptions/c/{channel_id}",
            get(subscriptions::channel_subscribers).post(subscriptions::toggle_subscription),
        )
        .route(
            "/subscriptions/u/{subscriber_id}",
            get(subscriptions::subscribed_channels),
        )
        .route("/playlists", post(playlists::create_playlist))
        .route("/playlists/user/{user_id}", get(playlists::user_playlists))
        .route(
            "/playlists/{playlist_id}",
            get(playlists::get_playlist)
                .patch(playlists::update_playlist)
                .delete(playlists::delete_playlist),
        )
        .route(
            "/playlists/add/{video_id}/{playlist_id}",
            patch(playlists::add_video),
        )
        .route(
            "/playlists/remove/{video_id}/{playlist_id}",
            patch(playlists::remove_video),
        )
        .route("/dashboard/stats", get(dashboard::channel_stats))
        .route("/dashboard/videos", get(dashboard::channel_videos));

    Router::new()
        .nest("/api/v1", api)
        .route("/media/{kind}/{file}", get(serve_media))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

async fn not_found() -> ApiError {
    ApiError::not_found("endpoint not found")
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

async fn healthcheck() -> ApiResponse<Health> {
    ApiResponse::ok(Health { status: "OK" }, "Service is healthy")
}

/// `page`/`limit` query parameters. Kept as raw strings so malformed values
/// surface as `BadRequest` in the envelope instead of an extractor rejection.
#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl Pagination {
    pub fn request(&self) -> ApiResult<PageRequest> {
        PageRequest::parse(self.page.as_deref(), self.limit.as_deref()).map_err(ApiError::BadRequest)
    }
}

/// Validates an identifier taken from the path or query string.
pub(crate) fn require_id(raw: &str, label: &str) -> ApiResult<String> {
    parse_id(raw).ok_or_else(|| ApiError::bad_request(format!("Invalid {label} ID")))
}

/// Trimmed, non-empty text or a `BadRequest` with `message`.
pub(crate) fn require_text(value: Option<&str>, message: &str) -> ApiResult<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_request(message))
}

/// Optional text field: blank counts as absent.
pub(crate) fn optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

async fn serve_media(
    State(state): State<AppState>,
    Path((kind, file)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let kind = MediaKind::parse(&kind).ok_or_else(|| ApiError::not_found("file not found"))?;
    let path = state
        .media_files
        .resolve(kind, &file)
        .ok_or_else(|| ApiError::bad_request("invalid file name"))?;
    stream_file(path, &headers).await
}

/// Streams a file from disk, honouring single `Range` requests.
async fn stream_file(path: PathBuf, headers: &HeaderMap) -> ApiResult<Response> {
    let mut file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let size = file
        .metadata()
        .await
        .map_err(|_| ApiError::not_found("file not found"))?
        .len();

    let range = headers
        .get(header::RANGE)
        .and_then(|value| parse_range_header(value, size));

    let mut response = match range {
        Some((start, _)) if start >= size => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            insert_header(&mut response, header::CONTENT_RANGE, format!("bytes */{size}"));
            response
        }
        Some((start, end)) => {
            let end = end.min(size.saturating_sub(1));
            let length = end - start + 1;
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|_| ApiError::not_found("file not found"))?;
            let mut response = Body::from_stream(ReaderStream::new(file.take(length))).into_response();
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            insert_header(
                &mut response,
                header::CONTENT_RANGE,
                format!("bytes {start}-{end}/{size}"),
            );
            insert_header(&mut response, header::CONTENT_LENGTH, length.to_string());
            response
        }
        None => Body::from_stream(ReaderStream::new(file)).into_response(),
    };

    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(mime) = MimeGuess::from_path(&path).first() {
        insert_header(&mut response, header::CONTENT_TYPE, mime.to_string());
    }
    Ok(response)
}

fn insert_header(response: &mut Response, name: HeaderName, value: String) {
    if let Ok(value) = HeaderValue::from_str(&value) {
        response.headers_mut().insert(name, value);
    }
}

fn parse_range_header(value: &HeaderValue, size: u64) -> Option<(u64, u64)> {
    let value = value.to_str().ok()?.trim();
    let range = value.strip_prefix("bytes=")?.trim();
    let (start_str, end_str) = range.split_once('-')?;

    if start_str.is_empty() {
        // "-N" asks for the last N bytes.
        let suffix_len: u64 = end_str.parse().ok()?;
        if suffix_len == 0 {
            return None;
        }
        return Some((size.saturating_sub(suffix_len), size.saturating_sub(1)));
    }

    let start: u64 = start_str.parse().ok()?;
    let end = if end_str.is_empty() {
        size.saturating_sub(1)
    } else {
        end_str.parse().ok()?
    };
    (end >= start).then_some((start, end))
}
