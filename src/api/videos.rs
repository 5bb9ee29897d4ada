use axum::extract::{Multipart, Path, Query, State, multipart::MultipartRejection};
use serde::Deserialize;

use super::upload::{MultipartForm, upload_staged};
use super::{AppState, Pagination, optional_text, require_id, require_text};
use crate::aggregate::{Page, Sort};
use crate::envelope::{ApiResponse, Empty};
use crate::error::{ApiError, ApiResult};
use crate::guard::{Principal, ensure_owner, is_owner};
use crate::media::MediaKind;
use crate::store::videos::{
    NewVideo, VIDEO_SORT_FIELDS, VideoPatch, VideoQuery, VideoRecord, VideoView,
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoListParams {
    #[serde(flatten)]
    pub pagination: Pagination,
    pub query: Option<String>,
    pub sort_by: Option<String>,
    pub sort_type: Option<String>,
    pub user_id: Option<String>,
}

pub async fn list_videos(
    State(state): State<AppState>,
    principal: Principal,
    Query(params): Query<VideoListParams>,
) -> ApiResult<ApiResponse<Page<VideoView>>> {
    let page = params.pagination.request()?;
    let owner = match optional_text(params.user_id.as_deref()) {
        Some(raw) => Some(require_id(&raw, "user")?),
        None => None,
    };
    let sort = Sort::parse(
        params.sort_by.as_deref(),
        params.sort_type.as_deref(),
        VIDEO_SORT_FIELDS,
    )
    .map_err(ApiError::BadRequest)?;

    let query = VideoQuery {
        search: optional_text(params.query.as_deref()),
        owner,
        sort,
        published_only: true,
    };
    let videos = state.store.list_videos(&query, principal.id(), page).await?;
    Ok(ApiResponse::ok(videos, "Videos fetched successfully"))
}

pub async fn publish_video(
    State(state): State<AppState>,
    principal: Principal,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<ApiResponse<VideoRecord>> {
    let mut form = MultipartForm::read(multipart?, &["videoFile", "thumbnail"]).await?;
    let title = require_text(form.text("title"), "Title and description are required")?;
    let description = require_text(
        form.text("description"),
        "Title and description are required",
    )?;
    let video_file = form
        .take_file("videoFile")
        .ok_or_else(|| ApiError::bad_request("Video file is required"))?;
    let thumbnail = form
        .take_file("thumbnail")
        .ok_or_else(|| ApiError::bad_request("Thumbnail is required"))?;
    video_file.ensure_kind(MediaKind::Video, "videoFile")?;
    thumbnail.ensure_kind(MediaKind::Image, "thumbnail")?;

    let uploaded_video = upload_staged(&state, &video_file, MediaKind::Video).await?;
    let uploaded_thumbnail = match upload_staged(&state, &thumbnail, MediaKind::Image).await {
        Ok(uploaded) => uploaded,
        Err(err) => {
            state
                .discard_uploads(&[(uploaded_video.url.as_str(), MediaKind::Video)])
                .await;
            return Err(err);
        }
    };

    let inserted = state
        .store
        .insert_video(&NewVideo {
            owner: principal.id().to_string(),
            title,
            description,
            video_file: uploaded_video.url.clone(),
            thumbnail: uploaded_thumbnail.url.clone(),
            duration: uploaded_video.duration.unwrap_or(0.0),
        })
        .await;

    match inserted {
        Ok(video) => {
            tracing::info!(video = %video.id, owner = %video.owner, "video published");
            Ok(ApiResponse::created(video, "Video published successfully"))
        }
        Err(err) => {
            state
                .discard_uploads(&[
                    (uploaded_video.url.as_str(), MediaKind::Video),
                    (uploaded_thumbnail.url.as_str(), MediaKind::Image),
                ])
                .await;
            Err(err.into())
        }
    }
}

pub async fn get_video(
    State(state): State<AppState>,
    principal: Principal,
    Path(video_id): Path<String>,
) -> ApiResult<ApiResponse<VideoView>> {
    let video_id = require_id(&video_id, "video")?;
    let video = state
        .store
        .video_view(&video_id, principal.id())
        .await?
        .filter(|view| view.video.is_published || is_owner(Some(principal.id()), &view.video.owner.id))
        .ok_or_else(|| ApiError::not_found("Video not found"))?;

    state.store.record_view(&video_id, principal.id()).await?;
    Ok(ApiResponse::ok(video, "Video fetched successfully"))
}

pub async fn update_video(
    State(state): State<AppState>,
    principal: Principal,
    Path(video_id): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<ApiResponse<VideoRecord>> {
    let video_id = require_id(&video_id, "video")?;
    let mut form = MultipartForm::read(multipart?, &["thumbnail"]).await?;
    let title = optional_text(form.text("title"));
    let description = optional_text(form.text("description"));
    let thumbnail = form.take_file("thumbnail");
    if title.is_none() && description.is_none() && thumbnail.is_none() {
        return Err(ApiError::bad_request(
            "At least one field (title, description, or thumbnail) is required to update",
        ));
    }

    let existing = state
        .store
        .get_video(&video_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Video not found"))?;
    ensure_owner(&principal, &existing.owner, "update this video")?;

    let thumbnail = match &thumbnail {
        Some(file) => {
            file.ensure_kind(MediaKind::Image, "thumbnail")?;
            Some(upload_staged(&state, file, MediaKind::Image).await?.url)
        }
        None => None,
    };
    let patch = VideoPatch {
        title,
        description,
        thumbnail,
    };

    let (video, previous) = match state
        .store
        .update_video(&video_id, principal.id(), &patch)
        .await
    {
        Ok(Some(updated)) => updated,
        outcome => {
            if let Some(url) = &patch.thumbnail {
                state.discard_uploads(&[(url.as_str(), MediaKind::Image)]).await;
            }
            return Err(match outcome {
                Err(err) => err.into(),
                Ok(_) => ApiError::not_found("Video not found"),
            });
        }
    };
    state.purge_media(previous.as_slice()).await;

    tracing::info!(video = %video.id, "video updated");
    Ok(ApiResponse::ok(video, "Video updated successfully"))
}

pub async fn delete_video(
    State(state): State<AppState>,
    principal: Principal,
    Path(video_id): Path<String>,
) -> ApiResult<ApiResponse<Empty>> {
    let video_id = require_id(&video_id, "video")?;
    let existing = state
        .store
        .get_video(&video_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Video not found"))?;
    ensure_owner(&principal, &existing.owner, "delete this video")?;

    let queued = state
        .store
        .delete_video(&video_id, principal.id())
        .await?
        .ok_or_else(|| ApiError::not_found("Video not found"))?;
    state.purge_media(&queued).await;

    tracing::info!(video = %video_id, "video deleted");
    Ok(ApiResponse::ok(Empty {}, "Video deleted successfully"))
}

pub async fn toggle_publish(
    State(state): State<AppState>,
    principal: Principal,
    Path(video_id): Path<String>,
) -> ApiResult<ApiResponse<VideoRecord>> {
    let video_id = require_id(&video_id, "video")?;
    let existing = state
        .store
        .get_video(&video_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Video not found"))?;
    ensure_owner(&principal, &existing.owner, "change this video")?;

    let video = state
        .store
        .toggle_publish(&video_id, principal.id())
        .await?
        .ok_or_else(|| ApiError::not_found("Video not found"))?;
    tracing::info!(video = %video.id, published = video.is_published, "publish status toggled");
    Ok(ApiResponse::ok(
        video,
        "Video publish status toggled successfully",
    ))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    use super::*;
    use crate::api::testing::{ApiTestContext, PRINCIPAL_HEADER, body_json, error_status};
    use crate::api::upload::testing::multipart_body;
    use crate::store::relations::LikeTarget;
    use crate::store::testing::video;

    const BOUNDARY: &str = "vidtube-test-boundary";

    fn multipart_request(method: &str, uri: &str, principal: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(PRINCIPAL_HEADER, principal)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn publish_uploads_both_files() {
        let ctx = ApiTestContext::new().await;
        let alice = ctx.principal("alice").await;
        let body = multipart_body(
            BOUNDARY,
            &[("title", "My first video"), ("description", "hello")],
            &[
                ("videoFile", "clip.mp4", "video/mp4", b"video bytes"),
                ("thumbnail", "thumb.png", "image/png", b"image bytes"),
            ],
        );

        let response = ctx
            .router()
            .oneshot(multipart_request("POST", "/api/v1/videos", alice.id(), body))
            .await
            .unwrap();
        let (status, json) = body_json(response).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["statusCode"], 201);
        assert_eq!(json["data"]["title"], "My first video");
        assert_eq!(json["data"]["duration"], 42.0);
        assert_eq!(json["data"]["owner"], alice.id());
        assert_eq!(ctx.media.uploads.lock().len(), 2);
    }

    #[tokio::test]
    async fn publish_requires_files_and_text() {
        let ctx = ApiTestContext::new().await;
        let alice = ctx.principal("alice").await;
        let body = multipart_body(
            BOUNDARY,
            &[("title", "only a title")],
            &[("videoFile", "clip.mp4", "video/mp4", b"video bytes")],
        );
        let response = ctx
            .router()
            .oneshot(multipart_request("POST", "/api/v1/videos", alice.id(), body))
            .await
            .unwrap();
        let (status, json) = body_json(response).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["message"], "Title and description are required");
        assert!(ctx.media.uploads.lock().is_empty());
    }

    #[tokio::test]
    async fn non_owner_update_is_forbidden_and_leaves_video_unchanged() {
        let ctx = ApiTestContext::new().await;
        let owner = ctx.principal("owner").await;
        let mallory = ctx.principal("mallory").await;
        let id = video(ctx.store(), owner.id(), "original").await.unwrap();

        let body = multipart_body(BOUNDARY, &[("title", "pwned")], &[]);
        let response = ctx
            .router()
            .oneshot(multipart_request(
                "PATCH",
                &format!("/api/v1/videos/{id}"),
                mallory.id(),
                body,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ctx.store().get_video(&id).await.unwrap().unwrap().title,
            "original"
        );

        let denied = delete_video(State(ctx.state.clone()), mallory.clone(), Path(id.clone())).await;
        assert_eq!(error_status(denied).await, StatusCode::FORBIDDEN);
        let denied = toggle_publish(State(ctx.state.clone()), mallory, Path(id.clone())).await;
        assert_eq!(error_status(denied).await, StatusCode::FORBIDDEN);
        assert!(ctx.store().get_video(&id).await.unwrap().unwrap().is_published);
    }

    #[tokio::test]
    async fn update_without_fields_is_bad_request() {
        let ctx = ApiTestContext::new().await;
        let owner = ctx.principal("owner").await;
        let id = video(ctx.store(), owner.id(), "original").await.unwrap();
        let body = multipart_body(BOUNDARY, &[("title", "   ")], &[]);
        let response = ctx
            .router()
            .oneshot(multipart_request(
                "PATCH",
                &format!("/api/v1/videos/{id}"),
                owner.id(),
                body,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_video_counts_views_and_hides_drafts_from_others() {
        let ctx = ApiTestContext::new().await;
        let owner = ctx.principal("owner").await;
        let viewer = ctx.principal("viewer").await;
        let id = video(ctx.store(), owner.id(), "clip").await.unwrap();

        let fetched = get_video(State(ctx.state.clone()), viewer.clone(), Path(id.clone()))
            .await
            .unwrap();
        assert_eq!(fetched.data.video.owner.username, "owner");
        assert_eq!(ctx.store().get_video(&id).await.unwrap().unwrap().views, 1);

        ctx.store().toggle_publish(&id, owner.id()).await.unwrap();
        let hidden = get_video(State(ctx.state.clone()), viewer.clone(), Path(id.clone())).await;
        assert_eq!(error_status(hidden).await, StatusCode::NOT_FOUND);
        assert!(
            get_video(State(ctx.state.clone()), owner, Path(id.clone()))
                .await
                .is_ok()
        );

        let malformed = get_video(State(ctx.state.clone()), viewer, Path("xyz".into())).await;
        assert_eq!(error_status(malformed).await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_rejects_bad_owner_and_sort_fields() {
        let ctx = ApiTestContext::new().await;
        let viewer = ctx.principal("viewer").await;
        let bad_owner = list_videos(
            State(ctx.state.clone()),
            viewer.clone(),
            Query(VideoListParams {
                user_id: Some("123".into()),
                ..VideoListParams::default()
            }),
        )
        .await;
        assert_eq!(error_status(bad_owner).await, StatusCode::BAD_REQUEST);

        let bad_sort = list_videos(
            State(ctx.state.clone()),
            viewer,
            Query(VideoListParams {
                sort_by: Some("owner; DROP TABLE videos".into()),
                ..VideoListParams::default()
            }),
        )
        .await;
        assert_eq!(error_status(bad_sort).await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_over_http_paginates() {
        let ctx = ApiTestContext::new().await;
        let owner = ctx.principal("owner").await;
        for index in 0..12 {
            video(ctx.store(), owner.id(), &format!("clip {index}"))
                .await
                .unwrap();
        }
        let response = ctx
            .router()
            .oneshot(
                Request::get("/api/v1/videos?page=2&limit=5&sortBy=title&sortType=asc")
                    .header(PRINCIPAL_HEADER, owner.id())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let (status, json) = body_json(response).await;
        assert_eq!(status, StatusCode::OK);
        let data = &json["data"];
        assert_eq!(data["totalDocs"], 12);
        assert_eq!(data["totalPages"], 3);
        assert_eq!(data["docs"].as_array().unwrap().len(), 5);
        assert_eq!(data["docs"][0]["title"], "clip 3");
        assert_eq!(data["prevPage"], 1);
        assert_eq!(data["nextPage"], 3);
    }

    /// Owner V of a video, U1 liking it and U2 commenting: deleting the video
    /// leaves no like or comment behind and hands both files to the host.
    #[tokio::test]
    async fn delete_video_cascades_and_purges_media() {
        let ctx = ApiTestContext::new().await;
        let owner = ctx.principal("v").await;
        let u1 = ctx.principal("u1").await;
        let u2 = ctx.principal("u2").await;
        let id = video(ctx.store(), owner.id(), "doomed").await.unwrap();
        ctx.store()
            .toggle_like(u1.id(), LikeTarget::Video, &id)
            .await
            .unwrap();
        ctx.store().create_comment(&id, u2.id(), "bye").await.unwrap();

        let denied = delete_video(State(ctx.state.clone()), u1, Path(id.clone())).await;
        assert_eq!(error_status(denied).await, StatusCode::FORBIDDEN);

        let deleted = delete_video(State(ctx.state.clone()), owner, Path(id.clone()))
            .await
            .unwrap();
        assert_eq!(deleted.message, "Video deleted successfully");
        for table_query in [
            "SELECT COUNT(*) FROM likes WHERE target_id = ?1",
            "SELECT COUNT(*) FROM comments WHERE video_id = ?1",
        ] {
            assert_eq!(
                ctx.store()
                    .count(table_query, vec![id.as_str().into()])
                    .await
                    .unwrap(),
                0
            );
        }
        assert_eq!(ctx.media.deleted.lock().len(), 2);
        assert!(ctx.store().pending_media_deletions(10).await.unwrap().is_empty());

        let gone = get_video(
            State(ctx.state.clone()),
            u2,
            Path(id.clone()),
        )
        .await;
        assert_eq!(error_status(gone).await, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn failed_media_delete_is_queued_for_retry() {
        let ctx = ApiTestContext::new().await;
        let owner = ctx.principal("owner").await;
        let id = video(ctx.store(), owner.id(), "doomed").await.unwrap();
        ctx.media.failing_deletes(true);

        delete_video(State(ctx.state.clone()), owner, Path(id.clone()))
            .await
            .unwrap();
        assert!(ctx.store().get_video(&id).await.unwrap().is_none());
        let pending = ctx.store().pending_media_deletions(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].attempts, 1);
    }

    #[tokio::test]
    async fn failed_thumbnail_upload_discards_the_video_file() {
        let ctx = ApiTestContext::new().await;
        let alice = ctx.principal("alice").await;
        ctx.media.failing_image_uploads(true);
        let body = multipart_body(
            BOUNDARY,
            &[("title", "clip"), ("description", "hello")],
            &[
                ("videoFile", "clip.mp4", "video/mp4", b"video bytes"),
                ("thumbnail", "thumb.png", "image/png", b"image bytes"),
            ],
        );
        let response = ctx
            .router()
            .oneshot(multipart_request("POST", "/api/v1/videos", alice.id(), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let (kind, public_id) = ctx.media.uploads.lock()[0].clone();
        assert_eq!(kind, MediaKind::Video);
        assert_eq!(
            *ctx.media.deleted.lock(),
            vec![format!("https://media.test/video/{public_id}")]
        );
        assert_eq!(
            ctx.store()
                .count("SELECT COUNT(*) FROM videos", Vec::new())
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn failed_update_discards_the_new_thumbnail() {
        let ctx = ApiTestContext::new().await;
        let owner = ctx.principal("owner").await;
        let id = video(ctx.store(), owner.id(), "original").await.unwrap();
        ctx.store()
            .conn()
            .execute(
                "CREATE TRIGGER videos_read_only BEFORE UPDATE ON videos
                 BEGIN SELECT RAISE(ABORT, 'videos are read only'); END",
                libsql::params![],
            )
            .await
            .unwrap();

        let body = multipart_body(
            BOUNDARY,
            &[],
            &[("thumbnail", "new.png", "image/png", b"new thumbnail")],
        );
        let response = ctx
            .router()
            .oneshot(multipart_request(
                "PATCH",
                &format!("/api/v1/videos/{id}"),
                owner.id(),
                body,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let (_, public_id) = ctx.media.uploads.lock()[0].clone();
        assert_eq!(
            *ctx.media.deleted.lock(),
            vec![format!("https://media.test/image/{public_id}")]
        );
        assert_eq!(
            ctx.store().get_video(&id).await.unwrap().unwrap().title,
            "original"
        );
    }
}
