use anyhow::{Context, Result};
use libsql::{Row, params};
use serde::Serialize;

use super::media_queue::{self, PendingDeletion};
use super::{Joined, OwnerSummary, Store, View, read_joined};
use crate::aggregate::{Page, PageRequest, Pipeline, Sort, Source};
use crate::ids::{new_id, now_rfc3339};
use crate::media::MediaKind;

pub static VIDEOS: Source = Source {
    table: "videos",
    columns: &[
        "id",
        "owner",
        "title",
        "description",
        "video_file",
        "thumbnail",
        "duration",
        "views",
        "is_published",
        "created_at",
        "updated_at",
    ],
    search_columns: &["title", "description"],
    like_kind: "video",
};

/// Public sort fields accepted by the video listing.
pub const VIDEO_SORT_FIELDS: &[(&str, &str)] = &[
    ("createdAt", "created_at"),
    ("updatedAt", "updated_at"),
    ("views", "views"),
    ("duration", "duration"),
    ("title", "title"),
];

/// `VIDEOS.columns` qualified with the `v` alias, for hand-written joins.
pub(crate) const VIDEO_COLUMNS_QUALIFIED: &str = "v.id, v.owner, v.title, v.description, \
     v.video_file, v.thumbnail, v.duration, v.views, v.is_published, v.created_at, v.updated_at";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub owner: String,
    pub title: String,
    pub description: String,
    pub video_file: String,
    pub thumbnail: String,
    pub duration: f64,
    pub views: i64,
    pub is_published: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl VideoRecord {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            video_file: row.get(4)?,
            thumbnail: row.get(5)?,
            duration: row.get(6)?,
            views: row.get(7)?,
            is_published: row.get::<i64>(8)? != 0,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

/// Video document with its owner resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSummary {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub description: String,
    pub video_file: String,
    pub thumbnail: String,
    pub duration: f64,
    pub views: i64,
    pub is_published: bool,
    pub created_at: String,
    pub updated_at: String,
    pub owner: OwnerSummary,
}

impl VideoSummary {
    fn from_parts(record: VideoRecord, owner: OwnerSummary) -> Self {
        Self {
            id: record.id,
            title: record.title,
            description: record.description,
            video_file: record.video_file,
            thumbnail: record.thumbnail,
            duration: record.duration,
            views: record.views,
            is_published: record.is_published,
            created_at: record.created_at,
            updated_at: record.updated_at,
            owner,
        }
    }

    /// Reads a row laid out as `VIDEO_COLUMNS_QUALIFIED` followed by the
    /// four owner columns.
    pub(crate) fn from_joined_row(row: &Row) -> Result<Self> {
        let joined = read_joined(row, &VIDEOS, false)?;
        Self::from_row(row, joined)
    }
}

impl View for VideoSummary {
    fn from_row(row: &Row, joined: Joined) -> Result<Self> {
        Ok(Self::from_parts(VideoRecord::from_row(row)?, joined.owner))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoView {
    #[serde(flatten)]
    pub video: VideoSummary,
    pub likes_count: i64,
    pub is_liked: bool,
}

impl View for VideoView {
    fn from_row(row: &Row, joined: Joined) -> Result<Self> {
        let likes = joined.likes;
        Ok(Self {
            video: VideoSummary::from_row(row, joined)?,
            likes_count: likes.count,
            is_liked: likes.viewer_liked,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewVideo {
    pub owner: String,
    pub title: String,
    pub description: String,
    pub video_file: String,
    pub thumbnail: String,
    pub duration: f64,
}

/// Fields an owner may change. `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct VideoPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
}

impl VideoPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.thumbnail.is_none()
    }
}

/// Listing filters for the public video feed.
#[derive(Debug, Clone)]
pub struct VideoQuery {
    pub search: Option<String>,
    pub owner: Option<String>,
    pub sort: Sort,
    pub published_only: bool,
}

impl Default for VideoQuery {
    fn default() -> Self {
        Self {
            search: None,
            owner: None,
            sort: Sort::newest_first(),
            published_only: true,
        }
    }
}

impl Store {
    pub async fn insert_video(&self, video: &NewVideo) -> Result<VideoRecord> {
        let now = now_rfc3339();
        let record = VideoRecord {
            id: new_id(),
            owner: video.owner.clone(),
            title: video.title.trim().to_string(),
            description: video.description.trim().to_string(),
            video_file: video.video_file.clone(),
            thumbnail: video.thumbnail.clone(),
            duration: video.duration,
            views: 0,
            is_published: true,
            created_at: now.clone(),
            updated_at: now,
        };

        let tx = self.begin_write().await?;
        tx.execute(
            "INSERT INTO videos (id, owner, title, description, video_file, thumbnail, duration,
                                 views, is_published, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 1, ?8, ?9)",
            params![
                record.id.as_str(),
                record.owner.as_str(),
                record.title.as_str(),
                record.description.as_str(),
                record.video_file.as_str(),
                record.thumbnail.as_str(),
                record.duration,
                record.created_at.as_str(),
                record.updated_at.as_str(),
            ],
        )
        .await
        .with_context(|| format!("inserting video {}", record.id))?;
        tx.commit().await?;
        Ok(record)
    }

    pub async fn get_video(&self, id: &str) -> Result<Option<VideoRecord>> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {} FROM videos WHERE id = ?1", VIDEOS.columns.join(", ")),
                params![id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(VideoRecord::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Whether `viewer` may see the video: it is published or theirs.
    pub async fn video_visible_to(&self, id: &str, viewer: &str) -> Result<bool> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM videos WHERE id = ?1 AND (is_published = 1 OR owner = ?2)",
                params![id, viewer],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    /// Single video joined to its owner and like statistics for `viewer`.
    pub async fn video_view(&self, id: &str, viewer: &str) -> Result<Option<VideoView>> {
        let pipeline = Pipeline::new(&VIDEOS)
            .filter_eq("id", id)
            .with_likes(Some(viewer));
        self.aggregate_one(&pipeline).await
    }

    pub async fn list_videos(
        &self,
        query: &VideoQuery,
        viewer: &str,
        page: PageRequest,
    ) -> Result<Page<VideoView>> {
        let mut pipeline = Pipeline::new(&VIDEOS).search(query.search.as_deref());
        if let Some(owner) = &query.owner {
            pipeline = pipeline.filter_eq("owner", owner.as_str());
        }
        if query.published_only {
            pipeline = pipeline.filter_eq("is_published", 1i64);
        }
        let pipeline = pipeline.sort(query.sort).with_likes(Some(viewer));
        self.aggregate(&pipeline, page).await
    }

    /// Counts a view and records it in the viewer's history.
    pub async fn record_view(&self, video_id: &str, viewer: &str) -> Result<()> {
        let tx = self.begin_write().await?;
        tx.execute(
            "UPDATE videos SET views = views + 1 WHERE id = ?1",
            params![video_id],
        )
        .await?;
        tx.execute(
            "INSERT INTO watch_history (user_id, video_id, watched_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, video_id) DO NOTHING",
            params![viewer, video_id, now_rfc3339()],
        )
        .await?;
        tx.commit().await
    }

    /// Applies `patch` if `owner` still owns the video. A replaced thumbnail
    /// is queued for deletion on the media host.
    pub async fn update_video(
        &self,
        id: &str,
        owner: &str,
        patch: &VideoPatch,
    ) -> Result<Option<(VideoRecord, Option<PendingDeletion>)>> {
        let tx = self.begin_write().await?;
        let mut rows = tx
            .query(
                "SELECT thumbnail FROM videos WHERE id = ?1 AND owner = ?2",
                params![id, owner],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            drop(rows);
            tx.rollback().await?;
            return Ok(None);
        };
        let previous_thumbnail: String = row.get(0)?;
        drop(rows);

        tx.execute(
            "UPDATE videos SET
                 title = COALESCE(?1, title),
                 description = COALESCE(?2, description),
                 thumbnail = COALESCE(?3, thumbnail),
                 updated_at = ?4
             WHERE id = ?5 AND owner = ?6",
            params![
                patch.title.as_deref().map(str::trim),
                patch.description.as_deref().map(str::trim),
                patch.thumbnail.as_deref(),
                now_rfc3339(),
                id,
                owner,
            ],
        )
        .await
        .with_context(|| format!("updating video {id}"))?;

        let queued = match &patch.thumbnail {
            Some(thumbnail) if !previous_thumbnail.is_empty() && *thumbnail != previous_thumbnail => {
                media_queue::enqueue(&tx, &previous_thumbnail, MediaKind::Image).await?
            }
            _ => None,
        };
        tx.commit().await?;

        let video = self
            .get_video(id)
            .await?
            .context("video vanished after update")?;
        Ok(Some((video, queued)))
    }

    /// Flips the publication flag in a single statement.
    pub async fn toggle_publish(&self, id: &str, owner: &str) -> Result<Option<VideoRecord>> {
        let tx = self.begin_write().await?;
        let changed = tx
            .execute(
                "UPDATE videos SET is_published = 1 - is_published, updated_at = ?1
                 WHERE id = ?2 AND owner = ?3",
                params![now_rfc3339(), id, owner],
            )
            .await?;
        tx.commit().await?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_video(id).await
    }

    /// Removes a video together with everything that references it: likes on
    /// the video, its comments and their likes, playlist memberships and
    /// watch history. The media files are queued in the same transaction and
    /// returned so the caller can purge them once the commit succeeded.
    pub async fn delete_video(
        &self,
        id: &str,
        owner: &str,
    ) -> Result<Option<Vec<PendingDeletion>>> {
        let tx = self.begin_write().await?;
        let mut rows = tx
            .query(
                "SELECT video_file, thumbnail FROM videos WHERE id = ?1 AND owner = ?2",
                params![id, owner],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            drop(rows);
            tx.rollback().await?;
            return Ok(None);
        };
        let video_file: String = row.get(0)?;
        let thumbnail: String = row.get(1)?;
        drop(rows);

        tx.execute(
            "DELETE FROM likes WHERE target_kind = 'comment'
               AND target_id IN (SELECT id FROM comments WHERE video_id = ?1)",
            params![id],
        )
        .await?;
        tx.execute(
            "DELETE FROM likes WHERE target_kind = 'video' AND target_id = ?1",
            params![id],
        )
        .await?;
        tx.execute("DELETE FROM comments WHERE video_id = ?1", params![id])
            .await?;
        tx.execute("DELETE FROM playlist_videos WHERE video_id = ?1", params![id])
            .await?;
        tx.execute("DELETE FROM watch_history WHERE video_id = ?1", params![id])
            .await?;
        tx.execute(
            "DELETE FROM videos WHERE id = ?1 AND owner = ?2",
            params![id, owner],
        )
        .await
        .with_context(|| format!("deleting video {id}"))?;

        let mut queued = Vec::new();
        for (url, kind) in [(video_file, MediaKind::Video), (thumbnail, MediaKind::Image)] {
            if !url.is_empty() {
                queued.extend(media_queue::enqueue(&tx, &url, kind).await?);
            }
        }
        tx.commit().await?;
        Ok(Some(queued))
    }
}
