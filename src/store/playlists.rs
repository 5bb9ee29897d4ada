use anyhow::{Context, Result};
use libsql::{Row, params};
use serde::Serialize;

use super::videos::{VIDEO_COLUMNS_QUALIFIED, VideoSummary};
use super::{OwnerSummary, Store};
use crate::ids::{new_id, now_rfc3339};

const PLAYLIST_COLUMNS: &str = "id, owner, name, description, created_at, updated_at";

/// Playlist document with its member video ids in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub owner: String,
    pub name: String,
    pub description: String,
    pub videos: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl PlaylistRecord {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            videos: Vec::new(),
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

/// Entry of a user's playlist listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistSummary {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub description: String,
    pub total_videos: i64,
    pub playlist_thumbnail: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Playlist with its videos, each joined to the video owner.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistDetail {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub description: String,
    pub owner: OwnerSummary,
    pub videos: Vec<VideoSummary>,
    pub created_at: String,
    pub updated_at: String,
}

impl Store {
    pub async fn create_playlist(
        &self,
        owner: &str,
        name: &str,
        description: &str,
    ) -> Result<PlaylistRecord> {
        let now = now_rfc3339();
        let record = PlaylistRecord {
            id: new_id(),
            owner: owner.to_string(),
            name: name.trim().to_string(),
            description: description.trim().to_string(),
            videos: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        };

        let tx = self.begin_write().await?;
        tx.execute(
            &format!("INSERT INTO playlists ({PLAYLIST_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
            params![
                record.id.as_str(),
                record.owner.as_str(),
                record.name.as_str(),
                record.description.as_str(),
                record.created_at.as_str(),
                record.updated_at.as_str(),
            ],
        )
        .await
        .context("inserting playlist")?;
        tx.commit().await?;
        Ok(record)
    }

    pub async fn get_playlist(&self, id: &str) -> Result<Option<PlaylistRecord>> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PLAYLIST_COLUMNS} FROM playlists WHERE id = ?1"),
                params![id],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let mut record = PlaylistRecord::from_row(&row)?;
        drop(rows);

        let mut rows = self
            .conn()
            .query(
                "SELECT video_id FROM playlist_videos WHERE playlist_id = ?1
                 ORDER BY added_at, rowid",
                params![id],
            )
            .await?;
        while let Some(row) = rows.next().await? {
            record.videos.push(row.get(0)?);
        }
        Ok(Some(record))
    }

    pub async fn update_playlist(
        &self,
        id: &str,
        owner: &str,
        name: &str,
        description: &str,
    ) -> Result<Option<PlaylistRecord>> {
        let tx = self.begin_write().await?;
        let changed = tx
            .execute(
                "UPDATE playlists SET name = ?1, description = ?2, updated_at = ?3
                 WHERE id = ?4 AND owner = ?5",
                params![name.trim(), description.trim(), now_rfc3339(), id, owner],
            )
            .await?;
        tx.commit().await?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_playlist(id).await
    }

    /// Deletes a playlist and its memberships. The member videos survive.
    pub async fn delete_playlist(&self, id: &str, owner: &str) -> Result<bool> {
        let tx = self.begin_write().await?;
        let mut rows = tx
            .query(
                "SELECT 1 FROM playlists WHERE id = ?1 AND owner = ?2",
                params![id, owner],
            )
            .await?;
        let owned = rows.next().await?.is_some();
        drop(rows);
        if !owned {
            tx.rollback().await?;
            return Ok(false);
        }
        tx.execute(
            "DELETE FROM playlist_videos WHERE playlist_id = ?1",
            params![id],
        )
        .await?;
        tx.execute("DELETE FROM playlists WHERE id = ?1", params![id])
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Adds a video with set semantics. `None` when `owner` does not own the
    /// playlist.
    pub async fn add_to_playlist(
        &self,
        playlist_id: &str,
        owner: &str,
        video_id: &str,
    ) -> Result<Option<PlaylistRecord>> {
        let tx = self.begin_write().await?;
        let inserted = tx
            .execute(
                "INSERT INTO playlist_videos (playlist_id, video_id, added_at)
                 SELECT id, ?1, ?2 FROM playlists WHERE id = ?3 AND owner = ?4
                 ON CONFLICT(playlist_id, video_id) DO NOTHING",
                params![video_id, now_rfc3339(), playlist_id, owner],
            )
            .await
            .with_context(|| format!("adding video {video_id} to playlist {playlist_id}"))?;
        let owned = inserted > 0 || self.owns_playlist(&tx, playlist_id, owner).await?;
        if !owned {
            tx.rollback().await?;
            return Ok(None);
        }
        tx.execute(
            "UPDATE playlists SET updated_at = ?1 WHERE id = ?2",
            params![now_rfc3339(), playlist_id],
        )
        .await?;
        tx.commit().await?;
        self.get_playlist(playlist_id).await
    }

    pub async fn remove_from_playlist(
        &self,
        playlist_id: &str,
        owner: &str,
        video_id: &str,
    ) -> Result<Option<PlaylistRecord>> {
        let tx = self.begin_write().await?;
        if !self.owns_playlist(&tx, playlist_id, owner).await? {
            tx.rollback().await?;
            return Ok(None);
        }
        tx.execute(
            "DELETE FROM playlist_videos WHERE playlist_id = ?1 AND video_id = ?2",
            params![playlist_id, video_id],
        )
        .await?;
        tx.execute(
            "UPDATE playlists SET updated_at = ?1 WHERE id = ?2",
            params![now_rfc3339(), playlist_id],
        )
        .await?;
        tx.commit().await?;
        self.get_playlist(playlist_id).await
    }

    async fn owns_playlist(
        &self,
        conn: &libsql::Connection,
        playlist_id: &str,
        owner: &str,
    ) -> Result<bool> {
        let mut rows = conn
            .query(
                "SELECT 1 FROM playlists WHERE id = ?1 AND owner = ?2",
                params![playlist_id, owner],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    /// All playlists of a user with their size and the thumbnail of their
    /// first video. Drafts of other channels are not counted for `viewer`.
    pub async fn user_playlists(&self, owner: &str, viewer: &str) -> Result<Vec<PlaylistSummary>> {
        let mut rows = self
            .conn()
            .query(
                "SELECT p.id, p.name, p.description,
                        (SELECT COUNT(*) FROM playlist_videos AS pv
                           JOIN videos AS v ON v.id = pv.video_id
                          WHERE pv.playlist_id = p.id
                            AND (v.is_published = 1 OR v.owner = ?2)),
                        (SELECT v.thumbnail FROM playlist_videos AS pv
                           JOIN videos AS v ON v.id = pv.video_id
                          WHERE pv.playlist_id = p.id
                            AND (v.is_published = 1 OR v.owner = ?2)
                          ORDER BY pv.added_at, pv.rowid LIMIT 1),
                        p.created_at, p.updated_at
                 FROM playlists AS p
                 WHERE p.owner = ?1
                 ORDER BY p.created_at DESC, p.rowid DESC",
                params![owner, viewer],
            )
            .await?;

        let mut playlists = Vec::new();
        while let Some(row) = rows.next().await? {
            playlists.push(PlaylistSummary {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                total_videos: row.get(3)?,
                playlist_thumbnail: row.get(4)?,
                created_at: row.get(5)?,
                updated_at: row.get(6)?,
            });
        }
        Ok(playlists)
    }

    /// Playlist with its videos in insertion order. Other channels' drafts
    /// are left out for `viewer`.
    pub async fn playlist_detail(&self, id: &str, viewer: &str) -> Result<Option<PlaylistDetail>> {
        let mut rows = self
            .conn()
            .query(
                "SELECT p.id, p.name, p.description, p.created_at, p.updated_at,
                        o.id, o.username, o.fullname, o.avatar
                 FROM playlists AS p
                 LEFT JOIN users AS o ON o.id = p.owner
                 WHERE p.id = ?1",
                params![id],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        if row.get::<Option<String>>(5)?.is_none() {
            return Err(crate::error::IntegrityError(format!(
                "playlist {id} references a missing owner"
            ))
            .into());
        }
        let mut detail = PlaylistDetail {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            owner: OwnerSummary::from_row(&row, 5)?,
            videos: Vec::new(),
        };
        drop(rows);

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {VIDEO_COLUMNS_QUALIFIED}, o.id, o.username, o.fullname, o.avatar
                     FROM playlist_videos AS pv
                     JOIN videos AS v ON v.id = pv.video_id
                     LEFT JOIN users AS o ON o.id = v.owner
                     WHERE pv.playlist_id = ?1
                       AND (v.is_published = 1 OR v.owner = ?2)
                     ORDER BY pv.added_at, pv.rowid"
                ),
                params![id, viewer],
            )
            .await?;
        while let Some(row) = rows.next().await? {
            detail.videos.push(VideoSummary::from_joined_row(&row)?);
        }
        Ok(Some(detail))
    }
}
