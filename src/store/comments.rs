use anyhow::{Context, Result};
use libsql::{Row, params};
use serde::Serialize;

use super::{Joined, OwnerSummary, Store, View};
use crate::aggregate::{Page, PageRequest, Pipeline, Source};
use crate::ids::{new_id, now_rfc3339};

pub static COMMENTS: Source = Source {
    table: "comments",
    columns: &["id", "video_id", "owner", "content", "created_at", "updated_at"],
    search_columns: &["content"],
    like_kind: "comment",
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "video")]
    pub video_id: String,
    pub owner: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

impl CommentRecord {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            video_id: row.get(1)?,
            owner: row.get(2)?,
            content: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "video")]
    pub video_id: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
    pub owner: OwnerSummary,
    pub likes_count: i64,
    pub is_liked: bool,
}

impl View for CommentView {
    fn from_row(row: &Row, joined: Joined) -> Result<Self> {
        let record = CommentRecord::from_row(row)?;
        Ok(Self {
            id: record.id,
            video_id: record.video_id,
            content: record.content,
            created_at: record.created_at,
            updated_at: record.updated_at,
            owner: joined.owner,
            likes_count: joined.likes.count,
            is_liked: joined.likes.viewer_liked,
        })
    }
}

impl Store {
    pub async fn create_comment(
        &self,
        video_id: &str,
        owner: &str,
        content: &str,
    ) -> Result<CommentRecord> {
        let now = now_rfc3339();
        let record = CommentRecord {
            id: new_id(),
            video_id: video_id.to_string(),
            owner: owner.to_string(),
            content: content.trim().to_string(),
            created_at: now.clone(),
            updated_at: now,
        };

        let tx = self.begin_write().await?;
        tx.execute(
            "INSERT INTO comments (id, video_id, owner, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id.as_str(),
                record.video_id.as_str(),
                record.owner.as_str(),
                record.content.as_str(),
                record.created_at.as_str(),
                record.updated_at.as_str(),
            ],
        )
        .await
        .with_context(|| format!("commenting on video {video_id}"))?;
        tx.commit().await?;
        Ok(record)
    }

    pub async fn get_comment(&self, id: &str) -> Result<Option<CommentRecord>> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {} FROM comments WHERE id = ?1", COMMENTS.columns.join(", ")),
                params![id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(CommentRecord::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Comments on a video, newest first, with owners and like statistics.
    pub async fn video_comments(
        &self,
        video_id: &str,
        viewer: &str,
        page: PageRequest,
    ) -> Result<Page<CommentView>> {
        let pipeline = Pipeline::new(&COMMENTS)
            .filter_eq("video_id", video_id)
            .with_likes(Some(viewer));
        self.aggregate(&pipeline, page).await
    }

    pub async fn update_comment(
        &self,
        id: &str,
        owner: &str,
        content: &str,
    ) -> Result<Option<CommentRecord>> {
        let tx = self.begin_write().await?;
        let changed = tx
            .execute(
                "UPDATE comments SET content = ?1, updated_at = ?2 WHERE id = ?3 AND owner = ?4",
                params![content.trim(), now_rfc3339(), id, owner],
            )
            .await?;
        tx.commit().await?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_comment(id).await
    }

    /// Deletes a comment and its likes. Returns `false` when no comment with
    /// that id is owned by `owner`.
    pub async fn delete_comment(&self, id: &str, owner: &str) -> Result<bool> {
        let tx = self.begin_write().await?;
        let deleted = tx
            .execute(
                "DELETE FROM comments WHERE id = ?1 AND owner = ?2",
                params![id, owner],
            )
            .await?;
        if deleted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        tx.execute(
            "DELETE FROM likes WHERE target_kind = 'comment' AND target_id = ?1",
            params![id],
        )
        .await?;
        tx.commit().await?;
        Ok(true)
    }
}
