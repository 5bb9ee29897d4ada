use anyhow::{Context, Result};
use libsql::{Row, params};
use serde::Serialize;

use super::{Joined, OwnerSummary, Store, View};
use crate::aggregate::{Page, PageRequest, Pipeline, Source};
use crate::ids::{new_id, now_rfc3339};

pub static TWEETS: Source = Source {
    table: "tweets",
    columns: &["id", "owner", "content", "created_at", "updated_at"],
    search_columns: &["content"],
    like_kind: "tweet",
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TweetRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub owner: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

impl TweetRecord {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner: row.get(1)?,
            content: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TweetView {
    #[serde(rename = "_id")]
    pub id: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
    pub owner: OwnerSummary,
    pub likes_count: i64,
    pub is_liked: bool,
}

impl View for TweetView {
    fn from_row(row: &Row, joined: Joined) -> Result<Self> {
        let record = TweetRecord::from_row(row)?;
        Ok(Self {
            id: record.id,
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
    pub async fn create_tweet(&self, owner: &str, content: &str) -> Result<TweetRecord> {
        let now = now_rfc3339();
        let record = TweetRecord {
            id: new_id(),
            owner: owner.to_string(),
            content: content.trim().to_string(),
            created_at: now.clone(),
            updated_at: now,
        };

        let tx = self.begin_write().await?;
        tx.execute(
            "INSERT INTO tweets (id, owner, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id.as_str(),
                record.owner.as_str(),
                record.content.as_str(),
                record.created_at.as_str(),
                record.updated_at.as_str(),
            ],
        )
        .await
        .context("inserting tweet")?;
        tx.commit().await?;
        Ok(record)
    }

    pub async fn get_tweet(&self, id: &str) -> Result<Option<TweetRecord>> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {} FROM tweets WHERE id = ?1", TWEETS.columns.join(", ")),
                params![id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(TweetRecord::from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn user_tweets(
        &self,
        owner: &str,
        viewer: &str,
        page: PageRequest,
    ) -> Result<Page<TweetView>> {
        let pipeline = Pipeline::new(&TWEETS)
            .filter_eq("owner", owner)
            .with_likes(Some(viewer));
        self.aggregate(&pipeline, page).await
    }

    pub async fn update_tweet(
        &self,
        id: &str,
        owner: &str,
        content: &str,
    ) -> Result<Option<TweetRecord>> {
        let tx = self.begin_write().await?;
        let changed = tx
            .execute(
                "UPDATE tweets SET content = ?1, updated_at = ?2 WHERE id = ?3 AND owner = ?4",
                params![content.trim(), now_rfc3339(), id, owner],
            )
            .await?;
        tx.commit().await?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_tweet(id).await
    }

    /// Deletes a tweet and its likes in one transaction.
    pub async fn delete_tweet(&self, id: &str, owner: &str) -> Result<bool> {
        let tx = self.begin_write().await?;
        let deleted = tx
            .execute(
                "DELETE FROM tweets WHERE id = ?1 AND owner = ?2",
                params![id, owner],
            )
            .await?;
        if deleted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        tx.execute(
            "DELETE FROM likes WHERE target_kind = 'tweet' AND target_id = ?1",
            params![id],
        )
        .await?;
        tx.commit().await?;
        Ok(true)
    }
}
