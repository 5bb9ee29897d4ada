//! Toggle-state relations: likes and channel subscriptions.
//!
//! A toggle runs as one write transaction: delete the relation if present,
//! otherwise insert it. The UNIQUE constraints on both tables keep a second
//! process from creating duplicates even if it bypasses the writer gate.

use anyhow::{Context, Result};
use libsql::params;
use serde::Serialize;

use super::videos::{VIDEOS, VideoSummary};
use super::{OwnerSummary, Store};
use crate::aggregate::{Page, PageRequest, Pipeline};
use crate::ids::{new_id, now_rfc3339};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeTarget {
    Video,
    Comment,
    Tweet,
}

impl LikeTarget {
    pub fn kind(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Comment => "comment",
            Self::Tweet => "tweet",
        }
    }

    fn table(self) -> &'static str {
        match self {
            Self::Video => "videos",
            Self::Comment => "comments",
            Self::Tweet => "tweets",
        }
    }
}

/// Result of flipping a relation. Exactly one side is reported per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome<T> {
    Added(T),
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub liked_by: String,
    pub target_kind: String,
    pub target_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub subscriber: String,
    pub channel: String,
    pub created_at: String,
}

/// A user on either end of a subscription.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionMember {
    #[serde(flatten)]
    pub user: OwnerSummary,
    pub subscribed_at: String,
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Subscribers,
    Channels,
}

impl Store {
    /// Flips the like of `user` on the target. `None` means the target does
    /// not exist or is a draft video of someone else.
    pub async fn toggle_like(
        &self,
        user: &str,
        target: LikeTarget,
        target_id: &str,
    ) -> Result<Option<ToggleOutcome<LikeRecord>>> {
        let tx = self.begin_write().await?;
        let mut rows = match target {
            LikeTarget::Video => {
                tx.query(
                    "SELECT 1 FROM videos WHERE id = ?1 AND (is_published = 1 OR owner = ?2)",
                    params![target_id, user],
                )
                .await?
            }
            _ => {
                tx.query(
                    &format!("SELECT 1 FROM {} WHERE id = ?1", target.table()),
                    params![target_id],
                )
                .await?
            }
        };
        let found = rows.next().await?.is_some();
        drop(rows);
        if !found {
            tx.rollback().await?;
            return Ok(None);
        }

        let removed = tx
            .execute(
                "DELETE FROM likes WHERE liked_by = ?1 AND target_kind = ?2 AND target_id = ?3",
                params![user, target.kind(), target_id],
            )
            .await?;
        if removed > 0 {
            tx.commit().await?;
            return Ok(Some(ToggleOutcome::Removed));
        }

        let record = LikeRecord {
            id: new_id(),
            liked_by: user.to_string(),
            target_kind: target.kind().to_string(),
            target_id: target_id.to_string(),
            created_at: now_rfc3339(),
        };
        tx.execute(
            "INSERT INTO likes (id, liked_by, target_kind, target_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(liked_by, target_kind, target_id) DO NOTHING",
            params![
                record.id.as_str(),
                record.liked_by.as_str(),
                record.target_kind.as_str(),
                record.target_id.as_str(),
                record.created_at.as_str(),
            ],
        )
        .await
        .with_context(|| format!("liking {} {target_id}", target.kind()))?;
        tx.commit().await?;
        Ok(Some(ToggleOutcome::Added(record)))
    }

    /// Flips the subscription of `subscriber` to `channel`. `None` means the
    /// channel does not exist. Callers reject self-subscription up front.
    pub async fn toggle_subscription(
        &self,
        subscriber: &str,
        channel: &str,
    ) -> Result<Option<ToggleOutcome<SubscriptionRecord>>> {
        let tx = self.begin_write().await?;
        let mut rows = tx
            .query("SELECT 1 FROM users WHERE id = ?1", params![channel])
            .await?;
        let found = rows.next().await?.is_some();
        drop(rows);
        if !found {
            tx.rollback().await?;
            return Ok(None);
        }

        let removed = tx
            .execute(
                "DELETE FROM subscriptions WHERE subscriber = ?1 AND channel = ?2",
                params![subscriber, channel],
            )
            .await?;
        if removed > 0 {
            tx.commit().await?;
            return Ok(Some(ToggleOutcome::Removed));
        }

        let record = SubscriptionRecord {
            id: new_id(),
            subscriber: subscriber.to_string(),
            channel: channel.to_string(),
            created_at: now_rfc3339(),
        };
        tx.execute(
            "INSERT INTO subscriptions (id, subscriber, channel, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(subscriber, channel) DO NOTHING",
            params![
                record.id.as_str(),
                record.subscriber.as_str(),
                record.channel.as_str(),
                record.created_at.as_str(),
            ],
        )
        .await
        .with_context(|| format!("subscribing to {channel}"))?;
        tx.commit().await?;
        Ok(Some(ToggleOutcome::Added(record)))
    }

    pub async fn liked_videos(
        &self,
        user: &str,
        page: PageRequest,
    ) -> Result<Page<VideoSummary>> {
        let pipeline = Pipeline::new(&VIDEOS).liked_by(user).visible_to(user);
        self.aggregate(&pipeline, page).await
    }

    pub async fn channel_subscribers(
        &self,
        channel: &str,
        page: PageRequest,
    ) -> Result<Page<SubscriptionMember>> {
        self.subscription_page(Side::Subscribers, channel, page)
            .await
    }

    pub async fn subscribed_channels(
        &self,
        subscriber: &str,
        page: PageRequest,
    ) -> Result<Page<SubscriptionMember>> {
        self.subscription_page(Side::Channels, subscriber, page)
            .await
    }

    async fn subscription_page(
        &self,
        side: Side,
        user: &str,
        page: PageRequest,
    ) -> Result<Page<SubscriptionMember>> {
        let (filter, joined) = match side {
            Side::Subscribers => ("channel", "subscriber"),
            Side::Channels => ("subscriber", "channel"),
        };
        let total = self
            .count(
                &format!("SELECT COUNT(*) FROM subscriptions WHERE {filter} = ?1"),
                vec![user.into()],
            )
            .await?;

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT u.id, u.username, u.fullname, u.avatar, s.created_at
                     FROM subscriptions AS s
                     JOIN users AS u ON u.id = s.{joined}
                     WHERE s.{filter} = ?1
                     ORDER BY s.created_at DESC, s.rowid DESC
                     LIMIT ?2 OFFSET ?3"
                ),
                params![user, i64::from(page.limit), page.offset() as i64],
            )
            .await?;

        let mut docs = Vec::new();
        while let Some(row) = rows.next().await? {
            docs.push(SubscriptionMember {
                user: OwnerSummary::from_row(&row, 0)?,
                subscribed_at: row.get(4)?,
            });
        }
        Ok(Page::new(docs, total, page))
    }
}
