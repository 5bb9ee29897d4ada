use anyhow::Result;
use serde::Serialize;

use super::Store;
use super::videos::{VIDEOS, VideoView};
use crate::aggregate::Pipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStats {
    pub total_videos: u64,
    pub total_subscribers: u64,
    pub total_views: u64,
    pub total_likes: u64,
}

impl Store {
    /// Aggregate counters for a channel. The four reads are independent and
    /// run concurrently on the shared reader.
    pub async fn channel_stats(&self, channel: &str) -> Result<ChannelStats> {
        let (total_videos, total_subscribers, total_views, total_likes) = tokio::try_join!(
            self.count(
                "SELECT COUNT(*) FROM videos WHERE owner = ?1",
                vec![channel.into()],
            ),
            self.count(
                "SELECT COUNT(*) FROM subscriptions WHERE channel = ?1",
                vec![channel.into()],
            ),
            self.count(
                "SELECT COALESCE(SUM(views), 0) FROM videos WHERE owner = ?1",
                vec![channel.into()],
            ),
            self.count(
                "SELECT COUNT(*) FROM likes
                 WHERE target_kind = 'video'
                   AND target_id IN (SELECT id FROM videos WHERE owner = ?1)",
                vec![channel.into()],
            ),
        )?;

        Ok(ChannelStats {
            total_videos,
            total_subscribers,
            total_views,
            total_likes,
        })
    }

    /// Every video of a channel, published or not, newest first.
    pub async fn channel_videos(&self, channel: &str) -> Result<Vec<VideoView>> {
        let pipeline = Pipeline::new(&VIDEOS)
            .filter_eq("owner", channel)
            .with_likes(Some(channel));
        self.aggregate_all(&pipeline).await
    }
}
