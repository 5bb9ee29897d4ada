//! Durable queue of media files awaiting deletion on the media host.
//!
//! Entries are written in the same transaction that drops the last reference
//! to a URL, so a crash between commit and the remote delete leaves the work
//! recorded instead of orphaning the file.

use anyhow::{Context, Result, anyhow};
use libsql::{Connection, Row, params};
use serde::Serialize;

use super::Store;
use crate::ids::{new_id, now_rfc3339};
use crate::media::MediaKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDeletion {
    pub id: String,
    pub url: String,
    pub kind: MediaKind,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub enqueued_at: String,
}

impl PendingDeletion {
    fn from_row(row: &Row) -> Result<Self> {
        let kind: String = row.get(2)?;
        Ok(Self {
            id: row.get(0)?,
            url: row.get(1)?,
            kind: MediaKind::parse(&kind)
                .ok_or_else(|| anyhow!("unknown media kind '{kind}' in deletion queue"))?,
            attempts: row.get(3)?,
            last_error: row.get(4)?,
            enqueued_at: row.get(5)?,
        })
    }
}

/// Queues `url` inside the caller's write transaction, after the caller has
/// dropped its own reference. Returns `None` while any video or profile still
/// points at the URL.
pub(crate) async fn enqueue(
    conn: &Connection,
    url: &str,
    kind: MediaKind,
) -> Result<Option<PendingDeletion>> {
    if is_referenced(conn, url).await? {
        tracing::debug!(%url, "media still referenced; not queued for deletion");
        return Ok(None);
    }
    let entry = PendingDeletion {
        id: new_id(),
        url: url.to_string(),
        kind,
        attempts: 0,
        last_error: None,
        enqueued_at: now_rfc3339(),
    };
    conn.execute(
        "INSERT INTO pending_media_deletions (id, url, kind, attempts, last_error, enqueued_at)
         VALUES (?1, ?2, ?3, 0, NULL, ?4)",
        params![
            entry.id.as_str(),
            entry.url.as_str(),
            kind.as_str(),
            entry.enqueued_at.as_str(),
        ],
    )
    .await
    .with_context(|| format!("queueing deletion of {url}"))?;
    Ok(Some(entry))
}

async fn is_referenced(conn: &Connection, url: &str) -> Result<bool> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM videos WHERE video_file = ?1 OR thumbnail = ?1)
                 OR EXISTS(SELECT 1 FROM users WHERE avatar = ?1 OR cover_image = ?1)",
            params![url],
        )
        .await
        .with_context(|| format!("checking references to {url}"))?;
    let referenced: i64 = match rows.next().await? {
        Some(row) => row.get(0)?,
        None => 0,
    };
    Ok(referenced != 0)
}

impl Store {
    /// Oldest queued deletions first.
    pub async fn pending_media_deletions(&self, limit: u32) -> Result<Vec<PendingDeletion>> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, url, kind, attempts, last_error, enqueued_at
                 FROM pending_media_deletions
                 ORDER BY enqueued_at, rowid
                 LIMIT ?1",
                params![i64::from(limit)],
            )
            .await?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(PendingDeletion::from_row(&row)?);
        }
        Ok(entries)
    }

    pub async fn complete_media_deletion(&self, id: &str) -> Result<()> {
        let tx = self.begin_write().await?;
        tx.execute(
            "DELETE FROM pending_media_deletions WHERE id = ?1",
            params![id],
        )
        .await?;
        tx.commit().await
    }

    pub async fn fail_media_deletion(&self, id: &str, error: &str) -> Result<()> {
        let tx = self.begin_write().await?;
        tx.execute(
            "UPDATE pending_media_deletions SET attempts = attempts + 1, last_error = ?1
             WHERE id = ?2",
            params![error, id],
        )
        .await?;
        tx.commit().await
    }
}
