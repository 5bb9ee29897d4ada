//! Principals: public profile data, watch history and channel profiles.
//! Credentials are owned by the identity collaborator and never stored here.

use anyhow::{Context, Result};
use libsql::{Row, params};
use serde::Serialize;

use super::media_queue::{self, PendingDeletion};
use super::{OwnerSummary, Store};
use crate::aggregate::{Page, PageRequest};
use crate::ids::{new_id, now_rfc3339};
use crate::media::MediaKind;
use crate::store::videos::{VIDEO_COLUMNS_QUALIFIED, VideoSummary};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    pub email: String,
    pub fullname: String,
    pub avatar: String,
    pub cover_image: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub fullname: String,
    pub avatar: String,
    pub cover_image: String,
}

/// Which profile image a media update replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileImage {
    Avatar,
    CoverImage,
}

impl ProfileImage {
    fn column(self) -> &'static str {
        match self {
            Self::Avatar => "avatar",
            Self::CoverImage => "cover_image",
        }
    }
}

/// Public channel page for a user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelProfile {
    #[serde(flatten)]
    pub user: OwnerSummary,
    pub cover_image: String,
    pub subscribers_count: u64,
    pub channels_subscribed_to_count: u64,
    pub is_subscribed: bool,
}

/// Outcome of a uniqueness check before provisioning a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateUserError {
    UsernameTaken,
    EmailTaken,
}

/// Outcome of an account details update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountChange {
    Updated(UserRecord),
    EmailTaken,
    Missing,
}

fn is_unique_violation(err: &libsql::Error) -> bool {
    err.to_string().contains("UNIQUE constraint failed")
}

const USER_COLUMNS: &str =
    "id, username, email, fullname, avatar, cover_image, created_at, updated_at";

fn row_to_user(row: &Row) -> Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        fullname: row.get(3)?,
        avatar: row.get(4)?,
        cover_image: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

impl Store {
    /// Checks whether the username or email is already taken.
    pub async fn find_user_conflict(
        &self,
        username: &str,
        email: &str,
    ) -> Result<Option<CreateUserError>> {
        let mut rows = self
            .conn()
            .query(
                "SELECT username = ?1 FROM users WHERE username = ?1 OR email = ?2 LIMIT 1",
                params![username.to_lowercase(), email],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let same_username: i64 = row.get(0)?;
        Ok(Some(if same_username != 0 {
            CreateUserError::UsernameTaken
        } else {
            CreateUserError::EmailTaken
        }))
    }

    pub async fn create_user(&self, user: &NewUser) -> Result<UserRecord> {
        let now = now_rfc3339();
        let record = UserRecord {
            id: new_id(),
            username: user.username.trim().to_lowercase(),
            email: user.email.trim().to_string(),
            fullname: user.fullname.trim().to_string(),
            avatar: user.avatar.clone(),
            cover_image: user.cover_image.clone(),
            created_at: now.clone(),
            updated_at: now,
        };

        let tx = self.begin_write().await?;
        tx.execute(
            &format!("INSERT INTO users ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                record.id.as_str(),
                record.username.as_str(),
                record.email.as_str(),
                record.fullname.as_str(),
                record.avatar.as_str(),
                record.cover_image.as_str(),
                record.created_at.as_str(),
                record.updated_at.as_str(),
            ],
        )
        .await
        .with_context(|| format!("inserting user {}", record.username))?;
        tx.commit().await?;
        Ok(record)
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<UserRecord>> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username.trim().to_lowercase()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    /// Rewrites the account details. The email check runs inside the write
    /// transaction, and a UNIQUE violation from a concurrent writer maps to
    /// the same outcome.
    pub async fn update_account(
        &self,
        id: &str,
        fullname: &str,
        email: &str,
    ) -> Result<AccountChange> {
        let email = email.trim();
        let tx = self.begin_write().await?;
        let taken = tx
            .query(
                "SELECT 1 FROM users WHERE email = ?1 AND id != ?2 LIMIT 1",
                params![email, id],
            )
            .await?
            .next()
            .await?
            .is_some();
        if taken {
            tx.rollback().await?;
            return Ok(AccountChange::EmailTaken);
        }

        let changed = match tx
            .execute(
                "UPDATE users SET fullname = ?1, email = ?2, updated_at = ?3 WHERE id = ?4",
                params![fullname.trim(), email, now_rfc3339(), id],
            )
            .await
        {
            Ok(changed) => changed,
            Err(err) if is_unique_violation(&err) => {
                tx.rollback().await?;
                return Ok(AccountChange::EmailTaken);
            }
            Err(err) => return Err(err).context("updating account details"),
        };
        tx.commit().await?;
        if changed == 0 {
            return Ok(AccountChange::Missing);
        }
        Ok(match self.get_user(id).await? {
            Some(user) => AccountChange::Updated(user),
            None => AccountChange::Missing,
        })
    }

    /// Swaps a profile image URL. The previous URL is queued for deletion on
    /// the media host in the same transaction and the queue entry is returned
    /// alongside the user.
    pub async fn replace_profile_image(
        &self,
        id: &str,
        image: ProfileImage,
        url: &str,
    ) -> Result<Option<(UserRecord, Option<PendingDeletion>)>> {
        let column = image.column();
        let tx = self.begin_write().await?;
        let mut rows = tx
            .query(
                &format!("SELECT {column} FROM users WHERE id = ?1"),
                params![id],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            drop(rows);
            tx.rollback().await?;
            return Ok(None);
        };
        let previous: String = row.get(0)?;
        drop(rows);

        tx.execute(
            &format!("UPDATE users SET {column} = ?1, updated_at = ?2 WHERE id = ?3"),
            params![url, now_rfc3339(), id],
        )
        .await?;
        let queued = if previous.is_empty() || previous == url {
            None
        } else {
            media_queue::enqueue(&tx, &previous, MediaKind::Image).await?
        };
        tx.commit().await?;

        let user = self
            .get_user(id)
            .await?
            .context("user vanished after profile image update")?;
        Ok(Some((user, queued)))
    }

    /// Records that `user_id` watched `video_id`. Re-watching is a no-op.
    pub async fn add_to_watch_history(&self, user_id: &str, video_id: &str) -> Result<()> {
        let tx = self.begin_write().await?;
        tx.execute(
            "INSERT INTO watch_history (user_id, video_id, watched_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, video_id) DO NOTHING",
            params![user_id, video_id, now_rfc3339()],
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn watch_history(
        &self,
        user_id: &str,
        page: PageRequest,
    ) -> Result<Page<VideoSummary>> {
        let total = self
            .count(
                "SELECT COUNT(*) FROM watch_history WHERE user_id = ?1",
                vec![user_id.into()],
            )
            .await?;

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {VIDEO_COLUMNS_QUALIFIED}, o.id, o.username, o.fullname, o.avatar
                     FROM watch_history AS h
                     JOIN videos AS v ON v.id = h.video_id
                     LEFT JOIN users AS o ON o.id = v.owner
                     WHERE h.user_id = ?1
                     ORDER BY h.watched_at DESC, h.rowid DESC
                     LIMIT ?2 OFFSET ?3"
                ),
                params![user_id, i64::from(page.limit), page.offset() as i64],
            )
            .await?;

        let mut docs = Vec::new();
        while let Some(row) = rows.next().await? {
            docs.push(VideoSummary::from_joined_row(&row)?);
        }
        Ok(Page::new(docs, total, page))
    }

    /// Channel page with subscription counters, dispatched concurrently.
    pub async fn channel_profile(
        &self,
        username: &str,
        viewer: &str,
    ) -> Result<Option<ChannelProfile>> {
        let Some(user) = self.get_user_by_username(username).await? else {
            return Ok(None);
        };

        let (subscribers_count, channels_subscribed_to_count, viewer_rows) = tokio::try_join!(
            self.count(
                "SELECT COUNT(*) FROM subscriptions WHERE channel = ?1",
                vec![user.id.as_str().into()],
            ),
            self.count(
                "SELECT COUNT(*) FROM subscriptions WHERE subscriber = ?1",
                vec![user.id.as_str().into()],
            ),
            self.count(
                "SELECT COUNT(*) FROM subscriptions WHERE channel = ?1 AND subscriber = ?2",
                vec![user.id.as_str().into(), viewer.into()],
            ),
        )?;

        Ok(Some(ChannelProfile {
            user: OwnerSummary {
                id: user.id,
                username: user.username,
                fullname: user.fullname,
                avatar: user.avatar,
            },
            cover_image: user.cover_image,
            subscribers_count,
            channels_subscribed_to_count,
            is_subscribed: viewer_rows > 0,
        }))
    }
}
