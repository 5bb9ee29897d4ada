//! Persistence layer for vidtube.
//!
//! Every collection lives in its own table of an embedded SQLite-compatible
//! database. Reads share one connection. Every write runs as a transaction on
//! a second, dedicated connection that is only reachable through the writer
//! gate, so check-and-act sequences cannot interleave and readers only ever
//! observe committed state.

pub mod comments;
pub mod media_queue;
pub mod playlists;
pub mod relations;
pub mod stats;
pub mod tweets;
pub mod users;
pub mod videos;

use std::ops::Deref;
use std::path::Path;

use anyhow::{Context, Result};
use libsql::{Builder, Connection, Row, Transaction, Value, params::Params};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use crate::aggregate::{Page, PageRequest, Pipeline, Source};
use crate::error::IntegrityError;

async fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA foreign_keys=ON;
        PRAGMA busy_timeout=5000;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            fullname TEXT NOT NULL,
            avatar TEXT NOT NULL DEFAULT '',
            cover_image TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS videos (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL REFERENCES users(id),
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            video_file TEXT NOT NULL,
            thumbnail TEXT NOT NULL,
            duration REAL NOT NULL DEFAULT 0,
            views INTEGER NOT NULL DEFAULT 0,
            is_published INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_videos_owner ON videos(owner);
        CREATE INDEX IF NOT EXISTS idx_videos_created ON videos(created_at);

        CREATE TABLE IF NOT EXISTS watch_history (
            user_id TEXT NOT NULL REFERENCES users(id),
            video_id TEXT NOT NULL REFERENCES videos(id),
            watched_at TEXT NOT NULL,
            PRIMARY KEY (user_id, video_id)
        );

        CREATE TABLE IF NOT EXISTS comments (
            id TEXT PRIMARY KEY,
            video_id TEXT NOT NULL REFERENCES videos(id),
            owner TEXT NOT NULL REFERENCES users(id),
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_comments_video ON comments(video_id);

        CREATE TABLE IF NOT EXISTS tweets (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL REFERENCES users(id),
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tweets_owner ON tweets(owner);

        CREATE TABLE IF NOT EXISTS playlists (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL REFERENCES users(id),
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_playlists_owner ON playlists(owner);

        CREATE TABLE IF NOT EXISTS playlist_videos (
            playlist_id TEXT NOT NULL REFERENCES playlists(id),
            video_id TEXT NOT NULL REFERENCES videos(id),
            added_at TEXT NOT NULL,
            PRIMARY KEY (playlist_id, video_id)
        );

        CREATE TABLE IF NOT EXISTS likes (
            id TEXT PRIMARY KEY,
            liked_by TEXT NOT NULL REFERENCES users(id),
            target_kind TEXT NOT NULL CHECK (target_kind IN ('video', 'comment', 'tweet')),
            target_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (liked_by, target_kind, target_id)
        );
        CREATE INDEX IF NOT EXISTS idx_likes_target ON likes(target_kind, target_id);

        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            subscriber TEXT NOT NULL REFERENCES users(id),
            channel TEXT NOT NULL REFERENCES users(id),
            created_at TEXT NOT NULL,
            UNIQUE (subscriber, channel),
            CHECK (subscriber <> channel)
        );
        CREATE INDEX IF NOT EXISTS idx_subscriptions_channel ON subscriptions(channel);

        CREATE TABLE IF NOT EXISTS pending_media_deletions (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            kind TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            enqueued_at TEXT NOT NULL
        );
        "#,
    )
    .await?;
    Ok(())
}

/// Owner columns flattened onto every aggregated document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerSummary {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    pub fullname: String,
    pub avatar: String,
}

impl OwnerSummary {
    pub(crate) fn from_row(row: &Row, offset: usize) -> Result<Self> {
        let idx = offset as i32;
        Ok(Self {
            id: row.get(idx)?,
            username: row.get(idx + 1)?,
            fullname: row.get(idx + 2)?,
            avatar: row.get(idx + 3)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LikeStats {
    pub count: i64,
    pub viewer_liked: bool,
}

/// Output of the join stages for a single aggregated row.
#[derive(Debug, Clone)]
pub struct Joined {
    pub owner: OwnerSummary,
    pub likes: LikeStats,
}

/// Projection of a pipeline row into a public view document.
pub trait View: Sized {
    fn from_row(row: &Row, joined: Joined) -> Result<Self>;
}

fn read_joined(row: &Row, source: &Source, with_likes: bool) -> Result<Joined> {
    let owner_idx = source.owner_offset() as i32;
    let owner_id: Option<String> = row.get(owner_idx)?;
    if owner_id.is_none() {
        let doc_id: String = row.get(0)?;
        return Err(IntegrityError(format!(
            "{} {doc_id} references a missing owner",
            source.table
        ))
        .into());
    }
    let owner = OwnerSummary::from_row(row, source.owner_offset())?;

    let likes = if with_likes {
        let idx = source.likes_offset() as i32;
        LikeStats {
            count: row.get(idx)?,
            viewer_liked: row.get::<i64>(idx + 1)? != 0,
        }
    } else {
        LikeStats::default()
    };
    Ok(Joined { owner, likes })
}

/// Write transaction bound to the writer gate.
pub struct WriteTx<'a> {
    tx: Transaction,
    _gate: MutexGuard<'a, Connection>,
}

impl WriteTx<'_> {
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.context("committing transaction")
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.context("rolling back transaction")
    }
}

impl Deref for WriteTx<'_> {
    type Target = Transaction;

    fn deref(&self) -> &Self::Target {
        &self.tx
    }
}

pub struct Store {
    conn: Connection,
    writer: Mutex<Connection>,
}

impl Store {
    /// Opens (creating if needed) the database file and provisions the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening database {}", path.display()))?;
        let writer = db.connect()?;
        configure_connection(&writer).await?;
        ensure_schema(&writer).await?;
        let conn = db.connect()?;
        configure_connection(&conn).await?;

        Ok(Self {
            conn,
            writer: Mutex::new(writer),
        })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) async fn begin_write(&self) -> Result<WriteTx<'_>> {
        let gate = self.writer.lock().await;
        let tx = gate
            .transaction()
            .await
            .context("starting write transaction")?;
        Ok(WriteTx { tx, _gate: gate })
    }

    /// Runs a pipeline and returns the requested page together with the
    /// total number of matching documents.
    pub async fn aggregate<V: View>(
        &self,
        pipeline: &Pipeline,
        page: PageRequest,
    ) -> Result<Page<V>> {
        let count = pipeline.compile_count();
        let total = self.count(&count.sql, count.params).await?;

        let query = pipeline.compile_page(page);
        let mut rows = self
            .conn
            .query(&query.sql, Params::Positional(query.params))
            .await
            .with_context(|| format!("aggregating {}", pipeline.source().table))?;

        let mut docs = Vec::new();
        while let Some(row) = rows.next().await? {
            let joined = read_joined(&row, pipeline.source(), pipeline.has_likes())?;
            docs.push(V::from_row(&row, joined)?);
        }
        Ok(Page::new(docs, total, page))
    }

    /// Runs a pipeline expected to match at most one document.
    pub async fn aggregate_one<V: View>(&self, pipeline: &Pipeline) -> Result<Option<V>> {
        let page = self
            .aggregate::<V>(pipeline, PageRequest { page: 1, limit: 1 })
            .await?;
        Ok(page.docs.into_iter().next())
    }

    /// Runs a pipeline without a page window.
    pub async fn aggregate_all<V: View>(&self, pipeline: &Pipeline) -> Result<Vec<V>> {
        let page = self
            .aggregate::<V>(
                pipeline,
                PageRequest {
                    page: 1,
                    limit: u32::MAX,
                },
            )
            .await?;
        Ok(page.docs)
    }

    pub(crate) async fn count(&self, sql: &str, params: Vec<Value>) -> Result<u64> {
        let mut rows = self.conn.query(sql, Params::Positional(params)).await?;
        let row = rows.next().await?.context("count query returned no row")?;
        let total: i64 = row.get(0)?;
        Ok(total.max(0) as u64)
    }

    pub(crate) async fn exists(&self, table: &str, id: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT 1 FROM {table} WHERE id = ?1"),
                libsql::params![id],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }
}
