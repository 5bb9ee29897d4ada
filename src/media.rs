#![forbid(unsafe_code)]

//! Media hosting collaborator.
//!
//! Uploaded files leave the request as URLs minted by a [`MediaHost`]. The
//! bundled [`LocalMediaHost`] keeps one copy per upload under the media root
//! and serves them back through the `/media` route.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::ids::new_id;
use crate::store::Store;
use crate::store::media_queue::PendingDeletion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Image => "image",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "video" => Some(Self::Video),
            "image" => Some(Self::Image),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadedMedia {
    pub url: String,
    pub public_id: String,
    /// Playback length in seconds, when the host could determine it.
    pub duration: Option<f64>,
}

#[async_trait]
pub trait MediaHost: Send + Sync {
    async fn upload(&self, local_path: &Path, kind: MediaKind) -> Result<UploadedMedia>;

    /// Removes a previously uploaded file. Deleting something that is already
    /// gone succeeds.
    async fn delete(&self, url: &str, kind: MediaKind) -> Result<()>;
}

/// Final path segment of a media URL, i.e. the host-side file name.
pub fn public_id_from_url(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .filter(|segment| is_safe_file_name(segment))
}

fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_'))
}

fn normalized_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    (!ext.is_empty() && ext.len() <= 8 && ext.chars().all(|ch| ch.is_ascii_alphanumeric()))
        .then_some(ext)
}

/// Stores uploads on the local filesystem as `{id}-{blake3}.{ext}`. Every
/// upload gets its own file, so deleting one resource's media never touches
/// another's even when the bytes are identical.
#[derive(Debug, Clone)]
pub struct LocalMediaHost {
    root: PathBuf,
    public_base_url: String,
}

impl LocalMediaHost {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn kind_dir(&self, kind: MediaKind) -> PathBuf {
        self.root.join(kind.as_str())
    }

    /// Maps a requested file name onto disk, refusing anything that could
    /// escape the kind directory.
    pub fn resolve(&self, kind: MediaKind, file: &str) -> Option<PathBuf> {
        is_safe_file_name(file).then(|| self.kind_dir(kind).join(file))
    }

    fn url_for(&self, kind: MediaKind, file: &str) -> String {
        format!("{}/media/{}/{}", self.public_base_url, kind.as_str(), file)
    }
}

async fn hash_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening upload {}", path.display()))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Asks `ffprobe` for the container duration. Missing binary or unreadable
/// output yields `None`.
async fn probe_duration(path: &Path) -> Option<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|duration| duration.is_finite() && *duration >= 0.0),
        Ok(output) => {
            tracing::debug!(status = %output.status, path = %path.display(), "ffprobe failed");
            None
        }
        Err(err) => {
            tracing::debug!(error = %err, "ffprobe unavailable");
            None
        }
    }
}

#[async_trait]
impl MediaHost for LocalMediaHost {
    async fn upload(&self, local_path: &Path, kind: MediaKind) -> Result<UploadedMedia> {
        let digest = hash_file(local_path).await?;
        let stem = format!("{}-{digest}", new_id());
        let public_id = match normalized_extension(local_path) {
            Some(ext) => format!("{stem}.{ext}"),
            None => stem,
        };

        let dir = self.kind_dir(kind);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
        let target = dir.join(&public_id);
        tokio::fs::copy(local_path, &target)
            .await
            .with_context(|| format!("storing {}", target.display()))?;

        let duration = match kind {
            MediaKind::Video => probe_duration(&target).await,
            MediaKind::Image => None,
        };
        tracing::debug!(kind = kind.as_str(), %public_id, "stored media");

        Ok(UploadedMedia {
            url: self.url_for(kind, &public_id),
            public_id,
            duration,
        })
    }

    async fn delete(&self, url: &str, kind: MediaKind) -> Result<()> {
        let Some(public_id) = public_id_from_url(url) else {
            bail!("cannot derive a media id from {url}");
        };
        let path = self.kind_dir(kind).join(public_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("removing {}", path.display())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub deleted: usize,
    pub failed: usize,
}

/// Deletes queued media files. Each entry leaves the queue only after the
/// host confirmed the delete; failures stay queued with the error recorded.
pub async fn purge(
    store: &Store,
    host: &dyn MediaHost,
    entries: &[PendingDeletion],
) -> PurgeReport {
    let mut report = PurgeReport::default();
    for entry in entries {
        match host.delete(&entry.url, entry.kind).await {
            Ok(()) => {
                report.deleted += 1;
                if let Err(err) = store.complete_media_deletion(&entry.id).await {
                    tracing::warn!(error = ?err, url = %entry.url, "failed to dequeue deleted media");
                }
            }
            Err(err) => {
                report.failed += 1;
                tracing::warn!(
                    error = %format!("{err:#}"),
                    url = %entry.url,
                    attempts = entry.attempts + 1,
                    "media deletion failed; left queued"
                );
                if let Err(store_err) = store
                    .fail_media_deletion(&entry.id, &format!("{err:#}"))
                    .await
                {
                    tracing::warn!(error = ?store_err, "failed to record media deletion failure");
                }
            }
        }
    }
    report
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryMediaHost;
    use super::*;
    use crate::store::testing::{temp_store, user, video};
    use crate::store::videos::NewVideo;

    #[test]
    fn public_id_takes_last_safe_segment() {
        assert_eq!(
            public_id_from_url("http://127.0.0.1:8000/media/image/abc.png?v=2"),
            Some("abc.png")
        );
        assert_eq!(public_id_from_url("http://host/media/image/.."), None);
        assert_eq!(public_id_from_url("http://host/media/image/"), None);
    }

    #[tokio::test]
    async fn local_host_stores_each_upload_separately() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let host = LocalMediaHost::new(dir.path().join("media"), "http://localhost:8000/");
        let first = dir.path().join("a.PNG");
        let second = dir.path().join("b.png");
        std::fs::write(&first, b"same bytes")?;
        std::fs::write(&second, b"same bytes")?;

        let a = host.upload(&first, MediaKind::Image).await?;
        let b = host.upload(&second, MediaKind::Image).await?;
        assert_ne!(a.public_id, b.public_id);
        let digest = blake3::hash(b"same bytes").to_hex().to_string();
        assert!(a.public_id.ends_with(&format!("-{digest}.png")));
        assert!(b.public_id.ends_with(&format!("-{digest}.png")));
        assert!(a.url.starts_with("http://localhost:8000/media/image/"));
        assert_eq!(a.duration, None);

        let stored = host.resolve(MediaKind::Image, &a.public_id).unwrap();
        assert_eq!(std::fs::read(&stored)?, b"same bytes");

        host.delete(&a.url, MediaKind::Image).await?;
        assert!(!stored.exists());
        host.delete(&a.url, MediaKind::Image).await?;
        let other = host.resolve(MediaKind::Image, &b.public_id).unwrap();
        assert_eq!(std::fs::read(&other)?, b"same bytes");
        Ok(())
    }

    #[test]
    fn resolve_rejects_traversal() {
        let host = LocalMediaHost::new("/srv/media", "http://localhost");
        assert!(host.resolve(MediaKind::Video, "../secret").is_none());
        assert!(host.resolve(MediaKind::Video, "a/b.mp4").is_none());
        assert!(host.resolve(MediaKind::Video, "abc.mp4").is_some());
    }

    #[tokio::test]
    async fn purge_keeps_failed_entries_queued() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let owner = user(&store, "owner").await?;
        let id = video(&store, &owner, "clip").await?;
        let queued = store.delete_video(&id, &owner).await?.unwrap();

        let host = MemoryMediaHost::default();
        host.failing_deletes(true);
        let report = purge(&store, &host, &queued).await;
        assert_eq!(report, PurgeReport { deleted: 0, failed: 2 });
        let pending = store.pending_media_deletions(10).await?;
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|entry| entry.attempts == 1));

        host.failing_deletes(false);
        let report = purge(&store, &host, &pending).await;
        assert_eq!(report.deleted, 2);
        assert!(store.pending_media_deletions(10).await?.is_empty());
        assert_eq!(host.deleted.lock().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn deleting_one_video_keeps_identical_media_of_another() -> Result<()> {
        let (dir, store) = temp_store().await?;
        let owner = user(&store, "owner").await?;
        let host = LocalMediaHost::new(dir.path().join("media"), "http://localhost:8000");
        let source = dir.path().join("thumb.png");
        std::fs::write(&source, b"identical thumbnail")?;

        let mut videos = Vec::new();
        for title in ["first", "second"] {
            let clip = dir.path().join(format!("{title}.mp4"));
            std::fs::write(&clip, title.as_bytes())?;
            let video_file = host.upload(&clip, MediaKind::Video).await?;
            let thumbnail = host.upload(&source, MediaKind::Image).await?;
            let record = store
                .insert_video(&NewVideo {
                    owner: owner.clone(),
                    title: title.into(),
                    description: String::new(),
                    video_file: video_file.url,
                    thumbnail: thumbnail.url,
                    duration: 1.0,
                })
                .await?;
            videos.push(record);
        }

        let queued = store.delete_video(&videos[0].id, &owner).await?.unwrap();
        let report = purge(&store, &host, &queued).await;
        assert_eq!(report, PurgeReport { deleted: 2, failed: 0 });

        let survivor = public_id_from_url(&videos[1].thumbnail).unwrap();
        let path = host.resolve(MediaKind::Image, survivor).unwrap();
        assert_eq!(std::fs::read(path)?, b"identical thumbnail");
        Ok(())
    }
}
