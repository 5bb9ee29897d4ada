#![forbid(unsafe_code)]

//! Startup checks for the processes that write uploads and the database.
//!
//! Everything below `MEDIA_ROOT` is served back to clients over `/media`,
//! and the database file sits next to it. If one run happens as root, the
//! files it creates stay root-owned, and the next unprivileged run can no
//! longer replace or purge them. The queued deletions would then fail forever.

use std::os::unix::fs::MetadataExt;
use std::path::Path;

use anyhow::{Context, Result, bail};
use nix::unistd::Uid;

/// Fails when `process` runs as root.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!("{process} must not be run as root; start it from a dedicated service account");
    }
    Ok(())
}

/// Fails when an existing media or database path is owned by root, which
/// means an earlier run skipped [`ensure_not_root`]. Missing paths pass;
/// they are created by the service account.
pub fn ensure_not_root_owned(path: &Path) -> Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) => reject_root_owner(path, Uid::from_raw(meta.uid())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("inspecting {}", path.display())),
    }
}

fn reject_root_owner(path: &Path, owner: Uid) -> Result<()> {
    if owner.is_root() {
        bail!(
            "{} is owned by root; chown it to the service account before starting",
            path.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_unprivileged_uid() {
        assert!(ensure_not_root_for(Uid::from_raw(1000), "vidtube").is_ok());
    }

    #[test]
    fn rejects_root_uid() {
        let err = ensure_not_root_for(Uid::from_raw(0), "vidtube").unwrap_err();
        assert!(err.to_string().contains("must not be run as root"));
    }

    #[test]
    fn root_owned_media_is_rejected() {
        let media = Path::new("/srv/vidtube/media");
        assert!(reject_root_owner(media, Uid::from_raw(1000)).is_ok());
        let err = reject_root_owner(media, Uid::from_raw(0)).unwrap_err();
        assert!(err.to_string().contains("/srv/vidtube/media is owned by root"));
    }

    #[test]
    fn missing_paths_pass() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ensure_not_root_owned(&dir.path().join("not-created-yet")).is_ok());
    }
}
