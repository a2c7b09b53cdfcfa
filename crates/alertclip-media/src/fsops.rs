//! Filesystem helpers for job directories.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Find the first file in `dir` whose stem matches `stem` regardless
/// of extension (yt-dlp decides the container, so acquisition writes
/// `clip.%(ext)s` and callers look the result up afterwards).
pub async fn find_by_stem(dir: impl AsRef<Path>, stem: &str) -> MediaResult<Option<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Ok(None);
    }

    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_file()
            && path
                .file_stem()
                .map(|s| s.to_string_lossy() == stem)
                .unwrap_or(false)
        {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// Create a directory and all parents.
pub async fn ensure_dir(dir: impl AsRef<Path>) -> MediaResult<()> {
    fs::create_dir_all(dir.as_ref()).await.map_err(MediaError::from)
}

/// Remove a directory tree, tolerating its absence.
pub async fn remove_dir_if_exists(dir: impl AsRef<Path>) -> MediaResult<()> {
    let dir = dir.as_ref();
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(MediaError::from(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_find_by_stem() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("clip.webm"), b"x").await.unwrap();
        fs::write(dir.path().join("audio.wav"), b"x").await.unwrap();

        let found = find_by_stem(dir.path(), "clip").await.unwrap().unwrap();
        assert_eq!(found.file_name().unwrap(), "clip.webm");

        assert!(find_by_stem(dir.path(), "missing").await.unwrap().is_none());
        assert!(find_by_stem(dir.path().join("nope"), "clip")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_remove_dir_if_exists() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("job");
        ensure_dir(&target).await.unwrap();
        assert!(target.exists());

        remove_dir_if_exists(&target).await.unwrap();
        assert!(!target.exists());

        // Second removal is a no-op
        remove_dir_if_exists(&target).await.unwrap();
    }
}
