//! Filesystem helpers for staging inputs and publishing outputs.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Move a file, surviving cross-filesystem boundaries.
///
/// Attempts a fast rename first. On EXDEV the file is copied to a
/// temporary name next to the destination and renamed into place, so
/// readers never observe a partially written destination.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            debug!(
                src = %src.display(),
                dst = %dst.display(),
                "cross-device rename, falling back to copy"
            );
            copy_and_delete(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

// EXDEV is errno 18 on Linux and macOS.
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}

async fn copy_and_delete(src: &Path, dst: &Path) -> MediaResult<()> {
    // Stage next to dst so the final rename stays on one filesystem.
    let tmp_dst = dst.with_extension("tmp");

    fs::copy(src, &tmp_dst).await?;

    if let Err(e) = fs::rename(&tmp_dst, dst).await {
        let _ = fs::remove_file(&tmp_dst).await;
        return Err(MediaError::from(e));
    }

    // Source removal is best effort.
    if let Err(e) = fs::remove_file(src).await {
        warn!(src = %src.display(), error = %e, "failed to remove source after move");
    }

    Ok(())
}

/// Copy a source into the staging directory under a sanitized name
/// prefixed with the clip index. The prefix keeps same-named sources
/// from different directories from clobbering each other. Returns the
/// staged path.
pub async fn stage_copy(
    src: impl AsRef<Path>,
    staging_dir: impl AsRef<Path>,
    index: usize,
) -> MediaResult<PathBuf> {
    let src = src.as_ref();
    let staging_dir = staging_dir.as_ref();

    let name = src
        .file_name()
        .map(|n| sanitize_name(&n.to_string_lossy()))
        .ok_or_else(|| MediaError::InvalidMedia(format!("no file name: {}", src.display())))?;

    fs::create_dir_all(staging_dir).await?;
    let staged = staging_dir.join(format!("{index:03}_{name}"));
    fs::copy(src, &staged).await?;
    Ok(staged)
}

/// Reduce a file name to a conservative character set.
///
/// Alphanumerics, `-`, `_` and `.` pass through; everything else becomes
/// `_`. Keeps staged names safe inside concat lists and filter args.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches(|c| c == '.' || c == '_').is_empty() {
        "media".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_move_file_same_filesystem() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.mp4");
        let dst = dir.path().join("b.mp4");

        fs::write(&src, b"payload").await.unwrap();
        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_move_file_creates_parents() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.mp4");
        let dst = dir.path().join("out").join("final").join("b.mp4");

        fs::write(&src, b"x").await.unwrap();
        move_file(&src, &dst).await.unwrap();
        assert!(dst.exists());
    }

    #[tokio::test]
    async fn test_move_file_overwrites() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.mp4");
        let dst = dir.path().join("b.mp4");

        fs::write(&src, b"new").await.unwrap();
        fs::write(&dst, b"old").await.unwrap();
        move_file(&src, &dst).await.unwrap();
        assert_eq!(fs::read(&dst).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_stage_copy_sanitizes() {
        let dir = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let src = dir.path().join("my clip (1).mp4");
        fs::write(&src, b"data").await.unwrap();

        let staged = stage_copy(&src, staging.path(), 0).await.unwrap();
        assert_eq!(staged.file_name().unwrap(), "000_my_clip__1_.mp4");
        assert!(src.exists(), "staging copies, never moves the source");
        assert_eq!(fs::read(&staged).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_stage_copy_same_names_do_not_collide() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();

        // Camera rolls split across folders reuse file names.
        let src_a = dir_a.path().join("IMG_0001.jpg");
        let src_b = dir_b.path().join("IMG_0001.jpg");
        fs::write(&src_a, b"first").await.unwrap();
        fs::write(&src_b, b"second").await.unwrap();

        let staged_a = stage_copy(&src_a, staging.path(), 0).await.unwrap();
        let staged_b = stage_copy(&src_b, staging.path(), 1).await.unwrap();

        assert_ne!(staged_a, staged_b);
        assert_eq!(fs::read(&staged_a).await.unwrap(), b"first");
        assert_eq!(fs::read(&staged_b).await.unwrap(), b"second");
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("IMG_2024-06-01.jpg"), "IMG_2024-06-01.jpg");
        assert_eq!(sanitize_name("fête à paris.mov"), "f_te___paris.mov");
        assert_eq!(sanitize_name("..."), "media");
    }

    #[test]
    fn test_is_cross_device_error() {
        assert!(is_cross_device_error(&std::io::Error::from_raw_os_error(18)));
        assert!(!is_cross_device_error(&std::io::Error::from_raw_os_error(2)));
    }
}
