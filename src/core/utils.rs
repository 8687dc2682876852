//! File helpers shared by the caches and installers

use std::path::{Path, PathBuf};

/// Sibling temp path used while a file is being written
///
/// Lives in the same directory as `target` so the final rename never crosses filesystems.
pub fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}

/// Write `bytes` to `target` through a temp file and rename
pub fn write_atomic(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let temp = temp_path_for(target);
    if let Err(e) = std::fs::write(&temp, bytes).and_then(|_| std::fs::rename(&temp, target)) {
        let _ = std::fs::remove_file(&temp);
        return Err(e);
    }
    Ok(())
}

/// Async variant of [`write_atomic`]
pub async fn write_atomic_async(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let temp = temp_path_for(target);
    let result = match tokio::fs::write(&temp, bytes).await {
        Ok(()) => tokio::fs::rename(&temp, target).await,
        Err(e) => Err(e),
    };
    if result.is_err() {
        let _ = tokio::fs::remove_file(&temp).await;
    }
    result
}

/// Make an identifier safe to use as a file name
pub fn sanitize_file_name(id: &str) -> String {
    id.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|', '.'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested").join("value.json");

        write_atomic(&target, b"{\"a\":1}").unwrap();
        write_atomic(&target, b"{\"a\":2}").unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"{\"a\":2}");
        let entries: Vec<_> = std::fs::read_dir(target.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_write_atomic_async() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("icon.png");

        write_atomic_async(&target, &[1, 2, 3]).await.unwrap();
        assert_eq!(tokio::fs::read(&target).await.unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let temp = temp_path_for(Path::new("/tmp/icons/acme.png"));
        assert_eq!(temp.parent(), Some(Path::new("/tmp/icons")));
        assert!(temp.file_name().unwrap().to_string_lossy().starts_with(".acme.png."));
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_file_name("acme-reader"), "acme-reader");
    }
}
