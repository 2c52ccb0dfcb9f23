//! Filesystem helpers for the JSON-backed stores.

use std::path::{Path, PathBuf};

use crate::error::{Result, StockdeskError};

/// Sibling temp file used while `path` is being replaced.
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("data");
    path.with_file_name(format!(".{}.tmp.{}", name, std::process::id()))
}

/// Replace the contents of `path` with `data`.
///
/// The bytes go to a sibling temp file which is then renamed over `path`, so
/// readers see either the old file or the new one, never a partial write.
/// Callers must serialize writes to the same path.
pub async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let storage = |e: std::io::Error| StockdeskError::Storage(format!("{}: {}", path.display(), e));

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(storage)?;
    }
    let tmp = temp_path(path);
    if let Err(e) = tokio::fs::write(&tmp, data).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(storage(e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(storage(e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_atomic_creates_parents_and_replaces() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a").join("b.json");
        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_write_atomic_onto_directory_fails_cleanly() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("records.json");
        std::fs::create_dir_all(&path).unwrap();
        let err = write_atomic(&path, b"{}").await.unwrap_err();
        assert!(matches!(err, StockdeskError::Storage(_)));
        assert!(!temp_path(&path).exists());
    }
}
