//! Input tree listing.
//!
//! Stages list their whole input root up front and work from the sorted
//! relative paths, so discovery order never depends on the filesystem.

use std::path::{Path, PathBuf};

use snafu::ResultExt;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{ListingError, ListingJoinSnafu, WalkSnafu};

/// List every regular file under `root`, relative to `root`, sorted.
///
/// Symbolic links are followed, since input roots are usually the linked
/// output of an earlier stage.
pub async fn list_files(root: &Path) -> Result<Vec<PathBuf>, ListingError> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || list_files_blocking(&root))
        .await
        .context(ListingJoinSnafu)?
}

/// Blocking form of [`list_files`].
pub fn list_files_blocking(root: &Path) -> Result<Vec<PathBuf>, ListingError> {
    if !root.is_dir() {
        return Err(ListingError::MissingRoot {
            path: root.to_path_buf(),
        });
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.context(WalkSnafu { path: root })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            files.push(relative.to_path_buf());
        }
    }

    files.sort();
    debug!(root = %root.display(), files = files.len(), "Listed input root");
    Ok(files)
}

/// List the immediate subdirectory names of `dir`, sorted. A missing
/// directory lists as empty.
pub async fn list_dirs(dir: &Path) -> Result<Vec<String>, ListingError> {
    let mut names = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(_) => {
            return Err(ListingError::MissingRoot {
                path: dir.to_path_buf(),
            });
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let is_dir = tokio::fs::metadata(entry.path())
            .await
            .is_ok_and(|m| m.is_dir());
        if !is_dir {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_list_files_sorted_relative() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("prt/2020/01/06/LOC/data")).unwrap();
        std::fs::create_dir_all(root.join("prt/2020/01/05/LOC/data")).unwrap();
        std::fs::write(root.join("prt/2020/01/06/LOC/data/b"), "").unwrap();
        std::fs::write(root.join("prt/2020/01/05/LOC/data/a"), "").unwrap();
        std::fs::create_dir_all(root.join("prt/empty")).unwrap();

        let files = list_files(root).await.unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("prt/2020/01/05/LOC/data/a"),
                PathBuf::from("prt/2020/01/06/LOC/data/b"),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_files_missing_root() {
        let temp = TempDir::new().unwrap();
        let err = list_files(&temp.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, ListingError::MissingRoot { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_files_follows_links() {
        let temp = TempDir::new().unwrap();
        let real = temp.path().join("real.bin");
        std::fs::write(&real, "x").unwrap();
        let root = temp.path().join("root");
        std::fs::create_dir_all(root.join("a")).unwrap();
        std::os::unix::fs::symlink(&real, root.join("a/linked.bin")).unwrap();

        let files = list_files(&root).await.unwrap();
        assert_eq!(files, vec![PathBuf::from("a/linked.bin")]);
    }

    #[tokio::test]
    async fn test_list_dirs() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("b")).unwrap();
        std::fs::create_dir_all(temp.path().join("a")).unwrap();
        std::fs::write(temp.path().join("file"), "").unwrap();

        assert_eq!(list_dirs(temp.path()).await.unwrap(), vec!["a", "b"]);
        assert!(list_dirs(&temp.path().join("missing")).await.unwrap().is_empty());
    }
}
