//! File resolver module for locating comic archives
//!
//! This module finds the `.cbz`/`.cbr` files of a series folder and expands a
//! parent folder into its series folders.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extensions treated as comic archives (compared case-insensitively)
pub const ARCHIVE_EXTENSIONS: &[&str] = &["cbz", "cbr"];

/// Errors that can occur during file resolution
#[derive(Debug, Error)]
pub enum FileResolverError {
    /// Path is not a directory
    #[error("Path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Failed to read directory
    #[error("Failed to read directory {path}: {source}")]
    ReadDirectoryFailed { path: PathBuf, source: io::Error },

    /// Failed to read directory entry
    #[error("Failed to read directory entry: {0}")]
    ReadEntryFailed(#[from] io::Error),
}

/// A comic archive found in a series folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComicArchive {
    /// Path to the archive file
    pub path: PathBuf,
}

impl ComicArchive {
    /// File name for display purposes
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

fn read_dir_sorted(dir_path: &Path) -> Result<Vec<PathBuf>, FileResolverError> {
    if !dir_path.is_dir() {
        return Err(FileResolverError::NotADirectory(dir_path.to_path_buf()));
    }

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir_path).map_err(|e| FileResolverError::ReadDirectoryFailed {
        path: dir_path.to_path_buf(),
        source: e,
    })? {
        paths.push(entry?.path());
    }

    paths.sort();
    Ok(paths)
}

fn has_archive_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            ARCHIVE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// Lists the comic archives directly inside `dir_path`, sorted by name.
///
/// Subdirectories are not descended into; every series folder is its own task.
pub fn scan_for_archives(dir_path: &Path) -> Result<Vec<ComicArchive>, FileResolverError> {
    Ok(read_dir_sorted(dir_path)?
        .into_iter()
        .filter(|path| path.is_file() && has_archive_extension(path))
        .map(|path| ComicArchive { path })
        .collect())
}

/// Expands a parent folder into its immediate subfolders, sorted by name.
pub fn collect_series_folders(parent: &Path) -> Result<Vec<PathBuf>, FileResolverError> {
    Ok(read_dir_sorted(parent)?
        .into_iter()
        .filter(|path| path.is_dir())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};

    #[test]
    fn test_scan_nonexistent_directory() {
        let result = scan_for_archives(Path::new("/nonexistent/path/that/does/not/exist"));
        assert!(matches!(result, Err(FileResolverError::NotADirectory(_))));
    }

    #[test]
    fn test_scan_file_instead_of_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("test_file.txt");
        File::create(&file).unwrap();

        assert!(scan_for_archives(&file).is_err());
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["v02.cbz", "v01.CBR", "cover.jpg", "notes.txt"] {
            File::create(dir.path().join(name)).unwrap();
        }
        fs::create_dir(dir.path().join("extras.cbz")).unwrap();

        let names: Vec<_> = scan_for_archives(dir.path())
            .unwrap()
            .iter()
            .map(ComicArchive::file_name)
            .collect();
        assert_eq!(names, vec!["v01.CBR", "v02.cbz"]);
    }

    #[test]
    fn test_collect_series_folders() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("Monster")).unwrap();
        fs::create_dir(dir.path().join("Berserk")).unwrap();
        File::create(dir.path().join("loose.cbz")).unwrap();

        let folders = collect_series_folders(dir.path()).unwrap();
        assert_eq!(
            folders,
            vec![dir.path().join("Berserk"), dir.path().join("Monster")]
        );
    }
}
