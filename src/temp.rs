//! Temporary file management module
//!
//! This module provides RAII-based temporary file and directory handling with
//! automatic cleanup. Archive rewrites stage their output in a temporary file
//! next to the target and RAR extraction unpacks into a temporary directory.

use std::fs;
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};

/// Guard for temporary resources that automatically cleans up on drop
#[derive(Debug)]
pub(crate) enum TempGuard {
    /// Temporary file that will be deleted when dropped
    File(PathBuf),
    /// Temporary directory that will be removed recursively when dropped
    Directory(PathBuf),
    /// The resource was moved into its final place and must not be removed
    Persisted(PathBuf),
}

impl TempGuard {
    /// Get the path to the temporary resource
    pub(crate) fn path(&self) -> &Path {
        match self {
            TempGuard::File(path) | TempGuard::Directory(path) | TempGuard::Persisted(path) => path,
        }
    }

    /// Atomically moves a temporary file over `destination`.
    ///
    /// After a successful rename the guard no longer owns anything on disk.
    /// On failure the temporary file is still cleaned up when the guard drops.
    pub(crate) fn persist(&mut self, destination: &Path) -> io::Result<()> {
        fs::rename(self.path(), destination)?;
        *self = TempGuard::Persisted(destination.to_path_buf());
        Ok(())
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        match self {
            TempGuard::File(path) => {
                // Silently ignore errors during cleanup
                let _ = fs::remove_file(path);
            }
            TempGuard::Directory(path) => {
                let _ = fs::remove_dir_all(path);
            }
            TempGuard::Persisted(_) => {}
        }
    }
}

impl Deref for TempGuard {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        self.path()
    }
}

fn unique_name(prefix: &str, extension: Option<&str>) -> String {
    // ULIDs are monotonic and sortable, which keeps leftovers easy to spot
    let ulid = ulid::Ulid::new();
    match extension {
        Some(ext) => format!("{}_{}.{}", prefix, ulid, ext),
        None => format!("{}_{}", prefix, ulid),
    }
}

/// Reserves a temporary file path in the same directory as `target`.
///
/// Staging next to the target keeps the final `rename` on one filesystem, so
/// replacing the target is atomic. The file itself is not created; whoever
/// writes it owns the contents, the guard owns the cleanup.
///
/// # Examples
///
/// ```ignore
/// let mut staged = sibling_temp_file(Path::new("/manga/vol1.cbz"), "tmp")?;
/// fs::write(&*staged, b"...")?;
/// staged.persist(Path::new("/manga/vol1.cbz"))?;
/// ```
pub(crate) fn sibling_temp_file(target: &Path, extension: &str) -> io::Result<TempGuard> {
    let parent = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let stem = target
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("archive");

    Ok(TempGuard::File(
        parent.join(format!(".{}", unique_name(stem, Some(extension)))),
    ))
}

/// Creates a temporary directory and returns a guard that removes it on drop
///
/// The directory is created in the system's temporary directory with a unique
/// name generated using ULID.
pub(crate) fn create_temp_dir(prefix: &str) -> io::Result<TempGuard> {
    let path = std::env::temp_dir().join(unique_name(prefix, None));
    fs::create_dir_all(&path)?;
    Ok(TempGuard::Directory(path))
}
