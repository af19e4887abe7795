//! Archive adapter for comic book archives
//!
//! `.cbz` files are zip archives and are read and rewritten in-process.
//! `.cbr` files are RAR archives; they can only be read through an external
//! extractor and are never written. To add entries to one, convert it with
//! [`convert_to_zip`] first.

mod rar;
mod zip_archive;

pub use rar::{
    DEFAULT_EXTRACT_TIMEOUT, OriginalPolicy, RarHandle, RarTool, RarToolKind, ToolLocator,
    convert_to_zip, converted_path,
};
pub use zip_archive::ZipHandle;

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the metadata entry at the archive root
pub const COMIC_INFO_ENTRY: &str = "ComicInfo.xml";

/// Name of the cover entry at the archive root
pub const COVER_ENTRY: &str = "cover.jpg";

/// Errors that can occur while working with archives
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The file is neither a zip nor a RAR archive, or the operation is not
    /// possible for its format
    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(PathBuf),

    /// The requested entry does not exist in the archive
    #[error("Entry '{name}' not found in {archive}")]
    EntryNotFound { archive: PathBuf, name: String },

    /// RAR extraction or repacking failed
    #[error("Failed to convert {path}: {reason}")]
    ConversionError { path: PathBuf, reason: String },

    /// None of the supported extraction tools is installed
    #[error("No RAR extraction tool found on PATH. Install one of: {tools}")]
    ToolMissing { tools: String },

    /// Failed to read the archive
    #[error("Failed to read {path}: {source}")]
    ReadFailed { path: PathBuf, source: io::Error },

    /// Failed to write the archive
    #[error("Failed to write {path}: {source}")]
    WriteFailed { path: PathBuf, source: io::Error },

    /// The zip library rejected the archive
    #[error("Invalid zip archive {path}: {source}")]
    Zip {
        path: PathBuf,
        source: zip::result::ZipError,
    },
}

/// Container format of an archive, detected from its content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Rar,
}

impl ArchiveFormat {
    /// Detects the container format from the file's magic bytes.
    ///
    /// The extension is ignored on purpose: `.cbr` files that are really zip
    /// archives are common and can be written directly.
    pub fn detect(path: &Path) -> Result<Self, ArchiveError> {
        const BUFFER_SIZE: usize = 8192;

        let mut file = File::open(path).map_err(|e| ArchiveError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut buffer = vec![0u8; BUFFER_SIZE];
        let bytes_read = file.read(&mut buffer).map_err(|e| ArchiveError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        buffer.truncate(bytes_read);

        if infer::archive::is_zip(&buffer) {
            Ok(ArchiveFormat::Zip)
        } else if infer::archive::is_rar(&buffer) {
            Ok(ArchiveFormat::Rar)
        } else {
            Err(ArchiveError::UnsupportedFormat(path.to_path_buf()))
        }
    }
}

/// An open archive.
///
/// The handle owns its file descriptor and, for RAR archives, the temporary
/// extraction directory. Both are released when the handle is dropped.
#[derive(Debug)]
pub enum ArchiveHandle {
    Zip(ZipHandle),
    Rar(RarHandle),
}

impl ArchiveHandle {
    /// Opens an archive, detecting its format from the content.
    ///
    /// `locator` is used to find an extractor if the archive turns out to be
    /// RAR and its entries are accessed.
    pub fn open(path: &Path, locator: &ToolLocator) -> Result<Self, ArchiveError> {
        match ArchiveFormat::detect(path)? {
            ArchiveFormat::Zip => Ok(ArchiveHandle::Zip(ZipHandle::open(path)?)),
            ArchiveFormat::Rar => Ok(ArchiveHandle::Rar(RarHandle::new(path, locator.clone()))),
        }
    }

    pub fn format(&self) -> ArchiveFormat {
        match self {
            ArchiveHandle::Zip(_) => ArchiveFormat::Zip,
            ArchiveHandle::Rar(_) => ArchiveFormat::Rar,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            ArchiveHandle::Zip(handle) => handle.path(),
            ArchiveHandle::Rar(handle) => handle.path(),
        }
    }

    /// Lists the names of all file entries
    pub fn list_entries(&mut self) -> Result<Vec<String>, ArchiveError> {
        match self {
            ArchiveHandle::Zip(handle) => handle.list_entries(),
            ArchiveHandle::Rar(handle) => handle.list_entries(),
        }
    }

    /// Reads an entry's bytes
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        match self {
            ArchiveHandle::Zip(handle) => handle.read_entry(name),
            ArchiveHandle::Rar(handle) => handle.read_entry(name),
        }
    }

    /// Writes a single entry, replacing an existing one with the same name
    pub fn write_entry(&mut self, name: &str, data: &[u8]) -> Result<(), ArchiveError> {
        self.write_entries(&[(name, data)])
    }

    /// Writes several entries in one rewrite of the archive.
    ///
    /// Fails with [`ArchiveError::UnsupportedFormat`] for RAR archives.
    pub fn write_entries(&mut self, entries: &[(&str, &[u8])]) -> Result<(), ArchiveError> {
        match self {
            ArchiveHandle::Zip(handle) => handle.write_entries(entries),
            ArchiveHandle::Rar(handle) => Err(ArchiveError::UnsupportedFormat(handle.path().to_path_buf())),
        }
    }
}

/// Returns true if any entry is a Windows thumbnail cache.
///
/// Archives carrying a `Thumbs.db` are left without an injected cover.
pub fn has_thumbs_db<S: AsRef<str>>(names: &[S]) -> bool {
    names
        .iter()
        .any(|name| name.as_ref().to_ascii_lowercase().ends_with("thumbs.db"))
}

/// True if `entry` should be dropped because `replacements` contains the same name
fn is_replaced(entry: &str, replacements: &[(&str, &[u8])]) -> bool {
    replacements
        .iter()
        .any(|(name, _)| name.eq_ignore_ascii_case(entry))
}

/// Recursively collects all files below `root` as (absolute path, relative
/// `/`-separated name), sorted by name.
fn collect_files(root: &Path) -> io::Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    collect_files_recursive(root, root, &mut files)?;
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

fn collect_files_recursive(
    root: &Path,
    dir: &Path,
    files: &mut Vec<(PathBuf, String)>,
) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();

        if path.is_dir() {
            collect_files_recursive(root, &path, files)?;
        } else if path.is_file() {
            let relative = path
                .strip_prefix(root)
                .map_err(|e| io::Error::other(e.to_string()))?
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            files.push((path, relative));
        }
    }

    Ok(())
}
