//! Zip (`.cbz`) archive access

use super::{ArchiveError, is_replaced};
use crate::temp::sibling_temp_file;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// An open zip archive.
///
/// The underlying reader is dropped before the archive is replaced on disk
/// and reopened lazily on the next access.
#[derive(Debug)]
pub struct ZipHandle {
    path: PathBuf,
    archive: Option<ZipArchive<File>>,
}

impl ZipHandle {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let mut handle = Self {
            path: path.to_path_buf(),
            archive: None,
        };
        handle.archive()?;
        Ok(handle)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn zip_error(&self, source: ZipError) -> ArchiveError {
        ArchiveError::Zip {
            path: self.path.clone(),
            source,
        }
    }

    fn archive(&mut self) -> Result<&mut ZipArchive<File>, ArchiveError> {
        if self.archive.is_none() {
            let file = File::open(&self.path).map_err(|e| ArchiveError::ReadFailed {
                path: self.path.clone(),
                source: e,
            })?;
            let archive = ZipArchive::new(file).map_err(|e| self.zip_error(e))?;
            self.archive = Some(archive);
        }

        match self.archive.as_mut() {
            Some(archive) => Ok(archive),
            None => Err(ArchiveError::UnsupportedFormat(self.path.clone())),
        }
    }

    /// Lists file entries in archive order, skipping directory entries
    pub fn list_entries(&mut self) -> Result<Vec<String>, ArchiveError> {
        Ok(self
            .archive()?
            .file_names()
            .filter(|name| !name.ends_with('/'))
            .map(str::to_string)
            .collect())
    }

    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        let path = self.path.clone();
        let archive = self.archive()?;

        let mut entry = match archive.by_name(name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => {
                return Err(ArchiveError::EntryNotFound {
                    archive: path,
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(ArchiveError::Zip { path, source: e }),
        };

        let mut data = Vec::with_capacity(initial_capacity(entry.size()));
        entry
            .read_to_end(&mut data)
            .map_err(|e| ArchiveError::ReadFailed { path, source: e })?;
        Ok(data)
    }

    /// Rewrites the archive with `entries` added.
    ///
    /// Existing entries whose names match one of `entries` (ignoring ASCII
    /// case) are dropped; every other entry is copied without recompression.
    /// The new archive is staged next to the original and renamed over it, so
    /// a failure leaves the original untouched.
    pub fn write_entries(&mut self, entries: &[(&str, &[u8])]) -> Result<(), ArchiveError> {
        let write_failed = |path: &Path, e| ArchiveError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        };

        let mut staged = sibling_temp_file(&self.path, "tmp").map_err(|e| write_failed(&self.path, e))?;
        let file = File::create(&*staged).map_err(|e| write_failed(&staged, e))?;
        let mut writer = ZipWriter::new(BufWriter::new(file));

        {
            let path = self.path.clone();
            let archive = self.archive()?;
            for index in 0..archive.len() {
                let entry = archive
                    .by_index_raw(index)
                    .map_err(|e| ArchiveError::Zip { path: path.clone(), source: e })?;
                if is_replaced(entry.name(), entries) {
                    continue;
                }
                writer
                    .raw_copy_file(entry)
                    .map_err(|e| ArchiveError::Zip { path: path.clone(), source: e })?;
            }
        }

        for (name, data) in entries {
            writer
                .start_file(*name, entry_options(name))
                .map_err(|e| self.zip_error(e))?;
            writer.write_all(data).map_err(|e| write_failed(&staged, e))?;
        }

        let mut inner = writer.finish().map_err(|e| self.zip_error(e))?;
        inner.flush().map_err(|e| write_failed(&staged, e))?;
        drop(inner);

        // Release our reader before replacing the file underneath it
        self.archive = None;
        staged
            .persist(&self.path)
            .map_err(|e| write_failed(&self.path, e))?;

        tracing::debug!(archive = %self.path.display(), written = entries.len(), "archive rewritten");
        Ok(())
    }
}

/// Largest buffer reserved up front for an entry
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

/// The header's declared size is untrusted; reading grows the buffer past the cap if needed
fn initial_capacity(declared_size: u64) -> usize {
    usize::try_from(declared_size.min(MAX_PREALLOC)).unwrap_or(0)
}

/// Images are already compressed; everything else is deflated
fn entry_options(name: &str) -> SimpleFileOptions {
    let lowered = name.to_ascii_lowercase();
    let method = if [".jpg", ".jpeg", ".png", ".webp", ".gif"]
        .iter()
        .any(|ext| lowered.ends_with(ext))
    {
        CompressionMethod::Stored
    } else {
        CompressionMethod::Deflated
    };

    SimpleFileOptions::default()
        .compression_method(method)
        .unix_permissions(0o644)
}

/// Writes a fresh zip at `destination` from files on disk plus extra entries.
///
/// Used when repacking an extracted RAR archive. Pages are stored, not
/// recompressed. Files whose names collide with `extra` are skipped.
pub(super) fn write_new_zip(
    destination: &Path,
    files: &[(PathBuf, String)],
    extra: &[(&str, &[u8])],
) -> Result<(), ArchiveError> {
    let write_failed = |path: &Path, e| ArchiveError::WriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    let zip_error = |e| ArchiveError::Zip {
        path: destination.to_path_buf(),
        source: e,
    };

    let mut staged = sibling_temp_file(destination, "tmp").map_err(|e| write_failed(destination, e))?;
    let file = File::create(&*staged).map_err(|e| write_failed(&staged, e))?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let stored = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .unix_permissions(0o644);

    for (path, name) in files {
        if is_replaced(name, extra) {
            continue;
        }
        let data = std::fs::read(path).map_err(|e| ArchiveError::ReadFailed {
            path: path.clone(),
            source: e,
        })?;
        writer.start_file(name.as_str(), stored).map_err(zip_error)?;
        writer.write_all(&data).map_err(|e| write_failed(&staged, e))?;
    }

    for (name, data) in extra {
        writer.start_file(*name, entry_options(name)).map_err(zip_error)?;
        writer.write_all(data).map_err(|e| write_failed(&staged, e))?;
    }

    let mut inner = writer.finish().map_err(zip_error)?;
    inner.flush().map_err(|e| write_failed(&staged, e))?;
    drop(inner);

    staged
        .persist(destination)
        .map_err(|e| write_failed(destination, e))
}
