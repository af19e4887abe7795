//! Writes resolved metadata into comic archives
//!
//! For every archive of a folder the injector writes `ComicInfo.xml` and,
//! when enabled, `cover.jpg` at the archive root. RAR archives are converted
//! to zip first; a failed conversion leaves the original file untouched.

use crate::archive::{
    ArchiveError, ArchiveFormat, ArchiveHandle, COMIC_INFO_ENTRY, COVER_ENTRY, OriginalPolicy,
    ToolLocator, convert_to_zip, converted_path, has_thumbs_db,
};
use crate::comicinfo::render_comic_info;
use crate::metadata_retrieval::{MetadataProvider, MetadataRecord, TitlePreference};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while injecting metadata into one archive
#[derive(Debug, Error)]
pub enum InjectError {
    /// A `.cbr` needs converting but no extractor is installed
    #[error("No RAR extraction tool found on PATH. Install one of: {tools}")]
    ToolMissing { tools: String },

    /// The RAR archive could not be converted; the original is untouched
    #[error("Failed to convert {path}: {reason}")]
    ConversionError { path: PathBuf, reason: String },

    /// The archive could not be read or rewritten
    #[error("Failed to write metadata into {path}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: ArchiveError,
    },
}

impl InjectError {
    fn from_archive(path: &Path, error: ArchiveError) -> Self {
        match error {
            ArchiveError::ToolMissing { tools } => InjectError::ToolMissing { tools },
            ArchiveError::ConversionError { path, reason } => {
                InjectError::ConversionError { path, reason }
            }
            source => InjectError::WriteError {
                path: path.to_path_buf(),
                source,
            },
        }
    }
}

/// Settings shared by all injections of a run
#[derive(Debug, Clone, Default)]
pub struct InjectOptions {
    pub original_policy: OriginalPolicy,
    /// File that successful RAR conversions are appended to
    pub conversion_log: Option<PathBuf>,
    pub locator: ToolLocator,
}

/// What happened to one archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectReport {
    /// Path of the archive that now carries the metadata
    pub archive: PathBuf,
    /// The RAR archive this one was converted from
    pub converted_from: Option<PathBuf>,
    pub cover_written: bool,
    /// A cover was available but the archive contains `Thumbs.db`
    pub cover_suppressed: bool,
    /// Nothing was written because this RAR archive's `.cbz` sibling already
    /// exists; the sibling is tagged as an archive of its own
    pub superseded_by: Option<PathBuf>,
}

impl InjectReport {
    /// True if metadata was written into `archive`
    pub fn written(&self) -> bool {
        self.superseded_by.is_none()
    }
}

/// Metadata of one folder, ready to be written into each of its archives.
///
/// The cover is downloaded once here and reused for every archive.
#[derive(Debug, Clone)]
pub struct FolderMetadata {
    record: MetadataRecord,
    preference: TitlePreference,
    cover: Option<Vec<u8>>,
}

impl FolderMetadata {
    /// Prepares a record for injection, downloading its cover if `add_covers`.
    ///
    /// A failed download is logged and the folder continues without cover.
    pub fn prepare<P: MetadataProvider>(
        provider: &P,
        record: MetadataRecord,
        preference: TitlePreference,
        add_covers: bool,
    ) -> Self {
        let cover = match (&record.candidate.cover_url, add_covers) {
            (Some(url), true) => match provider.fetch_cover(url) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    tracing::warn!(%url, error = %e, "cover download failed, continuing without cover");
                    None
                }
            },
            _ => None,
        };

        Self::new(record, preference, cover)
    }

    pub fn new(record: MetadataRecord, preference: TitlePreference, cover: Option<Vec<u8>>) -> Self {
        Self {
            record,
            preference,
            cover,
        }
    }

    pub fn record(&self) -> &MetadataRecord {
        &self.record
    }

    pub fn has_cover(&self) -> bool {
        self.cover.is_some()
    }
}

/// Writes `metadata` into the archive at `path`.
///
/// Returns the report on success. If the archive is RAR it is converted to
/// `<stem>.cbz` first and the report names the new file. A RAR archive whose
/// `<stem>.cbz` already exists (a user's own zip, or a previous conversion
/// kept under [`OriginalPolicy::Keep`]) is left alone and reported as
/// superseded; the existing zip is never overwritten by a conversion.
pub fn inject(
    path: &Path,
    metadata: &FolderMetadata,
    options: &InjectOptions,
) -> Result<InjectReport, InjectError> {
    let format = ArchiveFormat::detect(path).map_err(|e| InjectError::from_archive(path, e))?;

    let (target, converted_from) = match format {
        ArchiveFormat::Zip => (path.to_path_buf(), None),
        ArchiveFormat::Rar => {
            let sibling = converted_path(path);
            if sibling != path && sibling.exists() {
                tracing::info!(
                    archive = %path.display(),
                    existing = %sibling.display(),
                    "zip version already exists, not converting"
                );
                return Ok(InjectReport {
                    archive: path.to_path_buf(),
                    converted_from: None,
                    cover_written: false,
                    cover_suppressed: false,
                    superseded_by: Some(sibling),
                });
            }

            let converted = convert_to_zip(path, &options.locator, &[], options.original_policy)
                .map_err(|e| InjectError::from_archive(path, e))?;
            if let Some(log) = &options.conversion_log {
                append_conversion_log(log, path, &converted);
            }
            (converted, Some(path.to_path_buf()))
        }
    };

    let mut report = write_metadata(&target, metadata, options)?;
    report.converted_from = converted_from;
    Ok(report)
}

fn write_metadata(
    path: &Path,
    metadata: &FolderMetadata,
    options: &InjectOptions,
) -> Result<InjectReport, InjectError> {
    let wrap = |e| InjectError::from_archive(path, e);

    let mut handle = ArchiveHandle::open(path, &options.locator).map_err(wrap)?;
    let names = handle.list_entries().map_err(wrap)?;

    let cover_suppressed = metadata.has_cover() && has_thumbs_db(&names);
    let cover = metadata.cover.as_deref().filter(|_| !cover_suppressed);
    if cover_suppressed {
        tracing::info!(archive = %path.display(), "archive contains Thumbs.db, not adding cover");
    }

    let xml = render_comic_info(&metadata.record, metadata.preference, cover.is_some());
    let mut entries: Vec<(&str, &[u8])> = vec![(COMIC_INFO_ENTRY, xml.as_slice())];
    if let Some(cover) = cover {
        entries.push((COVER_ENTRY, cover));
    }

    handle.write_entries(&entries).map_err(wrap)?;
    tracing::debug!(archive = %path.display(), cover = cover.is_some(), "metadata written");

    Ok(InjectReport {
        archive: path.to_path_buf(),
        converted_from: None,
        cover_written: cover.is_some(),
        cover_suppressed,
        superseded_by: None,
    })
}

/// Appends `[YYYY-mm-dd HH:MM:SS] Converted: <from> -> <to>` to `log`.
///
/// The log is informational; failing to write it is only a warning.
fn append_conversion_log(log: &Path, from: &Path, to: &Path) {
    let line = format!(
        "{} Converted: {} -> {}\n",
        chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
        from.display(),
        to.display()
    );

    let result = log
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|()| OpenOptions::new().create(true).append(true).open(log))
        .and_then(|mut file| file.write_all(line.as_bytes()));

    if let Err(e) = result {
        tracing::warn!(log = %log.display(), error = %e, "could not append to conversion log");
    }
}
