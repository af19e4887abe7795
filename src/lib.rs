//! ComicInfo Injector - Tag manga archives with catalog metadata
//!
//! This library resolves series folders to AniList entries, caches those
//! matches, and writes `ComicInfo.xml` plus an optional `cover.jpg` into every
//! `.cbz`/`.cbr` archive of the folder.

mod archive;
mod batch;
mod cache;
mod comicinfo;
mod config;
mod file_resolver;
mod injector;
mod metadata_retrieval;
mod pipeline;
mod temp;
mod title_key;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

// Re-export error types
pub use archive::ArchiveError;
pub use batch::BatchError;
pub use cache::CacheError;
pub use config::ConfigError;
pub use file_resolver::FileResolverError;
pub use injector::InjectError;
pub use metadata_retrieval::MetadataRetrievalError;
pub use pipeline::PipelineError;

pub use archive::{
    ArchiveFormat, ArchiveHandle, COMIC_INFO_ENTRY, COVER_ENTRY, DEFAULT_EXTRACT_TIMEOUT,
    OriginalPolicy, RarHandle, RarTool, RarToolKind, ToolLocator, ZipHandle, convert_to_zip,
    converted_path, has_thumbs_db,
};
pub use batch::{
    BatchHandle, BatchMessage, BatchReport, CancelToken, FolderOutcome, ProgressEvent, run_batch,
    spawn_batch,
};
pub use cache::{CACHE_FILE_NAME, CacheEntry, CacheLookup, CachedMatch, MatchCache};
pub use comicinfo::render_comic_info;
pub use config::{AppDirs, Config};
pub use file_resolver::{ComicArchive, collect_series_folders, scan_for_archives};
pub use injector::{FolderMetadata, InjectOptions, InjectReport, inject};
pub use metadata_retrieval::{
    AniListProvider, MetadataProvider, MetadataRecord, RecordSource, SearchCandidate,
    TitlePreference, parse_manga_url,
};
pub use pipeline::{
    FolderTask, ManualChoice, ManualResolver, MatchPolicy, PendingMatch, Pipeline, Resolution,
};
pub use title_key::{derive_title, normalize_key};

/// Top-level error type for ComicInfo Injector operations
#[derive(Debug, Error)]
pub enum InjectorError {
    /// Error while loading configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Error during folder discovery
    #[error("File resolution error: {0}")]
    FileResolver(#[from] FileResolverError),

    /// Error talking to the catalog service
    #[error("Metadata retrieval error: {0}")]
    MetadataRetrieval(#[from] MetadataRetrievalError),

    /// Error during cache operations
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Error resolving a folder
    #[error("Resolution error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Error writing an archive
    #[error("Injection error: {0}")]
    Inject(#[from] InjectError),

    /// Error in an archive operation
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Error finishing a background batch
    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),
}

/// Builds the folder tasks of a run.
///
/// `folders` are taken as series folders directly ("Add Folder"); every
/// immediate subfolder of each entry in `parents` becomes a series folder as
/// well ("Add Parent Folder"). Duplicates are dropped, first occurrence wins.
///
/// # Arguments
///
/// * `folders` - Series folders
/// * `parents` - Folders whose subfolders are series folders
/// * `preference` - Title language for `<Series>`
/// * `add_covers` - Whether covers are written
///
/// # Returns
///
/// One task per distinct folder, in the order given
pub fn collect_tasks(
    folders: &[PathBuf],
    parents: &[PathBuf],
    preference: TitlePreference,
    add_covers: bool,
) -> Result<Vec<FolderTask>, InjectorError> {
    let mut paths: Vec<PathBuf> = Vec::new();

    for folder in folders {
        if !folder.is_dir() {
            return Err(FileResolverError::NotADirectory(folder.clone()).into());
        }
        paths.push(folder.clone());
    }
    for parent in parents {
        paths.extend(collect_series_folders(parent)?);
    }

    let mut seen = BTreeSet::new();
    Ok(paths
        .into_iter()
        .filter(|path| seen.insert(path.clone()))
        .map(|path| FolderTask::new(&path, preference, add_covers))
        .collect())
}

/// Creates a pipeline talking to the configured AniList endpoint, backed by
/// the match cache at `cache_path`.
pub fn build_pipeline(
    config: &Config,
    cache_path: &Path,
) -> Result<Pipeline<AniListProvider>, InjectorError> {
    let provider = AniListProvider::new(
        config.endpoint.clone(),
        config.per_page,
        config.request_timeout(),
    )?;
    let cache = MatchCache::open(cache_path)?;
    Ok(Pipeline::new(provider, cache, MatchPolicy::from(config)))
}
