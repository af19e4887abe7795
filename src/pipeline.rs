//! Per-folder metadata resolution
//!
//! A [`FolderTask`] moves through a small state machine:
//!
//! ```text
//! Pending ── cache hit ─────────────────────────────► CacheHit
//!    │
//!    └─► Searching ── top result similar enough ────► AutoMatched
//!            │
//!            └─► AwaitingManual ── candidate / URL ──► ManuallyMatched
//!                      │
//!                      └── skip ─────────────────────► Skipped
//! any state ── unrecoverable error ──────────────────► Failed (Err)
//! ```
//!
//! Every terminal state except `Failed` is recorded in the [`MatchCache`].
//! `AwaitingManual` is not terminal and writes nothing until the manual
//! choice arrives through [`Pipeline::complete_manual`].

use crate::cache::{CacheError, CacheLookup, CachedMatch, MatchCache};
use crate::config::{Config, MAX_RATE_LIMIT_PAUSE};
use crate::metadata_retrieval::{
    MetadataProvider, MetadataRecord, MetadataRetrievalError, RecordSource, SearchCandidate,
    TitlePreference,
};
use crate::title_key::{derive_title, normalize_key, similarity};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that end a folder in the `Failed` state
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The catalog could not be queried
    #[error(transparent)]
    Metadata(#[from] MetadataRetrievalError),

    /// A manual choice referred to a candidate that was never offered
    #[error("Candidate {index} does not exist ({count} candidates offered)")]
    InvalidChoice { index: usize, count: usize },
}

/// One series folder queued for processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderTask {
    /// Directory containing the archives
    pub path: PathBuf,
    /// Search title derived from the folder name, case preserved
    pub title: String,
    /// Normalized cache key
    pub key: String,
    pub preference: TitlePreference,
    /// Whether `cover.jpg` is written for this folder
    pub add_covers: bool,
}

impl FolderTask {
    /// Creates a task, deriving title and key from the folder name
    pub fn new(path: &Path, preference: TitlePreference, add_covers: bool) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        Self {
            path: path.to_path_buf(),
            title: derive_title(&name),
            key: normalize_key(&name),
            preference,
            add_covers,
        }
    }
}

/// Thresholds and retry behaviour of the resolution step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPolicy {
    /// Minimum similarity of the top result for automatic selection
    pub threshold: f64,
    /// Treat cached unresolved keys as skipped instead of searching again
    pub skip_unresolved: bool,
    /// Pause before the single retry of a rate limited call, unless the
    /// service says otherwise
    pub rate_limit_pause: Duration,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for MatchPolicy {
    fn from(config: &Config) -> Self {
        Self {
            threshold: config.match_threshold,
            skip_unresolved: config.skip_unresolved,
            rate_limit_pause: config.rate_limit_pause(),
        }
    }
}

/// A folder whose search did not produce an automatic match
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMatch {
    pub task: FolderTask,
    /// Search results in the catalog's relevance order
    pub candidates: Vec<SearchCandidate>,
}

/// The user's answer for a [`PendingMatch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualChoice {
    /// Index into [`PendingMatch::candidates`]
    Candidate(usize),
    /// A catalog page URL, resolved with `fetch_by_url`
    Url(String),
    /// Leave the folder alone and remember that nothing matched
    Skip,
    /// Leave the folder alone and stop the batch
    Stop,
}

/// Outcome of resolving one folder
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    CacheHit(MetadataRecord),
    AutoMatched(MetadataRecord),
    /// Waiting for a [`ManualChoice`]; nothing has been cached yet
    AwaitingManual(PendingMatch),
    ManuallyMatched(MetadataRecord),
    /// No metadata for this folder, either by choice or because the key is
    /// cached as unresolved
    Skipped,
    /// The user asked to stop the batch while this folder was pending
    Stopped,
}

impl Resolution {
    /// The chosen record, for the states that have one
    pub fn record(&self) -> Option<&MetadataRecord> {
        match self {
            Resolution::CacheHit(record)
            | Resolution::AutoMatched(record)
            | Resolution::ManuallyMatched(record) => Some(record),
            _ => None,
        }
    }

    /// Short state name for logs and progress output
    pub fn label(&self) -> &'static str {
        match self {
            Resolution::CacheHit(_) => "cache hit",
            Resolution::AutoMatched(_) => "auto matched",
            Resolution::AwaitingManual(_) => "awaiting manual match",
            Resolution::ManuallyMatched(_) => "manually matched",
            Resolution::Skipped => "skipped",
            Resolution::Stopped => "stopped",
        }
    }
}

/// Answers [`PendingMatch`]es, usually by asking the user
pub trait ManualResolver {
    fn choose(&mut self, pending: &PendingMatch) -> ManualChoice;
}

impl<F> ManualResolver for F
where
    F: FnMut(&PendingMatch) -> ManualChoice,
{
    fn choose(&mut self, pending: &PendingMatch) -> ManualChoice {
        self(pending)
    }
}

/// Resolves folders to catalog entries.
///
/// The pipeline owns the provider and the match cache for the whole run and
/// is the only writer of the cache.
pub struct Pipeline<P: MetadataProvider> {
    provider: P,
    cache: MatchCache,
    policy: MatchPolicy,
}

impl<P: MetadataProvider> Pipeline<P> {
    pub fn new(provider: P, cache: MatchCache, policy: MatchPolicy) -> Self {
        Self {
            provider,
            cache,
            policy,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn cache(&self) -> &MatchCache {
        &self.cache
    }

    /// Runs a folder up to its first terminal state or `AwaitingManual`.
    pub fn begin(&mut self, task: &FolderTask) -> Result<Resolution, PipelineError> {
        match self.cache.lookup(&task.key) {
            CacheLookup::Hit(record) => {
                tracing::debug!(key = %task.key, id = record.candidate.id, "cache hit");
                return Ok(Resolution::CacheHit(record.with_source(RecordSource::Cached)));
            }
            CacheLookup::Unresolved if self.policy.skip_unresolved => {
                tracing::debug!(key = %task.key, "key cached as unresolved, skipping");
                return Ok(Resolution::Skipped);
            }
            CacheLookup::Unresolved | CacheLookup::Absent => {}
        }

        let candidates = self.with_rate_limit_retry(|provider| {
            provider.search(&task.title, task.preference)
        })?;
        tracing::debug!(title = %task.title, results = candidates.len(), "search finished");

        if let Some(top) = candidates.first() {
            let score = top
                .titles()
                .map(|title| similarity(&task.key, title))
                .fold(0.0, f64::max);

            if score > 0.0 && score >= self.policy.threshold {
                tracing::info!(key = %task.key, id = top.id, score, "automatic match");
                let record = MetadataRecord::new(top.clone(), RecordSource::Automatic);
                self.remember(&task.key, CachedMatch::Resolved(record.clone()));
                return Ok(Resolution::AutoMatched(record));
            }

            tracing::debug!(key = %task.key, id = top.id, score, "top result below threshold");
        }

        Ok(Resolution::AwaitingManual(PendingMatch {
            task: task.clone(),
            candidates,
        }))
    }

    /// Finishes a pending folder with the user's choice.
    pub fn complete_manual(
        &mut self,
        pending: &PendingMatch,
        choice: ManualChoice,
    ) -> Result<Resolution, PipelineError> {
        let key = &pending.task.key;

        let candidate = match choice {
            ManualChoice::Candidate(index) => pending
                .candidates
                .get(index)
                .cloned()
                .ok_or(PipelineError::InvalidChoice {
                    index,
                    count: pending.candidates.len(),
                })?,
            ManualChoice::Url(url) => {
                self.with_rate_limit_retry(|provider| provider.fetch_by_url(&url))?
            }
            ManualChoice::Skip => {
                tracing::info!(key = %key, "folder skipped");
                self.remember(key, CachedMatch::Unresolved);
                return Ok(Resolution::Skipped);
            }
            ManualChoice::Stop => return Ok(Resolution::Stopped),
        };

        tracing::info!(key = %key, id = candidate.id, "manual match");
        let record = MetadataRecord::new(candidate, RecordSource::Manual);
        self.remember(key, CachedMatch::Resolved(record.clone()));
        Ok(Resolution::ManuallyMatched(record))
    }

    /// Runs a folder to a terminal state, asking `resolver` if needed.
    pub fn resolve(
        &mut self,
        task: &FolderTask,
        resolver: &mut dyn ManualResolver,
    ) -> Result<Resolution, PipelineError> {
        match self.begin(task)? {
            Resolution::AwaitingManual(pending) => {
                let choice = resolver.choose(&pending);
                self.complete_manual(&pending, choice)
            }
            resolution => Ok(resolution),
        }
    }

    /// Flushes the cache and hands it back.
    pub fn shutdown(self) -> Result<MatchCache, CacheError> {
        self.cache.flush_to_disk()?;
        Ok(self.cache)
    }

    /// Stores a terminal state. A failed write costs only a future cache
    /// hit, so it is logged instead of failing the folder.
    fn remember(&mut self, key: &str, value: CachedMatch) {
        if let Err(e) = self.cache.store(key, value) {
            tracing::warn!(key, error = %e, "could not update match cache");
        }
    }

    /// Calls the provider, pausing and retrying exactly once when rate limited.
    fn with_rate_limit_retry<T>(
        &self,
        mut call: impl FnMut(&P) -> Result<T, MetadataRetrievalError>,
    ) -> Result<T, MetadataRetrievalError> {
        match call(&self.provider) {
            Err(MetadataRetrievalError::RateLimited { retry_after }) => {
                let pause = retry_after
                    .unwrap_or(self.policy.rate_limit_pause)
                    .min(MAX_RATE_LIMIT_PAUSE);
                tracing::warn!(pause_secs = pause.as_secs_f64(), "rate limited, retrying once");
                std::thread::sleep(pause);
                call(&self.provider)
            }
            result => result,
        }
    }
}
