//! Sequential batch processing of folder tasks
//!
//! [`run_batch`] processes folders one after another on the calling thread
//! and reports through a callback, the same way a single folder would.
//! [`spawn_batch`] moves the whole batch onto a worker thread that owns the
//! pipeline (and with it the match cache) and talks to the front end over a
//! channel. Cancellation is cooperative and checked between folders only, so
//! an archive is never abandoned halfway through a rewrite.

use crate::cache::{CacheError, MatchCache};
use crate::file_resolver::scan_for_archives;
use crate::injector::{FolderMetadata, InjectError, InjectOptions, InjectReport, inject};
use crate::metadata_retrieval::{MetadataProvider, RecordSource};
use crate::pipeline::{
    FolderTask, ManualChoice, ManualResolver, PendingMatch, Pipeline, Resolution,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Progress event emitted during a batch
///
/// These events allow front ends to track progress and provide feedback
/// while folders are processed.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Batch started
    Started { total: usize },

    /// Processing of a folder began
    FolderStarted {
        index: usize,
        total: usize,
        path: PathBuf,
        title: String,
    },

    /// Archives found in the folder
    ArchivesFound { path: PathBuf, count: usize },

    /// The folder was matched to a catalog entry
    Matched {
        path: PathBuf,
        title: String,
        id: u64,
        source: RecordSource,
    },

    /// Metadata was written into one archive
    ArchiveInjected { report: InjectReport },

    /// A RAR archive was left alone because its `.cbz` version exists
    ArchiveSuperseded { path: PathBuf, by: PathBuf },

    /// One archive could not be updated
    ArchiveFailed { path: PathBuf, error: String },

    /// No RAR extractor is installed. Sent at most once per batch.
    ToolMissing { tools: String },

    /// The folder was left without metadata
    FolderSkipped { path: PathBuf },

    /// The folder could not be processed
    FolderFailed { path: PathBuf, error: String },

    /// The batch stopped before processing `remaining` folders
    Cancelled { remaining: usize },

    /// Batch complete
    Complete { report: BatchReport },
}

/// Final state of one folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderOutcome {
    /// Metadata was written into `written` archives; `failed` could not be updated
    Injected {
        source: RecordSource,
        written: usize,
        failed: usize,
    },
    /// The folder contains no `.cbz`/`.cbr` files
    NoArchives,
    Skipped,
    Failed(String),
    /// The user stopped the batch while this folder waited for a manual match
    Stopped,
}

/// Per-folder results of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub folders: Vec<(PathBuf, FolderOutcome)>,
    /// Set when the batch ended before every folder was processed
    pub cancelled: bool,
}

impl BatchReport {
    /// Number of archives that received metadata
    pub fn archives_written(&self) -> usize {
        self.folders
            .iter()
            .map(|(_, outcome)| match outcome {
                FolderOutcome::Injected { written, .. } => *written,
                _ => 0,
            })
            .sum()
    }

    /// Folders that failed, with their reasons
    pub fn failures(&self) -> impl Iterator<Item = (&PathBuf, &str)> {
        self.folders.iter().filter_map(|(path, outcome)| match outcome {
            FolderOutcome::Failed(reason) => Some((path, reason.as_str())),
            _ => None,
        })
    }
}

/// Shared "stop after the current folder" flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Processes `tasks` in order.
///
/// Failures are recorded per folder and never abort the batch. A
/// [`ManualChoice::Stop`] from `resolver` cancels the remaining folders.
///
/// # Arguments
///
/// * `pipeline` - Resolves folders to catalog entries and owns the cache
/// * `tasks` - Folders to process, in order
/// * `options` - Settings for writing archives
/// * `resolver` - Answers folders without an automatic match
/// * `cancel` - Checked before each folder
/// * `progress_callback` - Closure called with progress events
///
/// # Returns
///
/// The per-folder outcomes
pub fn run_batch<P, F>(
    pipeline: &mut Pipeline<P>,
    tasks: &[FolderTask],
    options: &InjectOptions,
    resolver: &mut dyn ManualResolver,
    cancel: &CancelToken,
    mut progress_callback: F,
) -> BatchReport
where
    P: MetadataProvider,
    F: FnMut(ProgressEvent),
{
    let total = tasks.len();
    let mut report = BatchReport::default();
    let mut tool_missing_announced = false;

    progress_callback(ProgressEvent::Started { total });

    for (index, task) in tasks.iter().enumerate() {
        if cancel.is_cancelled() {
            report.cancelled = true;
            progress_callback(ProgressEvent::Cancelled {
                remaining: total - index,
            });
            break;
        }

        progress_callback(ProgressEvent::FolderStarted {
            index,
            total,
            path: task.path.clone(),
            title: task.title.clone(),
        });

        let outcome = process_folder(
            pipeline,
            task,
            options,
            resolver,
            &mut tool_missing_announced,
            &mut progress_callback,
        );

        match &outcome {
            FolderOutcome::Skipped => progress_callback(ProgressEvent::FolderSkipped {
                path: task.path.clone(),
            }),
            FolderOutcome::Failed(error) => {
                tracing::warn!(folder = %task.path.display(), %error, "folder failed");
                progress_callback(ProgressEvent::FolderFailed {
                    path: task.path.clone(),
                    error: error.clone(),
                });
            }
            FolderOutcome::Stopped => cancel.cancel(),
            _ => {}
        }

        report.folders.push((task.path.clone(), outcome));
    }

    progress_callback(ProgressEvent::Complete {
        report: report.clone(),
    });
    report
}

fn process_folder<P, F>(
    pipeline: &mut Pipeline<P>,
    task: &FolderTask,
    options: &InjectOptions,
    resolver: &mut dyn ManualResolver,
    tool_missing_announced: &mut bool,
    progress_callback: &mut F,
) -> FolderOutcome
where
    P: MetadataProvider,
    F: FnMut(ProgressEvent),
{
    let archives = match scan_for_archives(&task.path) {
        Ok(archives) => archives,
        Err(e) => return FolderOutcome::Failed(e.to_string()),
    };
    progress_callback(ProgressEvent::ArchivesFound {
        path: task.path.clone(),
        count: archives.len(),
    });
    if archives.is_empty() {
        return FolderOutcome::NoArchives;
    }

    let record = match pipeline.resolve(task, resolver) {
        Ok(Resolution::Skipped) => return FolderOutcome::Skipped,
        Ok(Resolution::Stopped) => return FolderOutcome::Stopped,
        Ok(resolution) => match resolution.record() {
            Some(record) => record.clone(),
            None => return FolderOutcome::Failed(format!("unexpected state: {}", resolution.label())),
        },
        Err(e) => return FolderOutcome::Failed(e.to_string()),
    };

    progress_callback(ProgressEvent::Matched {
        path: task.path.clone(),
        title: record.candidate.preferred_title(task.preference).to_string(),
        id: record.candidate.id,
        source: record.source,
    });

    let source = record.source;
    let metadata = FolderMetadata::prepare(pipeline.provider(), record, task.preference, task.add_covers);

    let mut written = 0;
    let mut failures = Vec::new();
    for archive in &archives {
        match inject(&archive.path, &metadata, options) {
            Ok(InjectReport {
                archive,
                superseded_by: Some(by),
                ..
            }) => {
                progress_callback(ProgressEvent::ArchiveSuperseded { path: archive, by });
            }
            Ok(report) => {
                written += 1;
                progress_callback(ProgressEvent::ArchiveInjected { report });
            }
            Err(e) => {
                if let InjectError::ToolMissing { tools } = &e {
                    if !*tool_missing_announced {
                        *tool_missing_announced = true;
                        progress_callback(ProgressEvent::ToolMissing {
                            tools: tools.clone(),
                        });
                    }
                }
                tracing::warn!(archive = %archive.path.display(), error = %e, "injection failed");
                progress_callback(ProgressEvent::ArchiveFailed {
                    path: archive.path.clone(),
                    error: e.to_string(),
                });
                failures.push(e.to_string());
            }
        }
    }

    if written == 0 && !failures.is_empty() {
        return FolderOutcome::Failed(failures.join("; "));
    }

    FolderOutcome::Injected {
        source,
        written,
        failed: failures.len(),
    }
}

/// Message from the batch worker to the front end
#[derive(Debug)]
pub enum BatchMessage {
    Progress(ProgressEvent),
    /// A folder needs a manual match; answer on `reply`
    ManualMatch {
        pending: PendingMatch,
        reply: Sender<ManualChoice>,
    },
}

/// Forwards manual match requests over the worker's message channel
struct ChannelResolver {
    sender: Sender<BatchMessage>,
}

impl ManualResolver for ChannelResolver {
    fn choose(&mut self, pending: &PendingMatch) -> ManualChoice {
        let (reply, answer) = mpsc::channel();
        let request = BatchMessage::ManualMatch {
            pending: pending.clone(),
            reply,
        };

        if self.sender.send(request).is_err() {
            return ManualChoice::Stop;
        }
        // A front end that went away without answering stops the batch
        answer.recv().unwrap_or(ManualChoice::Stop)
    }
}

/// Errors that can occur when a background batch finishes
#[derive(Debug, Error)]
pub enum BatchError {
    /// The worker thread panicked
    #[error("Batch worker panicked")]
    WorkerPanicked,

    /// The cache could not be flushed at shutdown
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// A batch running on a worker thread
pub struct BatchHandle {
    messages: Receiver<BatchMessage>,
    cancel: CancelToken,
    worker: JoinHandle<Result<(BatchReport, MatchCache), CacheError>>,
}

impl BatchHandle {
    /// Messages from the worker; the iterator ends when the worker is done
    pub fn messages(&self) -> &Receiver<BatchMessage> {
        &self.messages
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Waits for the worker and returns its report and the flushed cache
    pub fn join(self) -> Result<(BatchReport, MatchCache), BatchError> {
        drop(self.messages);
        let result = self.worker.join().map_err(|_| BatchError::WorkerPanicked)?;
        Ok(result?)
    }
}

/// Starts the batch on a background thread.
///
/// The worker owns `pipeline`, runs [`run_batch`] and flushes the cache when
/// done. Progress and manual match requests arrive through
/// [`BatchHandle::messages`].
pub fn spawn_batch<P>(
    pipeline: Pipeline<P>,
    tasks: Vec<FolderTask>,
    options: InjectOptions,
) -> BatchHandle
where
    P: MetadataProvider + Send + 'static,
{
    let (sender, messages) = mpsc::channel();
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();

    let worker = thread::spawn(move || -> Result<(BatchReport, MatchCache), CacheError> {
        let mut pipeline = pipeline;
        let mut resolver = ChannelResolver {
            sender: sender.clone(),
        };

        let report = run_batch(
            &mut pipeline,
            &tasks,
            &options,
            &mut resolver,
            &worker_cancel,
            |event| {
                // The front end may have stopped listening; the batch goes on
                let _ = sender.send(BatchMessage::Progress(event));
            },
        );

        let cache = pipeline.shutdown()?;
        Ok((report, cache))
    });

    BatchHandle {
        messages,
        cancel,
        worker,
    }
}
