//! RAR (`.cbr`) access through external command line tools
//!
//! There is no maintained pure Rust RAR decoder, so RAR archives are unpacked
//! with `7z`, `unrar` or `rar`, whichever is installed.

use super::zip_archive::write_new_zip;
use super::{ArchiveError, collect_files};
use crate::temp::{TempGuard, create_temp_dir};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Time limit of one extraction run unless configured otherwise
pub const DEFAULT_EXTRACT_TIMEOUT: Duration = Duration::from_secs(120);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Supported extractors in order of preference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RarToolKind {
    SevenZip,
    Unrar,
    Rar,
}

impl RarToolKind {
    const ALL: [RarToolKind; 3] = [RarToolKind::SevenZip, RarToolKind::Unrar, RarToolKind::Rar];

    fn executable(self) -> &'static str {
        match self {
            RarToolKind::SevenZip => "7z",
            RarToolKind::Unrar => "unrar",
            RarToolKind::Rar => "rar",
        }
    }

    /// Human readable list of all tool names, for error messages
    fn names() -> String {
        Self::ALL
            .iter()
            .map(|kind| kind.executable())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A discovered extractor executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RarTool {
    pub kind: RarToolKind,
    pub path: PathBuf,
}

impl RarTool {
    /// Extracts the full archive into `destination`.
    ///
    /// A run that exceeds `timeout` is killed and reported as failed.
    fn extract(&self, archive: &Path, destination: &Path, timeout: Duration) -> Result<(), String> {
        let mut command = Command::new(&self.path);
        match self.kind {
            RarToolKind::SevenZip => {
                let mut output_flag = OsString::from("-o");
                output_flag.push(destination);
                command.arg("x").arg(archive).arg(output_flag).arg("-y");
            }
            RarToolKind::Unrar | RarToolKind::Rar => {
                // A trailing separator makes unrar treat the target as a directory
                let mut target = destination.as_os_str().to_os_string();
                target.push(std::path::MAIN_SEPARATOR_STR);
                command.arg("x").arg("-y").arg(archive).arg(target);
            }
        }

        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to run {}: {}", self.path.display(), e))?;

        // Drained on its own thread so a chatty tool never blocks on a full pipe
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });

        let status = wait_with_deadline(&mut child, timeout)
            .map_err(|e| format!("failed to wait for {}: {}", self.path.display(), e))?;

        match status {
            Some(status) if status.success() => Ok(()),
            Some(status) => {
                let stderr = stderr
                    .and_then(|reader| reader.join().ok())
                    .unwrap_or_default();
                Err(format!(
                    "{} exited with {:?}: {}",
                    self.kind.executable(),
                    status.code(),
                    stderr.trim()
                ))
            }
            None => Err(format!(
                "{} timed out after {:.1}s",
                self.kind.executable(),
                timeout.as_secs_f64()
            )),
        }
    }
}

/// Waits for `child` until `timeout` passes, then kills it.
///
/// Returns `None` if the child had to be killed.
fn wait_with_deadline(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }

        let now = Instant::now();
        if now >= deadline {
            tracing::warn!(pid = child.id(), timeout_secs = timeout.as_secs_f64(), "extractor timed out, killing it");
            // The child may have exited between the two checks
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }

        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// Finds extractor executables.
///
/// By default the process `PATH` is searched; tests and unusual setups can
/// supply their own search path. Every extraction run is limited to
/// [`DEFAULT_EXTRACT_TIMEOUT`] unless [`ToolLocator::with_timeout`] says otherwise.
#[derive(Debug, Clone)]
pub struct ToolLocator {
    search_path: Option<OsString>,
    timeout: Duration,
}

impl Default for ToolLocator {
    fn default() -> Self {
        Self {
            search_path: None,
            timeout: DEFAULT_EXTRACT_TIMEOUT,
        }
    }
}

impl ToolLocator {
    /// Searches only the given `PATH`-style list of directories
    pub fn with_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(search_path.into()),
            ..Self::default()
        }
    }

    /// Sets the time limit of each extraction run
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns every installed extractor, most preferred first.
    ///
    /// Fails with [`ArchiveError::ToolMissing`] if none is installed.
    pub fn discover(&self) -> Result<Vec<RarTool>, ArchiveError> {
        let tools: Vec<_> = RarToolKind::ALL
            .into_iter()
            .filter_map(|kind| {
                self.find(kind.executable())
                    .map(|path| RarTool { kind, path })
            })
            .collect();

        if tools.is_empty() {
            tracing::debug!("no RAR extraction tool found");
            return Err(ArchiveError::ToolMissing {
                tools: RarToolKind::names(),
            });
        }

        Ok(tools)
    }

    fn find(&self, executable: &str) -> Option<PathBuf> {
        match &self.search_path {
            Some(paths) => {
                let cwd = std::env::current_dir().ok()?;
                which::which_in(executable, Some(paths), cwd).ok()
            }
            None => which::which(executable).ok(),
        }
    }
}

/// Extracts `archive` into `destination` with the first tool that succeeds
fn extract_with_any(
    tools: &[RarTool],
    archive: &Path,
    destination: &Path,
    timeout: Duration,
) -> Result<(), ArchiveError> {
    let mut failures = Vec::new();

    for tool in tools {
        match tool.extract(archive, destination, timeout) {
            Ok(()) => {
                tracing::debug!(tool = %tool.path.display(), archive = %archive.display(), "extracted RAR archive");
                return Ok(());
            }
            Err(reason) => {
                tracing::debug!(tool = %tool.path.display(), %reason, "extraction attempt failed");
                failures.push(reason);
            }
        }
    }

    Err(ArchiveError::ConversionError {
        path: archive.to_path_buf(),
        reason: failures.join("; "),
    })
}

fn extract_to_temp(locator: &ToolLocator, archive: &Path) -> Result<TempGuard, ArchiveError> {
    let tools = locator.discover()?;
    let dir = create_temp_dir("cbr").map_err(|e| ArchiveError::WriteFailed {
        path: std::env::temp_dir(),
        source: e,
    })?;
    extract_with_any(&tools, archive, &dir, locator.timeout())?;
    Ok(dir)
}

/// What happens to a `.cbr` after it was converted successfully
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginalPolicy {
    /// Delete the RAR file once the zip is in place
    #[default]
    Remove,
    /// Leave the RAR file next to the new zip
    Keep,
}

/// Path of the zip archive a RAR archive converts to
pub fn converted_path(path: &Path) -> PathBuf {
    path.with_extension("cbz")
}

/// Converts a RAR archive into a zip archive next to it.
///
/// The archive is extracted into a temporary directory, `extra` entries are
/// added (replacing extracted files of the same name) and everything is packed
/// into `<stem>.cbz`. The original is handled according to `policy` only after
/// the new archive is in place; on any failure it is left untouched.
///
/// An existing `<stem>.cbz` is never replaced: conversion fails with
/// [`ArchiveError::ConversionError`] before anything is extracted.
pub fn convert_to_zip(
    path: &Path,
    locator: &ToolLocator,
    extra: &[(&str, &[u8])],
    policy: OriginalPolicy,
) -> Result<PathBuf, ArchiveError> {
    let destination = converted_path(path);
    if destination != path && destination.exists() {
        return Err(ArchiveError::ConversionError {
            path: path.to_path_buf(),
            reason: format!("{} already exists", destination.display()),
        });
    }

    let extracted = extract_to_temp(locator, path)?;

    let files = collect_files(&extracted).map_err(|e| ArchiveError::ConversionError {
        path: path.to_path_buf(),
        reason: format!("failed to read extracted files: {e}"),
    })?;
    if files.is_empty() && extra.is_empty() {
        return Err(ArchiveError::ConversionError {
            path: path.to_path_buf(),
            reason: "archive contained no files".to_string(),
        });
    }

    write_new_zip(&destination, &files, extra)?;

    if policy == OriginalPolicy::Remove && destination != path {
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "could not remove converted original");
        }
    }

    tracing::info!(from = %path.display(), to = %destination.display(), "converted RAR archive to zip");
    Ok(destination)
}

/// Read-only access to a RAR archive.
///
/// The archive is extracted on first access and the extracted copy lives as
/// long as the handle.
#[derive(Debug)]
pub struct RarHandle {
    path: PathBuf,
    locator: ToolLocator,
    extracted: Option<TempGuard>,
}

impl RarHandle {
    pub(super) fn new(path: &Path, locator: ToolLocator) -> Self {
        Self {
            path: path.to_path_buf(),
            locator,
            extracted: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn extracted_dir(&mut self) -> Result<PathBuf, ArchiveError> {
        if let Some(dir) = &self.extracted {
            return Ok(dir.to_path_buf());
        }

        let dir = extract_to_temp(&self.locator, &self.path)?;
        let path = dir.to_path_buf();
        self.extracted = Some(dir);
        Ok(path)
    }

    pub fn list_entries(&mut self) -> Result<Vec<String>, ArchiveError> {
        let dir = self.extracted_dir()?;
        let files = collect_files(&dir).map_err(|e| ArchiveError::ReadFailed {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(files.into_iter().map(|(_, name)| name).collect())
    }

    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        let archive = self.path.clone();
        let not_found = || ArchiveError::EntryNotFound {
            archive: archive.clone(),
            name: name.to_string(),
        };

        let relative = Path::new(name);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(not_found());
        }

        let dir = self.extracted_dir()?;
        let file = dir.join(relative);
        if !file.is_file() {
            return Err(not_found());
        }

        fs::read(&file).map_err(|e| ArchiveError::ReadFailed { path: file, source: e })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::RAR_MAGIC;

    #[test]
    fn test_empty_search_path_reports_missing_tools() {
        let empty = tempfile::tempdir().unwrap();
        let locator = ToolLocator::with_search_path(empty.path());

        match locator.discover() {
            Err(ArchiveError::ToolMissing { tools }) => {
                assert!(tools.contains("7z"));
                assert!(tools.contains("unrar"));
            }
            other => panic!("expected ToolMissing, got {other:?}"),
        }
    }

    #[test]
    fn test_conversion_without_tool_leaves_original() {
        let dir = tempfile::tempdir().unwrap();
        let empty = tempfile::tempdir().unwrap();
        let cbr = dir.path().join("vol.cbr");
        fs::write(&cbr, RAR_MAGIC).unwrap();

        let result = convert_to_zip(
            &cbr,
            &ToolLocator::with_search_path(empty.path()),
            &[],
            OriginalPolicy::Remove,
        );

        assert!(matches!(result, Err(ArchiveError::ToolMissing { .. })));
        assert_eq!(fs::read(&cbr).unwrap(), RAR_MAGIC);
        assert!(!dir.path().join("vol.cbz").exists());
    }

    #[test]
    fn test_conversion_never_replaces_existing_zip() {
        let dir = tempfile::tempdir().unwrap();
        let empty = tempfile::tempdir().unwrap();
        let cbr = dir.path().join("vol.cbr");
        let cbz = dir.path().join("vol.cbz");
        fs::write(&cbr, RAR_MAGIC).unwrap();
        fs::write(&cbz, b"user archive").unwrap();

        let result = convert_to_zip(
            &cbr,
            &ToolLocator::with_search_path(empty.path()),
            &[],
            OriginalPolicy::Remove,
        );

        match result {
            Err(ArchiveError::ConversionError { path, reason }) => {
                assert_eq!(path, cbr);
                assert!(reason.contains("already exists"));
            }
            other => panic!("expected ConversionError, got {other:?}"),
        }
        assert_eq!(fs::read(&cbz).unwrap(), b"user archive");
        assert_eq!(fs::read(&cbr).unwrap(), RAR_MAGIC);
    }

    #[test]
    fn test_locator_timeout() {
        assert_eq!(ToolLocator::default().timeout(), DEFAULT_EXTRACT_TIMEOUT);
        let locator = ToolLocator::with_search_path("/nowhere").with_timeout(Duration::from_secs(3));
        assert_eq!(locator.timeout(), Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_with_deadline_kills_slow_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let started = Instant::now();

        let status = wait_with_deadline(&mut child, Duration::from_millis(200)).unwrap();

        assert!(status.is_none());
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(child.try_wait().unwrap().is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_with_deadline_returns_exit_status() {
        let mut child = Command::new("true").spawn().unwrap();
        let status = wait_with_deadline(&mut child, Duration::from_secs(10)).unwrap();
        assert!(status.is_some_and(|s| s.success()));
    }

    #[test]
    fn test_rar_handle_rejects_parent_components() {
        let dir = tempfile::tempdir().unwrap();
        let cbr = dir.path().join("vol.cbr");
        fs::write(&cbr, RAR_MAGIC).unwrap();

        let mut handle = RarHandle::new(&cbr, ToolLocator::default());
        assert!(matches!(
            handle.read_entry("../secret.txt"),
            Err(ArchiveError::EntryNotFound { .. })
        ));
    }

    #[test]
    fn test_original_policy_serde() {
        assert_eq!(serde_json::to_string(&OriginalPolicy::Keep).unwrap(), "\"keep\"");
        assert_eq!(OriginalPolicy::default(), OriginalPolicy::Remove);
    }
}
