//! Runtime configuration
//!
//! Settings come from three layers: built-in defaults, an optional
//! `config.toml` in the platform config directory, and command line flags
//! applied on top by the binary.

use crate::archive::{DEFAULT_EXTRACT_TIMEOUT, OriginalPolicy, ToolLocator};
use crate::cache::CACHE_FILE_NAME;
use crate::metadata_retrieval::{DEFAULT_ENDPOINT, TitlePreference};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// File name of the optional configuration file
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// File name of the RAR conversion log inside the data directory
pub const CONVERSION_LOG_NAME: &str = "converted_cbr.log";

/// Upper bound for a rate limit pause, whatever the server asks for
pub const MAX_RATE_LIMIT_PAUSE: Duration = Duration::from_secs(60);

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No home directory could be determined for this platform
    #[error("Could not determine the platform data directories")]
    DirectoryNotFound,

    /// Failed to read the configuration file
    #[error("Failed to read config file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`Config`]
    #[error("Invalid config file {path}: {source}")]
    Invalid {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// All tunable settings of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Title language written to `<Series>`
    pub title_preference: TitlePreference,
    /// Whether `cover.jpg` is written into archives
    pub add_covers: bool,
    /// What happens to a `.cbr` after conversion
    pub original_policy: OriginalPolicy,
    /// Minimum similarity for picking the top search result automatically
    pub match_threshold: f64,
    /// Report folders cached as unresolved as skipped instead of searching again
    pub skip_unresolved: bool,
    /// GraphQL endpoint of the catalog service
    pub endpoint: String,
    /// Number of search results requested per query
    pub per_page: u32,
    pub request_timeout_secs: u64,
    /// Pause before retrying a rate limited request when the server gives no
    /// `Retry-After`
    pub rate_limit_pause_secs: u64,
    /// Time limit of one RAR extraction run before the next tool is tried
    pub extract_timeout_secs: u64,
    /// Overrides the location of the match cache
    pub cache_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            title_preference: TitlePreference::default(),
            add_covers: true,
            original_policy: OriginalPolicy::default(),
            match_threshold: 0.6,
            skip_unresolved: false,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            per_page: 6,
            request_timeout_secs: 30,
            rate_limit_pause_secs: 5,
            extract_timeout_secs: DEFAULT_EXTRACT_TIMEOUT.as_secs(),
            cache_file: None,
        }
    }
}

impl Config {
    /// Loads `config.toml` from the platform config directory, falling back
    /// to defaults when it does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let dirs = AppDirs::discover()?;
        Self::load_from(&dirs.config_file())
    }

    /// Loads configuration from `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::ReadFailed {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Invalid {
            path: path.to_path_buf(),
            source: e,
        })?;

        tracing::debug!(path = %path.display(), "config file loaded");
        Ok(config.sanitized())
    }

    /// Clamps values into their usable ranges
    pub fn sanitized(self) -> Self {
        let match_threshold = if self.match_threshold.is_finite() {
            self.match_threshold.clamp(0.0, 1.0)
        } else {
            Self::default().match_threshold
        };

        Self {
            match_threshold,
            per_page: self.per_page.clamp(1, 50),
            request_timeout_secs: self.request_timeout_secs.max(1),
            rate_limit_pause_secs: self
                .rate_limit_pause_secs
                .min(MAX_RATE_LIMIT_PAUSE.as_secs()),
            extract_timeout_secs: self.extract_timeout_secs.max(1),
            ..self
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn rate_limit_pause(&self) -> Duration {
        Duration::from_secs(self.rate_limit_pause_secs)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }

    /// Extractor lookup on `PATH` with the configured time limit
    pub fn tool_locator(&self) -> ToolLocator {
        ToolLocator::default().with_timeout(self.extract_timeout())
    }

    /// Path of the match cache: the configured override or the default
    /// location in the data directory
    pub fn cache_path(&self, dirs: &AppDirs) -> PathBuf {
        self.cache_file
            .clone()
            .unwrap_or_else(|| dirs.data_dir.join(CACHE_FILE_NAME))
    }
}

/// Platform specific directories of the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDirs {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl AppDirs {
    /// Resolves the directories for the current user
    pub fn discover() -> Result<Self, ConfigError> {
        let proj_dirs = directories::ProjectDirs::from("io", "comicinfo", "comicinfo-injector")
            .ok_or(ConfigError::DirectoryNotFound)?;

        Ok(Self {
            config_dir: proj_dirs.config_dir().to_path_buf(),
            data_dir: proj_dirs.data_dir().to_path_buf(),
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    pub fn conversion_log(&self) -> PathBuf {
        self.data_dir.join(CONVERSION_LOG_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.title_preference, TitlePreference::English);
        assert!(config.add_covers);
        assert_eq!(config.original_policy, OriginalPolicy::Remove);
        assert_eq!(config.match_threshold, 0.6);
        assert_eq!(config.per_page, 6);
        assert_eq!(config.endpoint, "https://graphql.anilist.co");
        assert_eq!(config.extract_timeout(), Duration::from_secs(120));
        assert!(config.cache_file.is_none());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            "title_preference = \"romaji\"\noriginal_policy = \"keep\"\nmatch_threshold = 0.8\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.title_preference, TitlePreference::Romaji);
        assert_eq!(config.original_policy, OriginalPolicy::Keep);
        assert_eq!(config.match_threshold, 0.8);
        assert!(config.add_covers);
        assert_eq!(config.per_page, 6);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "title_preference = \"klingon\"\n").unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_sanitized_clamps_values() {
        let config = Config {
            match_threshold: 3.0,
            per_page: 0,
            rate_limit_pause_secs: 3600,
            extract_timeout_secs: 0,
            ..Config::default()
        }
        .sanitized();

        assert_eq!(config.match_threshold, 1.0);
        assert_eq!(config.per_page, 1);
        assert_eq!(config.rate_limit_pause(), MAX_RATE_LIMIT_PAUSE);
        assert_eq!(config.tool_locator().timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_extract_timeout_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "extract_timeout_secs = 15\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.tool_locator().timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_cache_path_override() {
        let dirs = AppDirs {
            config_dir: PathBuf::from("/cfg"),
            data_dir: PathBuf::from("/data"),
        };
        assert_eq!(Config::default().cache_path(&dirs), PathBuf::from("/data/manga_cache.json"));

        let config = Config {
            cache_file: Some(PathBuf::from("/elsewhere/cache.json")),
            ..Config::default()
        };
        assert_eq!(config.cache_path(&dirs), PathBuf::from("/elsewhere/cache.json"));
        assert_eq!(dirs.conversion_log(), PathBuf::from("/data/converted_cbr.log"));
    }
}
