//! Data structures and traits for manga metadata retrieval.
//!
//! This module provides the normalized catalog entry ([`SearchCandidate`]),
//! the resolved record handed to the injector ([`MetadataRecord`]) and the
//! [`MetadataProvider`] trait implemented by catalog clients. Raw API
//! responses never leave the provider implementations.
mod anilist;
mod anilist_types;

pub use anilist::{AniListProvider, DEFAULT_ENDPOINT};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during metadata retrieval operations.
#[derive(Debug, Error)]
pub enum MetadataRetrievalError {
    /// Transport failure or non-success response from the catalog service
    #[error("Network error: {0}")]
    Network(String),

    /// The catalog service asked us to slow down
    #[error("Rate limited by the catalog service")]
    RateLimited {
        /// How long the service asked us to wait, when it said so
        retry_after: Option<Duration>,
    },

    /// The requested entry does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A manual match URL did not point at a catalog entry
    #[error("Invalid catalog URL: {0}")]
    InvalidUrl(String),

    /// Failed to parse the service's JSON response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),
}

/// Which title language ends up in the ComicInfo `<Series>` element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TitlePreference {
    /// Romanized Japanese title, e.g. "Shingeki no Kyojin"
    Romaji,
    /// Licensed English title, e.g. "Attack on Titan"
    #[default]
    English,
}

impl fmt::Display for TitlePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TitlePreference::Romaji => f.write_str("romaji"),
            TitlePreference::English => f.write_str("english"),
        }
    }
}

impl FromStr for TitlePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "romaji" => Ok(TitlePreference::Romaji),
            "english" => Ok(TitlePreference::English),
            other => Err(format!("unknown title preference '{other}' (expected romaji or english)")),
        }
    }
}

/// A single catalog entry as returned by a search or lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCandidate {
    /// Catalog ID
    pub id: u64,
    pub title_romaji: Option<String>,
    pub title_english: Option<String>,
    pub title_native: Option<String>,
    /// Year of the first release
    pub year: Option<i32>,
    /// Plain text description (HTML already stripped)
    pub description: String,
    pub genres: Vec<String>,
    /// Creator names in catalog order
    pub staff: Vec<String>,
    /// The subset of `staff` credited for artwork
    #[serde(default)]
    pub artists: Vec<String>,
    pub cover_url: Option<String>,
}

impl SearchCandidate {
    /// Returns the title in the preferred language, falling back to the other
    /// language and then the native title.
    pub fn preferred_title(&self, preference: TitlePreference) -> &str {
        let (first, second) = match preference {
            TitlePreference::Romaji => (&self.title_romaji, &self.title_english),
            TitlePreference::English => (&self.title_english, &self.title_romaji),
        };

        [first, second, &self.title_native]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|title| !title.trim().is_empty())
            .unwrap_or("")
    }

    /// All non-empty titles of this entry
    pub fn titles(&self) -> impl Iterator<Item = &str> {
        [&self.title_romaji, &self.title_english, &self.title_native]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .filter(|title| !title.trim().is_empty())
    }

    /// URL of this entry's page on the catalog website
    pub fn web_url(&self) -> String {
        format!("https://anilist.co/manga/{}", self.id)
    }
}

/// How a [`MetadataRecord`] came to be chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    /// Top search result passed the similarity threshold
    Automatic,
    /// Picked by the user from the candidate list or via pasted URL
    Manual,
    /// Served from the match cache
    Cached,
}

/// The resolved metadata for one folder, consumed by the injector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    #[serde(flatten)]
    pub candidate: SearchCandidate,
    pub source: RecordSource,
}

impl MetadataRecord {
    pub fn new(candidate: SearchCandidate, source: RecordSource) -> Self {
        Self { candidate, source }
    }

    /// Builds a new record with the same catalog data and a different source.
    pub fn with_source(&self, source: RecordSource) -> Self {
        Self {
            candidate: self.candidate.clone(),
            source,
        }
    }
}

/// Trait for metadata providers that can fetch manga information.
///
/// Implementors of this trait talk to a remote catalog such as AniList.
/// Every call is a single request; retrying is up to the caller.
pub trait MetadataProvider {
    /// Searches the catalog for `title`.
    ///
    /// Results keep the remote service's relevance order. `language` is the
    /// title language the caller will display; a provider whose search already
    /// covers every language is free to ignore it.
    fn search(
        &self,
        title: &str,
        language: TitlePreference,
    ) -> Result<Vec<SearchCandidate>, MetadataRetrievalError>;

    /// Fetches a single entry by its catalog ID.
    fn fetch_by_id(&self, id: u64) -> Result<SearchCandidate, MetadataRetrievalError>;

    /// Fetches the entry a catalog page URL points to.
    fn fetch_by_url(&self, url: &str) -> Result<SearchCandidate, MetadataRetrievalError> {
        let id = parse_manga_url(url)?;
        self.fetch_by_id(id)
    }

    /// Downloads cover art.
    fn fetch_cover(&self, url: &str) -> Result<Vec<u8>, MetadataRetrievalError>;
}

static MANGA_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"anilist\.co/manga/(\d+)").expect("valid regex"));

/// Extracts the catalog ID from an AniList manga URL.
///
/// Accepts anything containing `anilist.co/manga/<id>`, with or without scheme
/// and trailing slug.
pub fn parse_manga_url(url: &str) -> Result<u64, MetadataRetrievalError> {
    MANGA_URL
        .captures(url.trim())
        .and_then(|caps| caps.get(1))
        .and_then(|id| id.as_str().parse().ok())
        .ok_or_else(|| MetadataRetrievalError::InvalidUrl(url.to_string()))
}
