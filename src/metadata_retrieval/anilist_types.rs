//! AniList API response types for deserialization.
//!
//! These structures mirror the JSON response format of the AniList GraphQL
//! API for the two queries we send. Every field the API may return as `null`
//! is an `Option`.
use serde::Deserialize;

/// GraphQL response envelope
#[derive(Debug, Deserialize)]
pub(super) struct GraphQlResponse<T> {
    pub data: Option<T>,
    pub errors: Option<Vec<GraphQlError>>,
}

/// One entry of the GraphQL `errors` array
#[derive(Debug, Deserialize)]
pub(super) struct GraphQlError {
    pub message: String,
    /// AniList mirrors the HTTP status here
    pub status: Option<u16>,
}

/// `data` of the search query
#[derive(Debug, Deserialize)]
pub(super) struct PageData {
    #[serde(rename = "Page")]
    pub page: Page,
}

#[derive(Debug, Deserialize)]
pub(super) struct Page {
    pub media: Vec<AniListMedia>,
}

/// `data` of the lookup-by-id query
#[derive(Debug, Deserialize)]
pub(super) struct MediaData {
    #[serde(rename = "Media")]
    pub media: Option<AniListMedia>,
}

/// A manga entry
#[derive(Debug, Deserialize)]
pub(super) struct AniListMedia {
    pub id: u64,
    pub title: Option<AniListTitle>,
    #[serde(rename = "startDate")]
    pub start_date: Option<FuzzyDate>,
    /// Description, still containing `<br>` and similar markup
    pub description: Option<String>,
    pub genres: Option<Vec<String>>,
    #[serde(rename = "coverImage")]
    pub cover_image: Option<CoverImage>,
    pub staff: Option<StaffConnection>,
}

#[derive(Debug, Deserialize)]
pub(super) struct AniListTitle {
    pub romaji: Option<String>,
    pub english: Option<String>,
    pub native: Option<String>,
}

/// A date where every component may be unknown
#[derive(Debug, Deserialize)]
pub(super) struct FuzzyDate {
    pub year: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub(super) struct CoverImage {
    pub large: Option<String>,
    #[serde(rename = "extraLarge")]
    pub extra_large: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct StaffConnection {
    pub edges: Option<Vec<StaffEdge>>,
}

/// A staff member together with their role on this entry
#[derive(Debug, Deserialize)]
pub(super) struct StaffEdge {
    /// Role on this entry, e.g. "Story & Art" or "Translator (English)"
    pub role: Option<String>,
    pub node: Option<StaffNode>,
}

#[derive(Debug, Deserialize)]
pub(super) struct StaffNode {
    pub name: Option<StaffName>,
    #[serde(rename = "primaryOccupations")]
    pub primary_occupations: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub(super) struct StaffName {
    pub full: Option<String>,
}
