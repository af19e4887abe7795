//! AniList metadata provider implementation.
use super::anilist_types::{AniListMedia, GraphQlResponse, MediaData, PageData, StaffEdge};
use super::{MetadataProvider, MetadataRetrievalError, SearchCandidate, TitlePreference};
use reqwest::StatusCode;
use reqwest::blocking::Response;
use reqwest::header::RETRY_AFTER;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;

/// Public GraphQL endpoint of AniList
pub const DEFAULT_ENDPOINT: &str = "https://graphql.anilist.co";

const MEDIA_FIELDS: &str = r#"
    id
    title { romaji english native }
    startDate { year }
    description(asHtml: false)
    genres
    coverImage { large extraLarge }
    staff {
      edges {
        role
        node {
          name { full }
          primaryOccupations
        }
      }
    }
"#;

/// Occupation/role fragments that mark a creator of the work
const CREATOR_KEYWORDS: &[&str] = &[
    "story",
    "writer",
    "author",
    "manga",
    "art",
    "illustrator",
    "illustration",
    "original creator",
    "creator",
    "character design",
];

/// Occupation/role fragments that mark localization or production staff
const EXCLUDED_KEYWORDS: &[&str] = &[
    "translate",
    "translator",
    "translation",
    "editor",
    "clean",
    "redraw",
    "redrawer",
    "letterer",
    "proof",
];

/// Role fragments that credit artwork
const ARTIST_KEYWORDS: &[&str] = &["art", "illustrat", "pencil"];

/// Metadata provider for the AniList GraphQL API.
///
/// Searches are restricted to `type: MANGA`. AniList matches the search term
/// against romaji, english, native and synonym titles alike, so the title
/// language only matters when rendering. Descriptions arrive with HTML line
/// breaks and are converted to plain text here.
pub struct AniListProvider {
    client: reqwest::blocking::Client,
    endpoint: String,
    per_page: u32,
}

impl AniListProvider {
    /// Creates a new AniList provider instance.
    pub fn new(
        endpoint: impl Into<String>,
        per_page: u32,
        timeout: Duration,
    ) -> Result<Self, MetadataRetrievalError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("comicinfo-injector/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MetadataRetrievalError::Network(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            per_page: per_page.max(1),
        })
    }

    fn search_query() -> String {
        format!(
            "query ($search: String, $page: Int, $perPage: Int) {{ \
               Page(page: $page, perPage: $perPage) {{ \
                 media(search: $search, type: MANGA) {{ {MEDIA_FIELDS} }} \
               }} \
             }}"
        )
    }

    /// Variables of the search query. There is no language filter to set.
    fn search_variables(&self, title: &str) -> serde_json::Value {
        json!({ "search": title, "page": 1, "perPage": self.per_page })
    }

    fn lookup_query() -> String {
        format!("query ($id: Int) {{ Media(id: $id, type: MANGA) {{ {MEDIA_FIELDS} }} }}")
    }

    /// Sends a GraphQL request and decodes its `data` member.
    fn post<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
        subject: &str,
    ) -> Result<T, MetadataRetrievalError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .map_err(|e| MetadataRetrievalError::Network(e.to_string()))?;

        let response = check_status(response, subject)?;

        let body: GraphQlResponse<T> = response
            .json()
            .map_err(|e| MetadataRetrievalError::ParseError(e.to_string()))?;

        match (body.data, body.errors.unwrap_or_default()) {
            (Some(data), _) => Ok(data),
            (None, errors) if errors.iter().any(|e| e.status == Some(404)) => {
                Err(MetadataRetrievalError::NotFound(subject.to_string()))
            }
            (None, errors) => Err(MetadataRetrievalError::Network(
                errors
                    .into_iter()
                    .map(|e| e.message)
                    .collect::<Vec<_>>()
                    .join("; "),
            )),
        }
    }

    /// Converts an AniList media entry to our internal SearchCandidate.
    pub(super) fn convert_media(media: AniListMedia) -> SearchCandidate {
        let (title_romaji, title_english, title_native) = match media.title {
            Some(title) => (title.romaji, title.english, title.native),
            None => (None, None, None),
        };

        let edges = media.staff.and_then(|s| s.edges).unwrap_or_default();
        let creators = select_creators(&edges);
        let artists = creators
            .iter()
            .filter(|(_, credit)| ARTIST_KEYWORDS.iter().any(|k| credit.contains(k)))
            .map(|(name, _)| name.clone())
            .collect();

        SearchCandidate {
            id: media.id,
            title_romaji,
            title_english,
            title_native,
            year: media.start_date.and_then(|d| d.year),
            description: media
                .description
                .map(|d| nanohtml2text::html2text(&d).trim().to_string())
                .unwrap_or_default(),
            genres: media.genres.unwrap_or_default(),
            staff: creators.into_iter().map(|(name, _)| name).collect(),
            artists,
            cover_url: media
                .cover_image
                .and_then(|c| c.large.or(c.extra_large)),
        }
    }
}

/// Name and lowercased "occupations + role" text of a staff edge
fn credit_of(edge: &StaffEdge) -> Option<(String, String)> {
    let node = edge.node.as_ref()?;
    let name = node.name.as_ref()?.full.as_ref()?.trim();
    if name.is_empty() {
        return None;
    }

    let mut parts = node.primary_occupations.clone().unwrap_or_default();
    parts.extend(edge.role.clone());
    Some((name.to_string(), parts.join(" ").to_lowercase()))
}

/// Picks the staff members who created the work.
///
/// A credit counts when it mentions a creator keyword and no excluded keyword.
/// If nobody qualifies, everyone without an excluded keyword is kept.
fn select_creators(edges: &[StaffEdge]) -> Vec<(String, String)> {
    let credits: Vec<_> = edges.iter().filter_map(credit_of).collect();
    let excluded = |credit: &str| EXCLUDED_KEYWORDS.iter().any(|k| credit.contains(k));

    let strict: Vec<_> = credits
        .iter()
        .filter(|(_, credit)| !excluded(credit) && CREATOR_KEYWORDS.iter().any(|k| credit.contains(k)))
        .cloned()
        .collect();

    let mut selected = if strict.is_empty() {
        credits.into_iter().filter(|(_, credit)| !excluded(credit)).collect()
    } else {
        strict
    };

    // The same person often appears once per role
    let mut seen = std::collections::HashSet::new();
    selected.retain(|(name, _)| seen.insert(name.clone()));
    selected
}

/// Maps throttling and error statuses to errors, passing successful responses through.
fn check_status(response: Response, subject: &str) -> Result<Response, MetadataRetrievalError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    Err(classify_status(status, retry_after, subject))
}

fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    subject: &str,
) -> MetadataRetrievalError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => MetadataRetrievalError::RateLimited { retry_after },
        StatusCode::NOT_FOUND => MetadataRetrievalError::NotFound(subject.to_string()),
        _ => MetadataRetrievalError::Network(format!(
            "HTTP {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        )),
    }
}

impl MetadataProvider for AniListProvider {
    fn search(
        &self,
        title: &str,
        language: TitlePreference,
    ) -> Result<Vec<SearchCandidate>, MetadataRetrievalError> {
        tracing::debug!(title, %language, per_page = self.per_page, "searching AniList");

        let data: PageData = self.post(&Self::search_query(), self.search_variables(title), title)?;

        Ok(data.page.media.into_iter().map(Self::convert_media).collect())
    }

    fn fetch_by_id(&self, id: u64) -> Result<SearchCandidate, MetadataRetrievalError> {
        tracing::debug!(id, "fetching AniList entry");

        let subject = format!("AniList manga {id}");
        let data: MediaData = self.post(&Self::lookup_query(), json!({ "id": id }), &subject)?;

        data.media
            .map(Self::convert_media)
            .ok_or(MetadataRetrievalError::NotFound(subject))
    }

    fn fetch_cover(&self, url: &str) -> Result<Vec<u8>, MetadataRetrievalError> {
        tracing::debug!(url, "downloading cover");

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| MetadataRetrievalError::Network(e.to_string()))?;

        let response = check_status(response, url)?;
        let bytes = response
            .bytes()
            .map_err(|e| MetadataRetrievalError::Network(e.to_string()))?;

        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH_RESPONSE: &str = r#"{
      "data": {
        "Page": {
          "media": [
            {
              "id": 30013,
              "title": { "romaji": "ONE PIECE", "english": "One Piece", "native": "ONE PIECE" },
              "startDate": { "year": 1997 },
              "description": "Gol D. Roger was known as the Pirate King.<br><br>\nThe story follows Luffy.",
              "genres": ["Action", "Adventure", "Comedy"],
              "coverImage": { "large": "https://img/large.jpg", "extraLarge": "https://img/xl.jpg" },
              "staff": {
                "edges": [
                  { "role": "Story & Art", "node": { "name": { "full": "Eiichiro Oda" }, "primaryOccupations": ["Mangaka"] } },
                  { "role": "Translator (English)", "node": { "name": { "full": "Stephen Paul" }, "primaryOccupations": ["Translator"] } },
                  { "role": "Lettering", "node": { "name": { "full": "Vanessa Satone" }, "primaryOccupations": ["Letterer"] } }
                ]
              }
            },
            {
              "id": 1,
              "title": { "romaji": "Unknown", "english": null, "native": null },
              "startDate": { "year": null },
              "description": null,
              "genres": null,
              "coverImage": { "large": null, "extraLarge": "https://img/only-xl.jpg" },
              "staff": null
            }
          ]
        }
      }
    }"#;

    fn edge(name: &str, role: &str, occupations: &[&str]) -> serde_json::Value {
        json!({
            "role": role,
            "node": { "name": { "full": name }, "primaryOccupations": occupations }
        })
    }

    fn edges(values: Vec<serde_json::Value>) -> Vec<StaffEdge> {
        serde_json::from_value(serde_json::Value::Array(values)).unwrap()
    }

    #[test]
    fn test_convert_search_response() {
        let response: GraphQlResponse<PageData> = serde_json::from_str(SEARCH_RESPONSE).unwrap();
        let candidates: Vec<_> = response
            .data
            .unwrap()
            .page
            .media
            .into_iter()
            .map(AniListProvider::convert_media)
            .collect();

        assert_eq!(candidates.len(), 2);

        let one_piece = &candidates[0];
        assert_eq!(one_piece.id, 30013);
        assert_eq!(one_piece.title_english.as_deref(), Some("One Piece"));
        assert_eq!(one_piece.year, Some(1997));
        assert_eq!(one_piece.genres, vec!["Action", "Adventure", "Comedy"]);
        assert_eq!(one_piece.staff, vec!["Eiichiro Oda"]);
        assert_eq!(one_piece.artists, vec!["Eiichiro Oda"]);
        assert_eq!(one_piece.cover_url.as_deref(), Some("https://img/large.jpg"));
        assert!(!one_piece.description.contains("<br>"));
        assert!(one_piece.description.starts_with("Gol D. Roger"));
        assert!(one_piece.description.contains("Luffy"));

        let sparse = &candidates[1];
        assert_eq!(sparse.year, None);
        assert!(sparse.description.is_empty());
        assert!(sparse.genres.is_empty());
        assert!(sparse.staff.is_empty());
        assert_eq!(sparse.cover_url.as_deref(), Some("https://img/only-xl.jpg"));
    }

    #[test]
    fn test_missing_media_is_not_found_shape() {
        let response: GraphQlResponse<MediaData> = serde_json::from_str(
            r#"{"data": {"Media": null}, "errors": [{"message": "Not Found.", "status": 404}]}"#,
        )
        .unwrap();
        assert!(response.data.unwrap().media.is_none());
        assert_eq!(response.errors.unwrap()[0].status, Some(404));
    }

    #[test]
    fn test_select_creators_excludes_localization_staff() {
        let staff = edges(vec![
            edge("Writer Person", "Story", &[]),
            edge("Artist Person", "Art", &["Illustrator"]),
            edge("Editor Person", "Editor", &["Editor"]),
            edge("Writer Person", "Original Creator", &[]),
        ]);

        let names: Vec<_> = select_creators(&staff).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Writer Person", "Artist Person"]);
    }

    #[test]
    fn test_select_creators_falls_back_to_non_excluded() {
        let staff = edges(vec![
            edge("Assistant Person", "Assistant", &[]),
            edge("Translator Person", "Translator", &["Translator"]),
        ]);

        let names: Vec<_> = select_creators(&staff).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Assistant Person"]);
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(30)), "x"),
            MetadataRetrievalError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(30)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, None, "x"),
            MetadataRetrievalError::NotFound(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR, None, "x"),
            MetadataRetrievalError::Network(msg) if msg.contains("500")
        ));
    }

    #[test]
    fn test_queries_request_manga_only() {
        assert!(AniListProvider::search_query().contains("type: MANGA"));
        assert!(AniListProvider::lookup_query().contains("Media(id: $id, type: MANGA)"));
        assert!(AniListProvider::search_query().contains("primaryOccupations"));
    }

    #[test]
    fn test_search_ignores_title_language() {
        let provider =
            AniListProvider::new(DEFAULT_ENDPOINT, 6, Duration::from_secs(5)).unwrap();

        assert_eq!(
            provider.search_variables("Yotsuba&!"),
            json!({ "search": "Yotsuba&!", "page": 1, "perPage": 6 })
        );
        assert!(AniListProvider::search_query().contains("romaji"));
        assert!(AniListProvider::search_query().contains("english"));
        assert!(AniListProvider::search_query().contains("native"));
    }
}
