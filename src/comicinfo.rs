//! ComicInfo.xml rendering
//!
//! Produces the `ComicInfo` document understood by comic library software
//! (Komga, Kavita, ComicRack and friends). Elements follow the order of the
//! ComicInfo 2.0 schema, which validating readers insist on.

use crate::archive::COVER_ENTRY;
use crate::metadata_retrieval::{MetadataRecord, TitlePreference};

/// Renders `record` as a ComicInfo document.
///
/// The output is deterministic for identical input, so injecting the same
/// record twice leaves byte-identical XML behind.
pub fn render_comic_info(
    record: &MetadataRecord,
    preference: TitlePreference,
    include_cover: bool,
) -> Vec<u8> {
    let candidate = &record.candidate;
    let title = candidate.preferred_title(preference);

    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    xml.push_str(
        "<ComicInfo xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\" \
         xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\">\n",
    );

    push_element(&mut xml, "Title", title);
    push_element(&mut xml, "Series", title);
    push_element(&mut xml, "Summary", &candidate.description);
    if let Some(year) = candidate.year {
        push_element(&mut xml, "Year", &year.to_string());
    }
    push_element(&mut xml, "Writer", &candidate.staff.join(", "));
    push_element(&mut xml, "Penciller", &candidate.artists.join(", "));
    push_element(&mut xml, "Genre", &candidate.genres.join(", "));
    push_element(&mut xml, "Web", &candidate.web_url());
    push_element(&mut xml, "Manga", "Yes");
    if include_cover {
        push_element(&mut xml, "CoverImage", COVER_ENTRY);
    }

    xml.push_str("</ComicInfo>\n");
    xml.into_bytes()
}

/// Appends `<name>value</name>`; empty values are left out
fn push_element(xml: &mut String, name: &str, value: &str) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }

    xml.push_str("  <");
    xml.push_str(name);
    xml.push('>');
    xml.push_str(&escape_xml(value));
    xml.push_str("</");
    xml.push_str(name);
    xml.push_str(">\n");
}

/// Escapes markup characters and drops control characters XML 1.0 forbids
fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            '\t' | '\n' | '\r' => escaped.push(c),
            c if c.is_control() => {}
            c => escaped.push(c),
        }
    }
    escaped
}
