//! Folder title derivation and cache key normalization
//!
//! Folder names of manga collections carry a lot of noise: release group tags
//! in brackets, years, volume and chapter markers. Two functions strip that
//! noise:
//!
//! - [`derive_title`] keeps the original casing and is used as the search term.
//! - [`normalize_key`] additionally lowercases and is used as the cache key.
//!
//! Stripping rules, applied repeatedly until the string stops changing:
//!
//! 1. Bracketed groups `[..]`, `(..)` and `{..}` are removed.
//! 2. Remaining bracket characters and underscores become spaces.
//! 3. Four-digit years starting with `19` or `20` are removed.
//! 4. Volume and chapter markers are removed: `v05`, `vol. 3`, `volume 12`,
//!    `ch 4`, `chap.7`, `chapter 10.5`, `c012`, `#3`, and ranges like `v01-03`.
//! 5. Whitespace is collapsed and separators (`-`, `.`, `,`, `:`, `~`) are
//!    trimmed from both ends.
//!
//! If nothing is left afterwards, the whitespace-collapsed input is used
//! instead so folders named only `[Group]` still get a stable key.

use regex::Regex;
use std::sync::LazyLock;

static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]|\([^)]*\)|\{[^}]*\}").expect("valid regex"));

static STRAY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\[\]\(\)\{\}_]").expect("valid regex"));

static YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(?:19|20)\d{2}\b").expect("valid regex"));

static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:\b(?:volume|vol|v|chapter|chap|ch|c)\.?\s*|#)\d+(?:\.\d+)?(?:\s*-\s*\d+(?:\.\d+)?)?\b",
    )
    .expect("valid regex")
});

fn is_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, '-' | '.' | ',' | ':' | '~')
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One stripping pass over `text`
fn strip_once(text: &str) -> String {
    let text = BRACKETED.replace_all(text, " ");
    let text = STRAY.replace_all(&text, " ");
    let text = YEAR.replace_all(&text, " ");
    let text = MARKER.replace_all(&text, " ");
    collapse_whitespace(&text)
        .trim_matches(is_separator)
        .to_string()
}

fn strip_noise(text: &str) -> String {
    let mut current = strip_once(text);
    loop {
        let next = strip_once(&current);
        if next == current {
            break;
        }
        current = next;
    }

    if current.is_empty() {
        collapse_whitespace(text)
    } else {
        current
    }
}

/// Derives a human readable search title from a folder name.
///
/// Casing is preserved.
///
/// ```
/// use comicinfo_injector::derive_title;
///
/// assert_eq!(derive_title("One Piece v05 [Group]"), "One Piece");
/// ```
pub fn derive_title(folder_name: &str) -> String {
    strip_noise(folder_name)
}

/// Normalizes a folder name or catalog title into a cache key.
///
/// The function is idempotent: `normalize_key(&normalize_key(x)) == normalize_key(x)`.
///
/// ```
/// use comicinfo_injector::normalize_key;
///
/// assert_eq!(normalize_key("One Piece v05 [Group]"), "one piece");
/// assert_eq!(normalize_key("One Piece v12 [Group]"), "one piece");
/// ```
pub fn normalize_key(name: &str) -> String {
    strip_noise(&name.to_lowercase())
}

/// Scores how well a catalog title matches a normalized folder key.
///
/// Returns `1.0` for an exact match of the normalized forms, the length ratio
/// of the shorter to the longer string when one contains the other, and `0.0`
/// otherwise.
pub(crate) fn similarity(key: &str, title: &str) -> f64 {
    let title = normalize_key(title);
    if key.is_empty() || title.is_empty() {
        return 0.0;
    }
    if key == title {
        return 1.0;
    }

    let (shorter, longer) = if key.chars().count() <= title.chars().count() {
        (key, title.as_str())
    } else {
        (title.as_str(), key)
    };

    if longer.contains(shorter) {
        shorter.chars().count() as f64 / longer.chars().count() as f64
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_volume_and_group_stripped() {
        assert_eq!(normalize_key("One Piece v05 [Group]"), "one piece");
        assert_eq!(normalize_key("One Piece v12 [Group]"), "one piece");
        assert_eq!(
            normalize_key("One Piece v05 [Group]"),
            normalize_key("One Piece v12 [Group]")
        );
    }

    #[test]
    fn test_markers() {
        assert_eq!(normalize_key("Berserk Vol. 3"), "berserk");
        assert_eq!(normalize_key("Berserk Volume 12"), "berserk");
        assert_eq!(normalize_key("Blame! ch 4"), "blame!");
        assert_eq!(normalize_key("Dorohedoro Chapter 10.5"), "dorohedoro");
        assert_eq!(normalize_key("Vagabond c012"), "vagabond");
        assert_eq!(normalize_key("Monster #3"), "monster");
        assert_eq!(normalize_key("Pluto v01-03"), "pluto");
    }

    #[test]
    fn test_years_and_brackets() {
        assert_eq!(normalize_key("Akira (1982) [Dark Horse]"), "akira");
        assert_eq!(normalize_key("Akira 1982"), "akira");
        assert_eq!(normalize_key("{Scans} Nana_v01"), "nana");
        assert_eq!(normalize_key("Chainsaw   Man  -  v02"), "chainsaw man");
    }

    #[test]
    fn test_words_containing_marker_letters_survive() {
        assert_eq!(normalize_key("Vinland Saga"), "vinland saga");
        assert_eq!(normalize_key("Cowboy Bebop"), "cowboy bebop");
        assert_eq!(normalize_key("20th Century Boys"), "20th century boys");
    }

    #[test]
    fn test_empty_after_stripping_falls_back() {
        assert_eq!(normalize_key("[Group]"), "[group]");
        assert_eq!(normalize_key("  2019  "), "2019");
    }

    #[test]
    fn test_derive_title_keeps_case() {
        assert_eq!(derive_title("Yotsuba&! v14 (2022) [Digital]"), "Yotsuba&!");
        assert_eq!(derive_title("Oyasumi_Punpun"), "Oyasumi Punpun");
    }

    #[test]
    fn test_similarity() {
        assert_eq!(similarity("one piece", "ONE PIECE"), 1.0);
        assert_eq!(similarity("berserk", "Berserk (1989)"), 1.0);
        let partial = similarity("berserk", "Berserk of Gluttony");
        assert!(partial > 0.3 && partial < 0.5);
        assert_eq!(similarity("naruto", "Bleach"), 0.0);
        assert_eq!(similarity("", "Bleach"), 0.0);
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(name in "[a-zA-Z0-9 _.#:~,\\-\\[\\](){}]{0,48}") {
            let once = normalize_key(&name);
            prop_assert_eq!(normalize_key(&once), once);
        }

        #[test]
        fn normalize_is_idempotent_for_any_text(name in "\\PC{0,32}") {
            let once = normalize_key(&name);
            prop_assert_eq!(normalize_key(&once), once);
        }

        #[test]
        fn volume_number_never_changes_key(title in "[A-Za-z]{3,12}( [A-Za-z]{3,12}){0,2}", a in 1u32..200, b in 1u32..200) {
            prop_assert_eq!(
                normalize_key(&format!("{title} v{a:02} [Group]")),
                normalize_key(&format!("{title} v{b:02} [Group]"))
            );
        }
    }
}
