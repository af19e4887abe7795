//! `.cbr` archives that sit next to a `.cbz` of the same name.
//!
//! Single test for the same reason as `cbr_conversion.rs`: the stub `7z`
//! script must not be open for writing while another thread forks.

#![cfg(unix)]

use comicinfo_injector::{
    ArchiveHandle, COMIC_INFO_ENTRY, FolderMetadata, InjectOptions, MetadataRecord, OriginalPolicy,
    RecordSource, SearchCandidate, TitlePreference, ToolLocator, inject, scan_for_archives,
};
use std::fs::{self, File};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

const RAR_MAGIC: &[u8] = b"Rar!\x1a\x07\x00not really a rar";

const EXTRACTING_7Z: &str = r#"#!/bin/sh
for arg in "$@"; do
  case "$arg" in
    -o*) dest="${arg#-o}" ;;
  esac
done
mkdir -p "$dest"
printf 'converted-page' > "$dest/001.jpg"
"#;

fn metadata() -> FolderMetadata {
    let candidate = SearchCandidate {
        id: 2,
        title_romaji: Some("Pluto".to_string()),
        title_english: None,
        title_native: None,
        year: Some(2003),
        description: String::new(),
        genres: Vec::new(),
        staff: vec!["Naoki Urasawa".to_string()],
        artists: Vec::new(),
        cover_url: None,
    };
    FolderMetadata::new(
        MetadataRecord::new(candidate, RecordSource::Automatic),
        TitlePreference::Romaji,
        None,
    )
}

fn entries(path: &Path) -> Vec<String> {
    ArchiveHandle::open(path, &ToolLocator::default())
        .unwrap()
        .list_entries()
        .unwrap()
}

/// Runs `inject` over every archive of `folder`, the way a batch does
fn tag_folder(folder: &Path, options: &InjectOptions) {
    for archive in scan_for_archives(folder).unwrap() {
        inject(&archive.path, &metadata(), options).unwrap();
    }
}

#[test]
fn test_conversion_never_replaces_an_existing_zip() {
    let library = tempfile::tempdir().unwrap();
    let tools = tempfile::tempdir().unwrap();
    let tool = tools.path().join("7z");
    fs::write(&tool, EXTRACTING_7Z).unwrap();
    fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

    let log = library.path().join("converted_cbr.log");
    let options = InjectOptions {
        original_policy: OriginalPolicy::Remove,
        conversion_log: Some(log.clone()),
        locator: ToolLocator::with_search_path(tools.path()),
    };

    // A user's own v01.cbz next to an unrelated v01.cbr survives with its pages
    let mixed = library.path().join("mixed");
    fs::create_dir_all(&mixed).unwrap();
    fs::write(mixed.join("v01.cbr"), RAR_MAGIC).unwrap();
    let mut writer = ZipWriter::new(File::create(mixed.join("v01.cbz")).unwrap());
    writer
        .start_file("user-page.jpg", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"mine").unwrap();
    writer.finish().unwrap();

    tag_folder(&mixed, &options);

    assert_eq!(entries(&mixed.join("v01.cbz")), vec!["user-page.jpg", COMIC_INFO_ENTRY]);
    assert_eq!(fs::read(mixed.join("v01.cbr")).unwrap(), RAR_MAGIC);
    assert!(!log.exists());

    // Under the keep policy a second run does not convert the kept original again
    let kept = library.path().join("kept");
    fs::create_dir_all(&kept).unwrap();
    fs::write(kept.join("v02.cbr"), RAR_MAGIC).unwrap();
    let keep_options = InjectOptions {
        original_policy: OriginalPolicy::Keep,
        ..options
    };

    tag_folder(&kept, &keep_options);
    tag_folder(&kept, &keep_options);

    assert_eq!(entries(&kept.join("v02.cbz")), vec!["001.jpg", COMIC_INFO_ENTRY]);
    assert_eq!(fs::read(kept.join("v02.cbr")).unwrap(), RAR_MAGIC);
    assert_eq!(fs::read_to_string(&log).unwrap().lines().count(), 1);
}
