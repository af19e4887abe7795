//! A full batch against an in-memory catalog: match, inject, cache, re-run.

use comicinfo_injector::{
    ArchiveHandle, COMIC_INFO_ENTRY, COVER_ENTRY, CancelToken, FolderOutcome, InjectOptions,
    MatchCache, MatchPolicy, MetadataProvider, MetadataRetrievalError, PendingMatch, Pipeline,
    ProgressEvent, RecordSource, SearchCandidate, TitlePreference, ToolLocator, collect_tasks,
    normalize_key, run_batch,
};
use std::cell::Cell;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

struct Catalog {
    searches: Cell<usize>,
    covers: Cell<usize>,
}

impl Catalog {
    fn new() -> Self {
        Self {
            searches: Cell::new(0),
            covers: Cell::new(0),
        }
    }
}

fn entry(id: u64, title: &str) -> SearchCandidate {
    SearchCandidate {
        id,
        title_romaji: Some(title.to_string()),
        title_english: None,
        title_native: None,
        year: Some(1997),
        description: "Pirates & treasure".to_string(),
        genres: vec!["Adventure".to_string()],
        staff: vec!["Eiichiro Oda".to_string()],
        artists: vec!["Eiichiro Oda".to_string()],
        cover_url: Some(format!("https://img.example/{id}.jpg")),
    }
}

impl MetadataProvider for Catalog {
    fn search(
        &self,
        title: &str,
        _language: TitlePreference,
    ) -> Result<Vec<SearchCandidate>, MetadataRetrievalError> {
        self.searches.set(self.searches.get() + 1);
        match title {
            "One Piece" => Ok(vec![entry(13, "One Piece"), entry(14, "One Piece Party")]),
            _ => Ok(vec![entry(20, "Naruto")]),
        }
    }

    fn fetch_by_id(&self, id: u64) -> Result<SearchCandidate, MetadataRetrievalError> {
        Err(MetadataRetrievalError::NotFound(id.to_string()))
    }

    fn fetch_cover(&self, _url: &str) -> Result<Vec<u8>, MetadataRetrievalError> {
        self.covers.set(self.covers.get() + 1);
        Ok(b"\xff\xd8\xff\xe0jpeg".to_vec())
    }
}

fn write_cbz(path: &Path) {
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    writer
        .start_file("001.jpg", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"page").unwrap();
    writer.finish().unwrap();
}

#[test]
fn test_batch_then_rerun_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let library = dir.path().join("library");
    let one_piece = library.join("One Piece");
    let unknown = library.join("Unknown Thing");
    fs::create_dir_all(&one_piece).unwrap();
    fs::create_dir_all(&unknown).unwrap();
    write_cbz(&one_piece.join("v01.cbz"));
    write_cbz(&one_piece.join("v02.cbz"));
    write_cbz(&unknown.join("v01.cbz"));

    let cache_path = dir.path().join("state").join("cache.json");
    let tasks = collect_tasks(&[], &[library.clone()], TitlePreference::Romaji, true).unwrap();
    let options = InjectOptions {
        locator: ToolLocator::with_search_path(dir.path().join("no-tools")),
        ..InjectOptions::default()
    };
    let policy = MatchPolicy {
        skip_unresolved: true,
        ..MatchPolicy::default()
    };

    // First run: one automatic match, one folder skipped by the user
    let mut pipeline = Pipeline::new(Catalog::new(), MatchCache::open(&cache_path).unwrap(), policy);
    let mut asked = Vec::new();
    let mut resolver = |pending: &PendingMatch| {
        asked.push(pending.task.title.clone());
        comicinfo_injector::ManualChoice::Skip
    };
    let mut events = Vec::new();
    let report = run_batch(
        &mut pipeline,
        &tasks,
        &options,
        &mut resolver,
        &CancelToken::new(),
        |event| events.push(event),
    );

    assert_eq!(asked, vec!["Unknown Thing"]);
    assert_eq!(pipeline.provider().searches.get(), 2);
    assert_eq!(pipeline.provider().covers.get(), 1);
    assert_eq!(report.archives_written(), 2);
    assert_eq!(
        report.folders,
        vec![
            (
                one_piece.clone(),
                FolderOutcome::Injected {
                    source: RecordSource::Automatic,
                    written: 2,
                    failed: 0,
                }
            ),
            (unknown.clone(), FolderOutcome::Skipped),
        ]
    );
    assert!(events.iter().any(|event| matches!(
        event,
        ProgressEvent::Matched { id: 13, source: RecordSource::Automatic, .. }
    )));

    let mut handle = ArchiveHandle::open(&one_piece.join("v02.cbz"), &options.locator).unwrap();
    assert_eq!(
        handle.list_entries().unwrap(),
        vec!["001.jpg", COMIC_INFO_ENTRY, COVER_ENTRY]
    );
    let xml = String::from_utf8(handle.read_entry(COMIC_INFO_ENTRY).unwrap()).unwrap();
    assert!(xml.contains("<Series>One Piece</Series>"));
    assert!(xml.contains("<Summary>Pirates &amp; treasure</Summary>"));
    drop(handle);

    let untouched = ArchiveHandle::open(&unknown.join("v01.cbz"), &options.locator)
        .unwrap()
        .list_entries()
        .unwrap();
    assert_eq!(untouched, vec!["001.jpg"]);

    pipeline.shutdown().unwrap();
    let stored: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&cache_path).unwrap()).unwrap();
    let resolved = &stored[normalize_key("One Piece").as_str()];
    assert_eq!(resolved["status"], "resolved");
    assert_eq!(resolved["id"], 13);
    assert_eq!(resolved["source"], "automatic");
    assert_eq!(stored[normalize_key("Unknown Thing").as_str()]["status"], "unresolved");

    // Second run: everything comes from the cache
    let mut pipeline = Pipeline::new(Catalog::new(), MatchCache::open(&cache_path).unwrap(), policy);
    let mut never_asked = |_: &PendingMatch| -> comicinfo_injector::ManualChoice {
        panic!("no folder should need a manual match")
    };
    let report = run_batch(
        &mut pipeline,
        &tasks,
        &options,
        &mut never_asked,
        &CancelToken::new(),
        |_| {},
    );

    assert_eq!(pipeline.provider().searches.get(), 0);
    assert_eq!(
        report.folders,
        vec![
            (
                one_piece.clone(),
                FolderOutcome::Injected {
                    source: RecordSource::Cached,
                    written: 2,
                    failed: 0,
                }
            ),
            (unknown, FolderOutcome::Skipped),
        ]
    );

    let entries = ArchiveHandle::open(&one_piece.join("v01.cbz"), &options.locator)
        .unwrap()
        .list_entries()
        .unwrap();
    assert_eq!(entries, vec!["001.jpg", COMIC_INFO_ENTRY, COVER_ENTRY]);
}
