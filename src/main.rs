use clap::{Args, Parser, Subcommand};
use comicinfo_injector::{
    AppDirs, BatchMessage, CachedMatch, Config, FolderOutcome, InjectOptions, InjectorError,
    ManualChoice, MatchCache, OriginalPolicy, PendingMatch, ProgressEvent, TitlePreference,
    build_pipeline, collect_tasks, derive_title, normalize_key, parse_manga_url, spawn_batch,
};
use dialoguer::{Confirm, Input, Select};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "comicinfo-injector", version)]
#[command(about = "Write AniList metadata as ComicInfo.xml into manga .cbz/.cbr archives")]
struct Cli {
    /// Increase log output (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Read settings from this file instead of the platform config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Tag every archive in the given series folders
    Run(RunArgs),

    /// Inspect or edit the match cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,

        /// Use this cache file instead of the configured one
        #[arg(long)]
        cache_file: Option<PathBuf>,
    },

    /// Show the search title and cache key derived from folder names
    Key {
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Series folders containing .cbz/.cbr files
    folders: Vec<PathBuf>,

    /// Folders whose subfolders are series folders
    #[arg(long = "parent", value_name = "DIR")]
    parents: Vec<PathBuf>,

    /// Title language written to <Series> (romaji or english)
    #[arg(long)]
    prefer: Option<TitlePreference>,

    /// Do not write cover.jpg
    #[arg(long)]
    no_covers: bool,

    /// Keep .cbr files after converting them
    #[arg(long)]
    keep_originals: bool,

    /// Minimum similarity (0.0 to 1.0) for automatic matches
    #[arg(long, value_name = "F")]
    threshold: Option<f64>,

    /// Never prompt; folders without an automatic match are skipped
    #[arg(long)]
    non_interactive: bool,

    /// Skip folders cached as unresolved instead of searching again
    #[arg(long)]
    skip_unresolved: bool,

    /// Use this cache file instead of the configured one
    #[arg(long)]
    cache_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// List all cached matches
    List,
    /// Remove one key (a folder name is normalized first)
    Forget { key: String },
    /// Remove every entry
    Clear {
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<Config, InjectorError> {
    Ok(match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Run(args) => run(args, cli.config.as_deref()),
        Command::Cache { action, cache_file } => {
            manage_cache(action, cache_file, cli.config.as_deref())
        }
        Command::Key { names } => {
            for name in names {
                println!("{}", name);
                println!("  title: {}", derive_title(&name));
                println!("  key:   {}", normalize_key(&name));
            }
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: RunArgs, config_path: Option<&Path>) -> Result<(), InjectorError> {
    let mut config = load_config(config_path)?;
    if let Some(prefer) = args.prefer {
        config.title_preference = prefer;
    }
    if args.no_covers {
        config.add_covers = false;
    }
    if args.keep_originals {
        config.original_policy = OriginalPolicy::Keep;
    }
    if let Some(threshold) = args.threshold {
        config.match_threshold = threshold;
    }
    if args.skip_unresolved {
        config.skip_unresolved = true;
    }
    if args.cache_file.is_some() {
        config.cache_file = args.cache_file;
    }
    let config = config.sanitized();

    let tasks = collect_tasks(
        &args.folders,
        &args.parents,
        config.title_preference,
        config.add_covers,
    )?;
    if tasks.is_empty() {
        println!("No folders to process. Pass series folders or --parent DIR.");
        return Ok(());
    }

    let dirs = AppDirs::discover()?;
    let pipeline = build_pipeline(&config, &config.cache_path(&dirs))?;
    let options = InjectOptions {
        original_policy: config.original_policy,
        conversion_log: Some(dirs.conversion_log()),
        locator: config.tool_locator(),
    };

    let batch = spawn_batch(pipeline, tasks, options);
    for message in batch.messages() {
        match message {
            BatchMessage::Progress(event) => handle_progress_event(event),
            BatchMessage::ManualMatch { pending, reply } => {
                let choice = if args.non_interactive {
                    println!("  No automatic match, skipping (non-interactive)");
                    ManualChoice::Skip
                } else {
                    prompt_manual_match(&pending)
                };
                // The worker treats a dropped reply as "stop"
                let _ = reply.send(choice);
            }
        }
    }

    let (report, cache) = batch.join()?;
    tracing::debug!(path = %cache.path().display(), entries = cache.len(), "cache flushed");

    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        println!("\nFailed folders:");
        for (path, reason) in failures {
            println!("  {}: {}", path.display(), reason);
        }
    }

    Ok(())
}

/// Handles progress events and prints formatted output to stdout
fn handle_progress_event(event: ProgressEvent) {
    match event {
        ProgressEvent::Started { total } => {
            println!("Processing {} folder(s)...", total);
        }
        ProgressEvent::FolderStarted {
            index,
            total,
            path,
            title,
        } => {
            println!("\n[{}/{}] {} (searching as '{}')", index + 1, total, path.display(), title);
        }
        ProgressEvent::ArchivesFound { count, .. } => {
            if count == 0 {
                println!("  No .cbz/.cbr files found.");
            } else {
                println!("  Found {} archive(s)", count);
            }
        }
        ProgressEvent::Matched {
            title, id, source, ..
        } => {
            println!("  Matched: {} (AniList {}, {:?})", title, id, source);
        }
        ProgressEvent::ArchiveInjected { report } => {
            let name = display_name(&report.archive);
            let size = std::fs::metadata(&report.archive)
                .map(|m| humansize::format_size(m.len(), humansize::DECIMAL))
                .unwrap_or_default();
            let cover = if report.cover_written { " + cover" } else { "" };
            match &report.converted_from {
                Some(original) => println!(
                    "  Converted {} -> {} [{}] ComicInfo.xml{}",
                    display_name(original),
                    name,
                    size,
                    cover
                ),
                None => println!("  Injected {} [{}] ComicInfo.xml{}", name, size, cover),
            }
            if report.cover_suppressed {
                println!("    Skipped cover for {} (contains Thumbs.db)", name);
            }
        }
        ProgressEvent::ArchiveSuperseded { path, by } => {
            println!(
                "  Left {} as is, {} already exists",
                display_name(&path),
                display_name(&by)
            );
        }
        ProgressEvent::ArchiveFailed { path, error } => {
            println!("  Failed {}: {}", display_name(&path), error);
        }
        ProgressEvent::ToolMissing { tools } => {
            eprintln!(
                "\nWarning: .cbr files cannot be converted. Install one of: {}\n",
                tools
            );
        }
        ProgressEvent::FolderSkipped { .. } => {
            println!("  Skipped.");
        }
        ProgressEvent::FolderFailed { error, .. } => {
            println!("  Failed: {}", error);
        }
        ProgressEvent::Cancelled { remaining } => {
            println!("\nStopped. {} folder(s) not processed.", remaining);
        }
        ProgressEvent::Complete { report } => {
            let count = |wanted: fn(&FolderOutcome) -> bool| {
                report.folders.iter().filter(|(_, o)| wanted(o)).count()
            };
            println!(
                "\nDone: {} archive(s) tagged, {} folder(s) skipped, {} failed.",
                report.archives_written(),
                count(|o| matches!(o, FolderOutcome::Skipped | FolderOutcome::NoArchives)),
                count(|o| matches!(o, FolderOutcome::Failed(_))),
            );
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Asks the user to resolve a folder without an automatic match
fn prompt_manual_match(pending: &PendingMatch) -> ManualChoice {
    let mut items: Vec<String> = pending
        .candidates
        .iter()
        .map(|candidate| {
            let year = candidate
                .year
                .map(|y| format!(" ({})", y))
                .unwrap_or_default();
            let others: Vec<_> = candidate.titles().skip(1).collect();
            let others = if others.is_empty() {
                String::new()
            } else {
                format!(" / {}", others.join(" / "))
            };
            format!(
                "{}{}{} - {}",
                candidate.preferred_title(pending.task.preference),
                year,
                others,
                candidate.web_url()
            )
        })
        .collect();
    let url_index = items.len();
    items.push("Paste an AniList URL".to_string());
    items.push("Skip this folder".to_string());
    items.push("Stop after this folder".to_string());

    let prompt = format!("No confident match for '{}'", pending.task.title);
    let selection = Select::new()
        .with_prompt(prompt)
        .items(&items)
        .default(0)
        .interact_opt();

    match selection {
        Ok(Some(index)) if index < url_index => ManualChoice::Candidate(index),
        Ok(Some(index)) if index == url_index => prompt_url(),
        Ok(Some(index)) if index == url_index + 1 => ManualChoice::Skip,
        Ok(None) => ManualChoice::Skip,
        Ok(Some(_)) => ManualChoice::Stop,
        Err(e) => {
            tracing::warn!(error = %e, "prompt failed, skipping folder");
            ManualChoice::Skip
        }
    }
}

fn prompt_url() -> ManualChoice {
    let url = Input::<String>::new()
        .with_prompt("AniList URL")
        .validate_with(|input: &String| -> Result<(), String> {
            parse_manga_url(input).map(|_| ()).map_err(|e| e.to_string())
        })
        .interact_text();

    match url {
        Ok(url) => ManualChoice::Url(url),
        Err(e) => {
            tracing::warn!(error = %e, "prompt failed, skipping folder");
            ManualChoice::Skip
        }
    }
}

fn manage_cache(
    action: CacheAction,
    cache_file: Option<PathBuf>,
    config_path: Option<&Path>,
) -> Result<(), InjectorError> {
    let config = load_config(config_path)?;
    let path = match cache_file.or(config.cache_file.clone()) {
        Some(path) => path,
        None => config.cache_path(&AppDirs::discover()?),
    };
    let mut cache = MatchCache::open(&path)?;

    match action {
        CacheAction::List => {
            if cache.is_empty() {
                println!("Cache is empty ({})", path.display());
                return Ok(());
            }
            for (key, entry) in cache.entries() {
                let stored = entry.stored_at.format("%Y-%m-%d %H:%M");
                match &entry.value {
                    CachedMatch::Resolved(record) => println!(
                        "{:<40} {} -> {} [{}, {:?}]",
                        key,
                        stored,
                        record.candidate.preferred_title(config.title_preference),
                        record.candidate.id,
                        record.source
                    ),
                    CachedMatch::Unresolved => println!("{:<40} {} -> unresolved", key, stored),
                }
            }
            println!("\n{} entries in {}", cache.len(), path.display());
        }
        CacheAction::Forget { key } => {
            let removed = cache.forget(&key)? || cache.forget(&normalize_key(&key))?;
            if removed {
                println!("Removed '{}'", key);
            } else {
                println!("No cache entry for '{}'", key);
            }
        }
        CacheAction::Clear { yes } => {
            let confirmed = yes
                || Confirm::new()
                    .with_prompt(format!("Remove all {} cache entries?", cache.len()))
                    .default(false)
                    .interact()
                    .unwrap_or(false);
            if confirmed {
                let count = cache.clear()?;
                println!("Removed {} entries", count);
            }
        }
    }

    Ok(())
}
