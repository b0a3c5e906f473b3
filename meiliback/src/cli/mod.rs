/*
 * meiliback - backup and restore Meilisearch indexes
 *
 * SPDX-FileCopyrightText: 2025-2026 Steve Schoettler
 * SPDX-License-Identifier: Apache-2.0
 */
use std::{
    ffi::OsString,
    fs,
    io::{self, IsTerminal},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail, ensure};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use meili::prelude::*;
use meiliback::{
    archive::{
        ArchiveFileEntry, ArchiveLayout, ArchiveOutput, ArchivedIndex, BACKUP_ROOT, BackupArchive,
        DirectoryStore, MemoryStore,
    },
    backup::{BackedUpIndex, BackupConfig, BackupRunner, BackupSummary, DEFAULT_INDEX_LIST_LIMIT},
    events::{EventSink, MigrationEvent, TextLog},
    repair::RepairTable,
    restore::{DEFAULT_BATCH_SIZE, RestoreConfig, RestoreRunner, RestoreSummary},
};
use serde::Serialize;
use tracing::info;

const TMP_BACKUP_PREFIX: &str = "meiliback_tmp";
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_BATCH_PAUSE_MS: u64 = 1000;
const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Parser, Debug)]
#[command(name = "meiliback")]
#[command(author, version, about = "Meilisearch backup and restore tool", long_about = None)]
pub struct Cli {
    /// Meilisearch URL. Default: environment `MEILI_URL` or <http://127.0.0.1:7700>
    #[arg(short = 'u', long, env = "MEILI_URL", global = true)]
    pub url: Option<String>,

    /// Api key sent as a bearer token
    #[arg(short = 'k', long, env = "MEILI_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// Interval between task status queries
    #[arg(long, value_name = "MS", default_value_t = DEFAULT_POLL_INTERVAL_MS, global = true)]
    pub poll_interval_ms: u64,

    /// Print machine-readable output where applicable
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose mode (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Color mode for CLI and log output
    #[arg(long, value_enum, default_value_t = ColorArg::Auto, global = true)]
    pub color: ColorArg,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Back up every index into a zip archive
    Backup(BackupArgs),

    /// Restore indexes from an archive
    Restore(RestoreArgs),

    /// List indexes in an archive
    List(ListArgs),
}

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Parent directory where the archive will be created (default: current directory)
    #[arg(long, value_name = "DIR", conflicts_with = "dest")]
    pub dir: Option<PathBuf>,

    /// Output archive path to create
    #[arg(long, value_name = "PATH", conflicts_with_all = ["dir", "prefix"])]
    pub dest: Option<PathBuf>,

    /// Archive name prefix used with --dir/default parent; ignored when --dest is used
    #[arg(long, value_name = "PREFIX")]
    pub prefix: Option<String>,

    /// Documents per page request
    #[arg(long, value_name = "N", default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: usize,

    /// `limit` of the index listing request
    #[arg(long, value_name = "N", default_value_t = DEFAULT_INDEX_LIST_LIMIT)]
    pub index_limit: usize,

    /// Write one json file per index (`all_indexes.json` layout) instead of a directory tree
    #[arg(long)]
    pub flat: bool,

    /// Also write the text log to this file
    #[arg(long, value_name = "FILE")]
    pub log: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Archive path (directory or .zip)
    #[arg(value_name = "ARCHIVE")]
    pub archive: PathBuf,

    /// Documents per upload
    #[arg(long, value_name = "N", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Pause between batches
    #[arg(long, value_name = "MS", default_value_t = DEFAULT_BATCH_PAUSE_MS)]
    pub batch_pause_ms: u64,

    /// Send empty setting categories during per-category fallback instead of skipping them
    #[arg(long)]
    pub apply_empty_settings: bool,

    /// Json repair table replacing the built-in policies
    #[arg(long, value_name = "FILE", conflicts_with = "no_default_policies")]
    pub policies: Option<PathBuf>,

    /// Restore every index unchanged, without the built-in policies
    #[arg(long)]
    pub no_default_policies: bool,

    /// Also write the text log to this file
    #[arg(long, value_name = "FILE")]
    pub log: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Archive path (directory or .zip)
    #[arg(value_name = "ARCHIVE")]
    pub archive: PathBuf,

    /// List every file in the archive
    #[arg(long)]
    pub files: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ColorArg {
    Auto,
    Always,
    Never,
}

pub struct AppContext {
    pub client: MeiliClient,
    pub waiter: TaskWaiter,
    pub json: bool,
}

pub fn parse_cli_from_env() -> Result<Cli> {
    let raw: Vec<OsString> = std::env::args_os().collect();
    match Cli::try_parse_from(&raw) {
        Ok(cli) => Ok(cli),
        // --help and --version
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => Err(anyhow!(err.to_string())),
    }
}

pub fn emit_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    println!("{text}");
    Ok(())
}

pub async fn run(cli: Cli) -> Result<()> {
    if let Commands::List(args) = &cli.command {
        return handle_list(cli.json, args);
    }

    let ctx = AppContext {
        client: build_client(&cli)?,
        waiter: TaskWaiter::new(Duration::from_millis(cli.poll_interval_ms)),
        json: cli.json,
    };

    match cli.command {
        Commands::Backup(args) => handle_backup(&ctx, args).await,
        Commands::Restore(args) => handle_restore(&ctx, args).await,
        Commands::List(_) => unreachable!("handled above"),
    }
}

fn build_client(cli: &Cli) -> Result<MeiliClient> {
    let mut config = ClientConfig::default();
    if let Some(url) = cli.url.as_deref() {
        config = config.base_url(url);
    }
    if let Some(api_key) = cli.api_key.as_deref() {
        config = config.api_key(api_key);
    }
    Ok(MeiliClient::with_config(config)?)
}

#[derive(Debug, Serialize)]
struct BackupReport {
    archive: PathBuf,
    layout: &'static str,
    indexes: Vec<BackedUpIndex>,
}

async fn handle_backup(ctx: &AppContext, args: BackupArgs) -> Result<()> {
    ensure!(args.page_size > 0, "--page-size must be greater than zero");
    let target = resolve_backup_target(&args)?;
    let config = BackupConfig {
        page_size: args.page_size,
        index_list_limit: args.index_limit,
        source_url: Some(ctx.client.base_url().to_string()),
    };
    let runner = BackupRunner::new(&ctx.client, &config);

    let progress = ProgressReporter::new(ctx.json, "Starting backup");
    let mut sink = (ConsoleEcho::new(&progress), TextLog::new());
    let result = if args.flat {
        backup_flat(&runner, &target, &mut sink).await
    } else {
        backup_tree(&runner, &target, &mut sink).await
    };
    if let Some(path) = args.log.as_deref() {
        write_log(path, sink.1.as_str())?;
    }
    let summary = result?;
    progress.finish("Backup completed");

    let documents: usize = summary.indexes.iter().map(|index| index.documents).sum();
    let incomplete = summary.indexes.iter().filter(|index| !index.complete).count();
    if ctx.json {
        emit_json(&BackupReport {
            archive: target.archive_path,
            layout: if args.flat { "flat" } else { "tree" },
            indexes: summary.indexes,
        })?;
    } else {
        println!(
            "archive={} indexes={} documents={documents} incomplete={incomplete}",
            target.archive_path.display(),
            summary.indexes.len(),
        );
    }
    Ok(())
}

async fn backup_tree<S, E>(
    runner: &BackupRunner<'_, S>,
    target: &BackupTarget,
    sink: &mut E,
) -> Result<BackupSummary>
where
    S: SearchService,
    E: EventSink,
{
    let work_dir = tempfile::Builder::new()
        .prefix(TMP_BACKUP_PREFIX)
        .tempdir_in(&target.parent_dir)
        .with_context(|| {
            format!(
                "failed to create temporary directory in {}",
                target.parent_dir.display()
            )
        })?;
    let tmp_archive = work_dir.path().join(format!("{BACKUP_ROOT}.zip"));
    let mut store = DirectoryStore::new(work_dir.path(), &tmp_archive);
    let summary = runner.run(&mut store, sink).await?;
    finalize_backup_output_path(&tmp_archive, &target.archive_path)?;
    Ok(summary)
}

async fn backup_flat<S, E>(
    runner: &BackupRunner<'_, S>,
    target: &BackupTarget,
    sink: &mut E,
) -> Result<BackupSummary>
where
    S: SearchService,
    E: EventSink,
{
    let mut store = MemoryStore::new();
    let summary = runner.run(&mut store, sink).await?;
    if let ArchiveOutput::Bytes(bytes) = &summary.output {
        fs::write(&target.archive_path, bytes)
            .with_context(|| format!("failed to write {}", target.archive_path.display()))?;
    }
    Ok(summary)
}

#[derive(Debug)]
struct BackupTarget {
    parent_dir: PathBuf,
    archive_path: PathBuf,
}

fn resolve_backup_target(args: &BackupArgs) -> Result<BackupTarget> {
    if let Some(dest) = args.dest.as_ref() {
        ensure!(
            !dest.exists(),
            "target archive path already exists: {}",
            dest.display()
        );
        let parent = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        ensure!(
            parent.is_dir(),
            "parent directory for --dest does not exist: {}",
            parent.display()
        );
        return Ok(BackupTarget {
            parent_dir: parent.to_path_buf(),
            archive_path: dest.clone(),
        });
    }

    let parent_dir = args.dir.clone().unwrap_or_else(|| PathBuf::from("."));
    ensure!(
        parent_dir.is_dir(),
        "output directory does not exist: {}",
        parent_dir.display()
    );
    let ts = Utc::now().format("%Y%m%d-%H%M%S");
    let prefix = args.prefix.as_deref().unwrap_or(BACKUP_ROOT);
    let archive_path = parent_dir.join(format!("{}_{ts}.zip", sanitize_path_component(prefix)));
    ensure!(
        !archive_path.exists(),
        "target archive path already exists: {}",
        archive_path.display()
    );
    Ok(BackupTarget {
        parent_dir,
        archive_path,
    })
}

fn finalize_backup_output_path(source: &Path, dest: &Path) -> Result<()> {
    if source == dest {
        return Ok(());
    }
    fs::rename(source, dest).with_context(|| {
        format!(
            "failed to move backup output from {} to {}",
            source.display(),
            dest.display()
        )
    })
}

async fn handle_restore(ctx: &AppContext, args: RestoreArgs) -> Result<()> {
    ensure!(args.batch_size > 0, "--batch-size must be greater than zero");
    let config = RestoreConfig {
        batch_size: args.batch_size,
        batch_pause: Duration::from_millis(args.batch_pause_ms),
        empty_settings: if args.apply_empty_settings {
            EmptySettingPolicy::Apply
        } else {
            EmptySettingPolicy::Skip
        },
        policies: load_policies(&args)?,
    };
    let archive = BackupArchive::open(&args.archive)?;
    info!(archive = %args.archive.display(), "restoring");

    let progress = ProgressReporter::new(ctx.json, "Starting restore");
    let mut sink = (ConsoleEcho::new(&progress), TextLog::new());
    let summary = RestoreRunner::new(&ctx.client, &ctx.waiter, &config)
        .run(&archive, &mut sink)
        .await;
    if let Some(path) = args.log.as_deref() {
        write_log(path, sink.1.as_str())?;
    }
    progress.finish(if summary.aborted.is_some() {
        "Restore aborted"
    } else {
        "Restore completed"
    });

    if ctx.json {
        emit_json(&summary)?;
    } else {
        print_restore_summary(&summary);
    }
    if let Some(message) = summary.aborted {
        bail!("restore aborted: {message}");
    }
    Ok(())
}

fn load_policies(args: &RestoreArgs) -> Result<RepairTable> {
    if args.no_default_policies {
        return Ok(RepairTable::empty());
    }
    args.policies
        .as_deref()
        .map_or_else(|| Ok(RepairTable::builtin()), RepairTable::from_json_file)
}

fn print_restore_summary(summary: &RestoreSummary) {
    for index in &summary.indexes {
        println!(
            "{} status={} uploaded={}/{} failed_batches={}",
            index.uid,
            index.status.as_str(),
            index.uploaded,
            index.documents,
            index.failed_batches
        );
    }
}

fn write_log(path: &Path, text: &str) -> Result<()> {
    fs::write(path, text).with_context(|| format!("failed to write log {}", path.display()))
}

#[derive(Debug, Clone, Serialize)]
struct ListReport {
    archive: String,
    source: String,
    layout: &'static str,
    created_at: Option<String>,
    source_url: Option<String>,
    indexes: Vec<ArchivedIndex>,
    #[serde(skip_serializing_if = "Option::is_none")]
    files: Option<Vec<ArchiveFileEntry>>,
}

fn handle_list(json: bool, args: &ListArgs) -> Result<()> {
    let archive = BackupArchive::open(&args.archive)?;
    let manifest = archive.manifest().unwrap_or_default();
    let report = ListReport {
        archive: args.archive.display().to_string(),
        source: archive.reader().source().as_str().to_string(),
        layout: match archive.layout() {
            ArchiveLayout::Tree { .. } => "tree",
            ArchiveLayout::Flat { .. } => "flat",
        },
        created_at: manifest.as_ref().map(|m| m.created_at.clone()),
        source_url: manifest.and_then(|m| m.source_url),
        indexes: archive.summarize()?,
        files: args.files.then(|| archive.files().to_vec()),
    };

    if json {
        return emit_json(&report);
    }

    println!("archive: {} ({}, {})", report.archive, report.source, report.layout);
    if let Some(created) = report.created_at.as_deref() {
        println!("created: {created}");
    }
    if let Some(url) = report.source_url.as_deref() {
        println!("source: {url}");
    }
    println!("indexes: {}", report.indexes.len());
    for index in &report.indexes {
        println!(
            "{} documents={} primary_key={} settings={}",
            index.uid,
            index.documents,
            index.primary_key.as_deref().unwrap_or("-"),
            if index.settings { "yes" } else { "no" }
        );
    }
    if let Some(files) = report.files {
        for entry in files {
            println!("{} {}", entry.bytes, entry.path);
        }
    }
    Ok(())
}

/// Shows each event on the progress spinner.
struct ConsoleEcho<'a> {
    progress: &'a ProgressReporter,
}

impl<'a> ConsoleEcho<'a> {
    fn new(progress: &'a ProgressReporter) -> Self {
        Self { progress }
    }
}

impl EventSink for ConsoleEcho<'_> {
    fn emit(&mut self, event: MigrationEvent) {
        if !self.progress.enabled() {
            return;
        }
        if event.is_fatal() {
            self.progress.println(&event.to_string());
        } else {
            self.progress.set_message(&event.to_string());
        }
    }
}

fn progress_enabled(json: bool, stderr_is_tty: bool) -> bool {
    !json && stderr_is_tty
}

struct ProgressReporter {
    bar: Option<ProgressBar>,
}

impl ProgressReporter {
    fn new(json: bool, message: &str) -> Self {
        let enabled = progress_enabled(json, io::stderr().is_terminal());
        if enabled {
            let bar = ProgressBar::new_spinner();
            let style = ProgressStyle::with_template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            bar.set_style(style);
            bar.enable_steady_tick(Duration::from_millis(120));
            bar.set_message(message.to_string());
            Self { bar: Some(bar) }
        } else {
            Self { bar: None }
        }
    }

    fn enabled(&self) -> bool {
        self.bar.is_some()
    }

    fn set_message(&self, message: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(message.to_string());
        }
    }

    fn println(&self, message: &str) {
        if let Some(bar) = &self.bar {
            bar.println(message);
        }
    }

    fn finish(&self, message: &str) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(message.to_string());
        }
    }
}

fn sanitize_path_component(input: &str) -> String {
    const SEP: char = '_';
    let mut out = String::with_capacity(input.len());
    let mut prev_sep = false;
    for ch in input.chars() {
        let mapped = if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            ch
        } else {
            SEP
        };
        if mapped == SEP {
            if !prev_sep {
                out.push(SEP);
            }
            prev_sep = true;
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches(SEP);
    if trimmed.is_empty() {
        BACKUP_ROOT.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    fn backup_args(args: &[&str]) -> BackupArgs {
        let mut full = vec!["meiliback", "backup"];
        full.extend_from_slice(args);
        match parse(&full).command {
            Commands::Backup(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    fn restore_args(args: &[&str]) -> RestoreArgs {
        let mut full = vec!["meiliback", "restore"];
        full.extend_from_slice(args);
        match parse(&full).command {
            Commands::Restore(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = parse(&[
            "meiliback",
            "restore",
            "backup.zip",
            "--url",
            "http://search:7700",
            "--json",
            "-vv",
            "--poll-interval-ms",
            "50",
        ]);
        assert_eq!(cli.url.as_deref(), Some("http://search:7700"));
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.poll_interval_ms, 50);
        assert_eq!(cli.color, ColorArg::Auto);
    }

    #[test]
    fn restore_defaults() {
        let args = restore_args(&["backup.zip"]);
        assert_eq!(args.archive, PathBuf::from("backup.zip"));
        assert_eq!(args.batch_size, 1000);
        assert_eq!(args.batch_pause_ms, 1000);
        assert!(!args.apply_empty_settings);
        assert_eq!(load_policies(&args).unwrap(), RepairTable::builtin());
    }

    #[test]
    fn policies_flags_conflict() {
        let err = Cli::try_parse_from([
            "meiliback",
            "restore",
            "backup.zip",
            "--policies",
            "p.json",
            "--no-default-policies",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn no_default_policies_gives_empty_table() {
        let args = restore_args(&["backup.zip", "--no-default-policies"]);
        assert_eq!(load_policies(&args).unwrap(), RepairTable::empty());
    }

    #[test]
    fn dest_conflicts_with_dir_and_prefix() {
        for extra in [["--dir", "out"], ["--prefix", "nightly"]] {
            let mut args = vec!["meiliback", "backup", "--dest", "out.zip"];
            args.extend_from_slice(&extra);
            assert!(Cli::try_parse_from(args).is_err());
        }
    }

    #[test]
    fn backup_target_in_dir_uses_prefix() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().to_str().unwrap();
        let target = resolve_backup_target(&backup_args(&["--dir", dir, "--prefix", "prod search"])).unwrap();
        let name = target.archive_path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("prod_search_"), "{name}");
        assert!(name.ends_with(".zip"));
        assert_eq!(target.parent_dir, temp.path());

        let target = resolve_backup_target(&backup_args(&["--dir", dir])).unwrap();
        let name = target.archive_path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("meilisearch_backup_"), "{name}");
    }

    #[test]
    fn backup_target_rejects_existing_dest() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("taken.zip");
        fs::write(&dest, b"").unwrap();
        let err = resolve_backup_target(&backup_args(&["--dest", dest.to_str().unwrap()])).unwrap_err();
        assert!(err.to_string().contains("already exists"), "{err:#}");
    }

    #[test]
    fn backup_target_rejects_missing_dir() {
        let temp = tempfile::tempdir().unwrap();
        let missing = temp.path().join("nope");
        assert!(resolve_backup_target(&backup_args(&["--dir", missing.to_str().unwrap()])).is_err());
    }

    #[test]
    fn progress_disabled_for_json_or_pipe() {
        assert!(!progress_enabled(true, true));
        assert!(!progress_enabled(false, false));
        assert!(progress_enabled(false, true));
    }

    #[test]
    fn sanitize_collapses_separators() {
        assert_eq!(sanitize_path_component("a b//c"), "a_b_c");
        assert_eq!(sanitize_path_component("  "), BACKUP_ROOT);
    }
}
