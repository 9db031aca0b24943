use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use caption_sync::caption::{CaptionChange, SyncOptions};
use caption_sync::translate::{CommandTranslator, NativePaths, PathTranslator};
use caption_sync::{config, pipeline};

#[derive(Parser, Debug)]
#[command(
    name = "caption-sync",
    version,
    about = "Rebuild JPEG captions (EXIF, IPTC, XMP) from their keywords"
)]
struct Cli {
    /// Image files or directories to process
    #[arg(value_name = "PATH", required_unless_present = "init")]
    paths: Vec<PathBuf>,

    /// Clear the caption instead of rebuilding it from the keywords
    #[arg(short, long)]
    clear: bool,

    /// Log what would change without writing to files
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Translate each input path with the configured translator (wslpath -u)
    #[arg(short, long = "windows-paths")]
    windows_paths: bool,

    /// Path to config file (default: caption-sync.json next to binary)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initialize a default caption-sync.json and exit
    #[arg(long)]
    init: bool,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    if cli.init {
        let config = config::Config::default();
        let path = cli.config.as_deref();
        config.save(path)?;
        let save_path = match path {
            Some(p) => p.to_path_buf(),
            None => config::Config::config_path()?,
        };
        println!("Default config written to {}", save_path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = config::Config::load(cli.config.as_deref())?;
    if cli.dry_run {
        config.output.dry_run = true;
    }

    let options = SyncOptions {
        clear_only: cli.clear,
        dry_run: config.output.dry_run,
        backup_originals: config.output.backup_originals,
    };

    if options.dry_run {
        log::info!("DRY RUN: no files will be modified");
    }

    let translator: Box<dyn PathTranslator> = if cli.windows_paths {
        log::debug!(
            "Translating paths with {} {}",
            config.path_translator.program,
            config.path_translator.args.join(" ")
        );
        Box::new(CommandTranslator::from_config(&config.path_translator))
    } else {
        Box::new(NativePaths)
    };

    let results = pipeline::run(&cli.paths, &options, translator.as_ref());

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else if options.dry_run {
        for result in &results {
            if let Some(ref change) = result.change {
                print_change_preview(&result.path, change);
            }
        }
    }

    let total = results.len();
    let failed = results.iter().filter(|r| !r.is_ok()).count();
    let changed = results.iter().filter(|r| r.change.is_some()).count();
    log::info!(
        "Done: {changed} changed, {} unchanged, {failed} failed out of {total} images",
        total - changed - failed
    );

    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

// ANSI color codes
const GREEN: &str = "\x1b[32m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

/// Indent for continuation lines (tag column width + " : ").
const INDENT: &str = "           ";

/// Print the old and new caption of a file for dry-run mode.
fn print_change_preview(path: &std::path::Path, change: &CaptionChange) {
    println!();
    println!("{BOLD}File:{RESET} {}", path.display());
    println!("  {DIM}{}{RESET}", "─".repeat(60));
    print_caption(DIM, "Current", &change.old);
    print_caption(GREEN, "New", &change.new);
}

/// Print a caption row, one keyword line per output line.
fn print_caption(color: &str, tag: &str, caption: &str) {
    let tag_col = format!("{:<8}", tag);
    if caption.is_empty() {
        println!("  {color}{tag_col} : (empty){RESET}");
        return;
    }
    for (i, line) in caption.lines().enumerate() {
        if i == 0 {
            println!("  {color}{tag_col} : {line}{RESET}");
        } else {
            println!("  {color}{INDENT}{line}{RESET}");
        }
    }
}
