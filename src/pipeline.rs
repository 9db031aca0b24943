use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::caption::{self, CaptionChange, Outcome, SyncOptions};
use crate::error::SyncError;
use crate::metadata::is_supported_image;
use crate::translate::PathTranslator;

/// The result of processing a single file.
///
/// Exactly one of `change` / `error` is meaningful: a failed file has an
/// error and no change; a successful one has `change: None` when its caption
/// was already in sync.
#[derive(Debug, Serialize)]
pub struct ProcessResult {
    pub path: PathBuf,
    pub change: Option<CaptionChange>,
    pub error: Option<String>,
    pub error_kind: Option<&'static str>,
}

impl ProcessResult {
    fn done(path: &Path, outcome: Outcome) -> Self {
        Self {
            path: path.to_path_buf(),
            change: outcome.change().cloned(),
            error: None,
            error_kind: None,
        }
    }

    fn failed(path: &Path, err: &SyncError) -> Self {
        Self {
            path: path.to_path_buf(),
            change: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Expand one input path into the files to process.
///
/// Directories are walked recursively (following symlinks, sorted by name)
/// for supported images. Anything else is returned as-is, so a missing or
/// unsupported file is reported when it is opened.
///
/// # Example
///
/// ```rust,no_run
/// use caption_sync::pipeline::expand_input;
/// use std::path::Path;
///
/// let images = expand_input(Path::new("./photos/"));
/// println!("Found {} images", images.len());
/// ```
pub fn expand_input(path: &Path) -> Vec<PathBuf> {
    if !path.is_dir() {
        return vec![path.to_path_buf()];
    }

    let images: Vec<PathBuf> = WalkDir::new(path)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && is_supported_image(p))
        .collect();

    if images.is_empty() {
        log::warn!("No supported images found in {}", path.display());
    }
    images
}

/// Reconcile a single file. Never fails: errors end up in the result.
pub fn process_file(path: &Path, options: &SyncOptions) -> ProcessResult {
    match caption::reconcile(path, options) {
        Ok(outcome) => ProcessResult::done(path, outcome),
        Err(e) => ProcessResult::failed(path, &e),
    }
}

/// Process every input in order, one file at a time.
///
/// A failure (translation, open, write) is logged and recorded for that file
/// only; the remaining inputs are still processed.
///
/// # Example
///
/// ```rust,no_run
/// use caption_sync::caption::SyncOptions;
/// use caption_sync::pipeline::run;
/// use caption_sync::translate::NativePaths;
/// use std::path::PathBuf;
///
/// let options = SyncOptions { dry_run: true, ..Default::default() };
/// let results = run(&[PathBuf::from("photo.jpg")], &options, &NativePaths);
/// let failed = results.iter().filter(|r| !r.is_ok()).count();
/// println!("{failed} failed");
/// ```
pub fn run(
    inputs: &[PathBuf],
    options: &SyncOptions,
    translator: &dyn PathTranslator,
) -> Vec<ProcessResult> {
    let mut results = Vec::new();

    for raw in inputs {
        let local = match translator.translate(raw) {
            Ok(path) => path,
            Err(e) => {
                log::error!("{e}");
                results.push(ProcessResult::failed(raw, &e));
                continue;
            }
        };

        for path in expand_input(&local) {
            log::debug!("Processing: {}", path.display());
            let result = process_file(&path, options);
            if let Some(ref err) = result.error {
                log::error!("{err}");
            }
            results.push(result);
        }
    }

    results
}
