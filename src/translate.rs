//! Mapping input paths from a foreign OS convention to local paths.
//!
//! Catalog tools running on Windows hand over paths like `C:\Photos\a.jpg`;
//! with `-w` each input goes through an external utility (`wslpath -u` by
//! default) before it is opened.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::PathTranslatorConfig;
use crate::error::SyncError;

/// Turns a raw input path into a path that can be opened locally.
pub trait PathTranslator {
    fn translate(&self, raw: &Path) -> Result<PathBuf, SyncError>;
}

/// Paths are already local.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativePaths;

impl PathTranslator for NativePaths {
    fn translate(&self, raw: &Path) -> Result<PathBuf, SyncError> {
        Ok(raw.to_path_buf())
    }
}

/// Runs `program args... <path>` and uses its stdout as the local path.
#[derive(Debug, Clone)]
pub struct CommandTranslator {
    program: String,
    args: Vec<String>,
}

impl CommandTranslator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &PathTranslatorConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone())
    }
}

impl PathTranslator for CommandTranslator {
    fn translate(&self, raw: &Path) -> Result<PathBuf, SyncError> {
        let failure = |reason: String| SyncError::PathTranslation {
            path: raw.to_path_buf(),
            reason,
        };

        log::debug!("Translating {} with {} {:?}", raw.display(), self.program, self.args);
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(raw)
            .output()
            .map_err(|e| failure(format!("cannot run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failure(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let translated = stdout.trim_end_matches(['\r', '\n']);
        if translated.is_empty() {
            return Err(failure(format!("{} printed no path", self.program)));
        }

        log::debug!("{} -> {translated}", raw.display());
        Ok(PathBuf::from(translated))
    }
}
