use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "caption-sync.json";

/// Top-level configuration for caption-sync.
///
/// Controls how foreign paths are translated and output behavior
/// (dry run, backups). Every field has a default, so a partial file is fine.
///
/// # Loading
///
/// ```rust,no_run
/// use caption_sync::config::Config;
///
/// // From a JSON file
/// let config = Config::load(Some("caption-sync.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.path_translator.program = "cygpath".into();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// External utility used with `-w`.
    pub path_translator: PathTranslatorConfig,
    /// Output behavior (dry run, backups).
    pub output: OutputConfig,
}

/// Command that maps a foreign path to a local one. The path is appended as
/// the last argument and the translated path is read from stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathTranslatorConfig {
    pub program: String,
    pub args: Vec<String>,
}

/// Output and behavior configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// If `true`, log what would change without modifying any files.
    pub dry_run: bool,
    /// If `true`, create a `.bak` backup before modifying an image.
    pub backup_originals: bool,
}

impl Default for PathTranslatorConfig {
    fn default() -> Self {
        Self {
            program: "wslpath".to_string(),
            args: vec!["-u".to_string()],
        }
    }
}

impl Config {
    /// Resolve the config file path, next to the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join(CONFIG_FILE_NAME))
    }

    /// Load the configuration.
    ///
    /// `path` overrides the default `caption-sync.json` next to the
    /// executable. A missing file is not an error: every setting falls back
    /// to its default (`wslpath -u`, writes enabled, no backups). A file that
    /// exists but is not valid JSON is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve(path)?;
        if !config_path.exists() {
            log::debug!("No config at {}, using defaults", config_path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid config file {}", config_path.display()))?;
        log::debug!("Loaded config from {}", config_path.display());
        Ok(config)
    }

    /// Write the configuration as pretty JSON, used by `--init`.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = Self::resolve(path)?;
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }

    fn resolve(path: Option<&Path>) -> Result<PathBuf> {
        match path {
            Some(p) => Ok(p.to_path_buf()),
            None => Self::config_path(),
        }
    }
}
