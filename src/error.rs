use std::path::PathBuf;
use thiserror::Error;

/// Per-file failures. None of these abort a batch: the caller logs the error
/// and moves on to the next file.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The image file is missing or unreadable.
    #[error("Cannot open {}: {source}", path.display())]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Not a supported container, or a metadata block that cannot be parsed.
    #[error("Unsupported or malformed image {}: {reason}", path.display())]
    Format { path: PathBuf, reason: String },

    /// The external path translator failed for this input.
    #[error("Path translation failed for {}: {reason}", path.display())]
    PathTranslation { path: PathBuf, reason: String },

    /// Building the new metadata or writing the file failed.
    #[error("Failed to write metadata to {}: {reason}", path.display())]
    MetadataWrite { path: PathBuf, reason: String },
}

impl SyncError {
    /// Short machine-friendly name of the error kind, used in JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FileOpen { .. } => "file_open",
            Self::Format { .. } => "format",
            Self::PathTranslation { .. } => "path_translation",
            Self::MetadataWrite { .. } => "metadata_write",
        }
    }
}
