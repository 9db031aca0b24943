//! # caption-sync
//!
//! Keeps the caption of JPEG images in sync with their keywords. The caption
//! is rebuilt from the IPTC keywords (one per line) and written to every
//! caption field an image can carry: EXIF `ImageDescription`, IPTC
//! `Caption-Abstract` and XMP `dc:description`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use caption_sync::caption::SyncOptions;
//! use caption_sync::pipeline::run;
//! use caption_sync::translate::NativePaths;
//! use std::path::PathBuf;
//!
//! let results = run(&[PathBuf::from("./photos")], &SyncOptions::default(), &NativePaths);
//!
//! for result in &results {
//!     match (&result.error, &result.change) {
//!         (Some(err), _) => eprintln!("{err}"),
//!         (None, Some(change)) => println!("{}: {:?}", result.path.display(), change.new),
//!         (None, None) => {}
//!     }
//! }
//! ```
//!
//! ## Lower-Level Usage
//!
//! The field layer can be used on its own:
//!
//! ```rust,no_run
//! use caption_sync::caption;
//! use caption_sync::metadata::{ImageMetadata, ListField, MetadataHandle};
//!
//! fn main() -> Result<(), caption_sync::error::SyncError> {
//!     let mut image = ImageMetadata::open("photo.jpg".as_ref())?;
//!     image.set_list(ListField::IptcKeywords, vec!["beach".into(), "sunset".into()]);
//!     image.flush()?;
//!
//!     println!("caption: {:?}", caption::current_caption(&image));
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`caption`]: caption derivation and reconciliation
//! - [`config`]: configuration types and loading/saving
//! - [`error`]: per-file error type
//! - [`metadata`]: typed access to EXIF/IPTC/XMP fields of a JPEG
//! - [`pipeline`]: input expansion and batch processing
//! - [`translate`]: foreign-path translation

pub mod caption;
pub mod config;
pub mod error;
pub mod metadata;
pub mod pipeline;
pub mod translate;

pub use error::SyncError;
