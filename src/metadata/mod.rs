//! Typed access to the caption and keyword fields of an image.
//!
//! Fields are addressed by shape-specific identifiers ([`TextField`],
//! [`ListField`], [`LangAltField`]) instead of string keys, so a field can only
//! be read or written with its own value shape.
//!
//! [`ImageMetadata`] is the file-backed handle for JPEG images: EXIF, IPTC-IIM
//! (APP13) and XMP (APP1) are read on open and rewritten on [`MetadataHandle::flush`].

mod exif;
mod fields;
mod image;
mod iptc;
mod xmp;

pub use fields::{LangAlt, LangAltField, ListField, MetadataFields, TextField, X_DEFAULT};
pub use image::{ImageMetadata, is_supported_image};

use crate::error::SyncError;

/// An open metadata handle for one image.
///
/// Setters only change the in-memory view; nothing reaches storage until
/// [`flush`](MetadataHandle::flush). Dropping the handle closes it.
pub trait MetadataHandle {
    /// Name used in log messages (usually the file name).
    fn name(&self) -> String;

    fn text(&self, field: TextField) -> Option<&str>;
    fn list(&self, field: ListField) -> Option<&[String]>;
    fn lang_alt(&self, field: LangAltField) -> Option<&LangAlt>;

    fn set_text(&mut self, field: TextField, value: String);
    fn set_list(&mut self, field: ListField, values: Vec<String>);
    fn set_lang_alt(&mut self, field: LangAltField, value: LangAlt);

    /// Persist every field set since the handle was opened.
    fn flush(&mut self) -> Result<(), SyncError>;
}
