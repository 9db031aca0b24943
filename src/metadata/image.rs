use anyhow::{Context, Result, anyhow, bail};
use img_parts::jpeg::{Jpeg, JpegSegment};
use img_parts::{Bytes, ImageEXIF};
use std::path::{Path, PathBuf};

use super::fields::{LangAlt, LangAltField, ListField, MetadataFields, TextField};
use super::{MetadataHandle, exif, iptc, xmp};
use crate::error::SyncError;

/// Extensions of images with native EXIF+IPTC+XMP support.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg"];

const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;
const EXIF_PREFIX: &[u8] = b"Exif\0\0";
/// A segment's length field is u16 and counts itself.
const MAX_SEGMENT_CONTENTS: usize = 0xFFFF - 2;

/// Check if a file has a supported image extension.
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dirty {
    Text(TextField),
    List(ListField),
    LangAlt(LangAltField),
}

/// Metadata handle for one JPEG file.
///
/// The file is read once on [`open`](ImageMetadata::open); the handle keeps
/// the bytes it read and writes a patched copy back on flush. Only the
/// segments holding a field that was set are rebuilt.
#[derive(Debug)]
pub struct ImageMetadata {
    path: PathBuf,
    bytes: Bytes,
    fields: MetadataFields,
    dirty: Vec<Dirty>,
    backup: bool,
}

impl ImageMetadata {
    /// Open `path` and read the caption and keyword fields.
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        let bytes = std::fs::read(path).map_err(|source| SyncError::FileOpen {
            path: path.to_path_buf(),
            source,
        })?;
        let bytes = Bytes::from(bytes);

        let jpeg = Jpeg::from_bytes(bytes.clone()).map_err(|e| SyncError::Format {
            path: path.to_path_buf(),
            reason: format!("not a JPEG image: {e}"),
        })?;

        let fields = read_fields(path, &jpeg).map_err(|e| SyncError::Format {
            path: path.to_path_buf(),
            reason: format!("{e:#}"),
        })?;
        log::debug!("{}: {fields:?}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            bytes,
            fields,
            dirty: Vec::new(),
            backup: false,
        })
    }

    /// Copy the original to `<name>.<ext>.bak` before the first write.
    pub fn with_backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fields(&self) -> &MetadataFields {
        &self.fields
    }

    fn is_dirty(&self, dirty: Dirty) -> bool {
        self.dirty.contains(&dirty)
    }

    fn mark(&mut self, dirty: Dirty) {
        if !self.dirty.contains(&dirty) {
            self.dirty.push(dirty);
        }
    }

    fn write(&mut self) -> Result<()> {
        let mut jpeg = Jpeg::from_bytes(self.bytes.clone())
            .map_err(|e| anyhow!("Failed to parse JPEG: {e}"))?;

        if self.is_dirty(Dirty::Text(TextField::ImageDescription)) {
            self.update_exif(&mut jpeg)?;
        }

        let iptc_fields: Vec<(ListField, iptc::DatasetTag)> = [
            (ListField::IptcCaption, iptc::CAPTION),
            (ListField::IptcKeywords, iptc::KEYWORDS),
        ]
        .into_iter()
        .filter(|(field, _)| self.is_dirty(Dirty::List(*field)))
        .collect();
        if !iptc_fields.is_empty() {
            self.update_iptc(&mut jpeg, &iptc_fields)?;
        }

        let description = self.is_dirty(Dirty::LangAlt(LangAltField::XmpDescription));
        let subject = self.is_dirty(Dirty::List(ListField::XmpSubject));
        if description || subject {
            self.update_xmp(&mut jpeg, description, subject)?;
        }

        if self.backup {
            backup_file(&self.path)?;
        }

        let output = jpeg.encoder().bytes();
        std::fs::write(&self.path, &output).context("Failed to write JPEG file")?;
        self.bytes = output;
        Ok(())
    }

    fn update_exif(&self, jpeg: &mut Jpeg) -> Result<()> {
        let description = self
            .fields
            .text(TextField::ImageDescription)
            .unwrap_or_default();

        // Remember where the EXIF segment was originally positioned
        let orig_exif_pos = find_exif_segment_pos(jpeg.segments());
        let original_exif = jpeg.exif();

        let tiff = exif::with_image_description(&self.path, original_exif.as_deref(), description)?;
        if tiff.len() + EXIF_PREFIX.len() > MAX_SEGMENT_CONTENTS {
            bail!("EXIF block of {} bytes does not fit in a JPEG segment", tiff.len());
        }

        jpeg.set_exif(Some(Bytes::from(tiff)));

        // set_exif() may insert after XMP APP1; move EXIF back so it comes
        // first (required for many EXIF parsers).
        let segments = jpeg.segments_mut();
        if let Some(new_pos) = find_exif_segment_pos(segments) {
            let target_pos = match orig_exif_pos {
                Some(pos) => pos,
                None => after_app0(segments),
            };
            if new_pos != target_pos && target_pos < new_pos {
                let seg = segments.remove(new_pos);
                segments.insert(target_pos, seg);
            }
        }
        Ok(())
    }

    fn update_xmp(&self, jpeg: &mut Jpeg, description: bool, subject: bool) -> Result<()> {
        let xmp_pos = find_xmp_segment_pos(jpeg.segments());
        let existing = match xmp_pos {
            Some(pos) => {
                let contents = jpeg.segments()[pos].contents();
                let packet = xmp::packet(contents).unwrap_or_default();
                Some(xmp::decode_packet(packet)?.to_string())
            }
            None => None,
        };

        let mut packet = existing;
        if description {
            let alt = self
                .fields
                .lang_alt(LangAltField::XmpDescription)
                .cloned()
                .unwrap_or_default();
            packet = Some(xmp::with_description(packet.as_deref(), &alt)?);
        }
        if subject {
            let subjects = self.fields.list(ListField::XmpSubject).unwrap_or_default();
            packet = Some(xmp::with_subject(packet.as_deref(), subjects)?);
        }
        let Some(packet) = packet else {
            return Ok(());
        };

        let mut contents = Vec::with_capacity(xmp::XMP_HEADER.len() + packet.len());
        contents.extend_from_slice(xmp::XMP_HEADER);
        contents.extend_from_slice(packet.as_bytes());
        if contents.len() > MAX_SEGMENT_CONTENTS {
            bail!("XMP packet of {} bytes does not fit in a JPEG segment", packet.len());
        }

        let new_segment = JpegSegment::new_with_contents(APP1, Bytes::from(contents));
        let segments = jpeg.segments_mut();
        match xmp_pos {
            Some(pos) => segments[pos] = new_segment,
            None => {
                // Insert after EXIF APP1 or after APP0
                let insert_pos = match find_exif_segment_pos(segments) {
                    Some(pos) => pos + 1,
                    None => after_app0(segments),
                };
                segments.insert(insert_pos, new_segment);
            }
        }
        Ok(())
    }

    fn update_iptc(&self, jpeg: &mut Jpeg, fields: &[(ListField, iptc::DatasetTag)]) -> Result<()> {
        let iptc_pos = find_iptc_segment_pos(jpeg.segments());
        let existing = iptc_pos.map(|pos| jpeg.segments()[pos].contents().to_vec());

        let mut datasets = match existing.as_deref() {
            Some(contents) => iptc::read_datasets(contents)?,
            None => Vec::new(),
        };
        for &(field, tag) in fields {
            let values = self.fields.list(field).unwrap_or_default();
            iptc::replace_repeated(&mut datasets, tag, values);
        }

        let contents = iptc::build_app13(existing.as_deref(), &datasets)?;
        if contents.len() > MAX_SEGMENT_CONTENTS {
            bail!("IPTC block of {} bytes does not fit in a JPEG segment", contents.len());
        }

        let new_segment = JpegSegment::new_with_contents(iptc::APP13, Bytes::from(contents));
        let segments = jpeg.segments_mut();
        match iptc_pos {
            Some(pos) => segments[pos] = new_segment,
            None => {
                let insert_pos = after_app_segments(segments);
                segments.insert(insert_pos, new_segment);
            }
        }
        Ok(())
    }
}

impl MetadataHandle for ImageMetadata {
    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    fn text(&self, field: TextField) -> Option<&str> {
        self.fields.text(field)
    }

    fn list(&self, field: ListField) -> Option<&[String]> {
        self.fields.list(field)
    }

    fn lang_alt(&self, field: LangAltField) -> Option<&LangAlt> {
        self.fields.lang_alt(field)
    }

    fn set_text(&mut self, field: TextField, value: String) {
        self.fields.set_text(field, value);
        self.mark(Dirty::Text(field));
    }

    fn set_list(&mut self, field: ListField, values: Vec<String>) {
        self.fields.set_list(field, values);
        self.mark(Dirty::List(field));
    }

    fn set_lang_alt(&mut self, field: LangAltField, value: LangAlt) {
        self.fields.set_lang_alt(field, value);
        self.mark(Dirty::LangAlt(field));
    }

    fn flush(&mut self) -> Result<(), SyncError> {
        if self.dirty.is_empty() {
            return Ok(());
        }
        self.write().map_err(|e| SyncError::MetadataWrite {
            path: self.path.clone(),
            reason: format!("{e:#}"),
        })?;
        self.dirty.clear();
        log::debug!("Wrote metadata to {}", self.path.display());
        Ok(())
    }
}

fn read_fields(path: &Path, jpeg: &Jpeg) -> Result<MetadataFields> {
    let mut fields = MetadataFields::default();

    if let Some(description) = exif::read_image_description(path, jpeg.exif().is_some())? {
        fields.set_text(TextField::ImageDescription, description);
    }

    if let Some(pos) = find_iptc_segment_pos(jpeg.segments()) {
        let datasets = iptc::read_datasets(jpeg.segments()[pos].contents())
            .context("Failed to parse IPTC metadata")?;
        if let Some(captions) = iptc::repeated(&datasets, iptc::CAPTION) {
            fields.set_list(ListField::IptcCaption, captions);
        }
        if let Some(keywords) = iptc::repeated(&datasets, iptc::KEYWORDS) {
            fields.set_list(ListField::IptcKeywords, keywords);
        }
    }

    if let Some(pos) = find_xmp_segment_pos(jpeg.segments()) {
        let contents = jpeg.segments()[pos].contents();
        let packet = xmp::decode_packet(xmp::packet(contents).unwrap_or_default())?;
        if let Some(description) =
            xmp::read_description(packet).context("Failed to parse XMP dc:description")?
        {
            fields.set_lang_alt(LangAltField::XmpDescription, description);
        }
        if let Some(subjects) = xmp::read_subject(packet).context("Failed to parse XMP dc:subject")? {
            fields.set_list(ListField::XmpSubject, subjects);
        }
    }

    Ok(fields)
}

/// Find the position of the EXIF APP1 segment in a JPEG.
/// EXIF segments have marker 0xE1 (APP1) and contents starting with "Exif\0\0".
fn find_exif_segment_pos(segments: &[JpegSegment]) -> Option<usize> {
    segments
        .iter()
        .position(|s| s.marker() == APP1 && s.contents().starts_with(EXIF_PREFIX))
}

/// Find the XMP APP1 segment position in a JPEG.
fn find_xmp_segment_pos(segments: &[JpegSegment]) -> Option<usize> {
    segments
        .iter()
        .position(|s| s.marker() == APP1 && s.contents().starts_with(xmp::XMP_HEADER))
}

fn find_iptc_segment_pos(segments: &[JpegSegment]) -> Option<usize> {
    segments
        .iter()
        .position(|s| s.marker() == iptc::APP13 && s.contents().starts_with(iptc::PHOTOSHOP_HEADER))
}

/// Index right after a leading APP0 (JFIF) segment.
fn after_app0(segments: &[JpegSegment]) -> usize {
    match segments.first() {
        Some(s) if s.marker() == APP0 => 1,
        _ => 0,
    }
}

/// Index right after the leading run of APPn segments.
fn after_app_segments(segments: &[JpegSegment]) -> usize {
    segments
        .iter()
        .position(|s| !(APP0..=0xEF).contains(&s.marker()))
        .unwrap_or(segments.len())
}

/// Create a backup of the original file.
fn backup_file(path: &Path) -> Result<PathBuf> {
    let backup_path = path.with_extension(format!(
        "{}.bak",
        path.extension().unwrap_or_default().to_string_lossy()
    ));

    if !backup_path.exists() {
        std::fs::copy(path, &backup_path).context("Failed to create backup")?;
        log::debug!("Backup created: {}", backup_path.display());
    }

    Ok(backup_path)
}
