use anyhow::{Context, Result, bail};
use little_exif::exif_tag::ExifTag;
use little_exif::filetype::FileExtension;
use little_exif::metadata::Metadata;
use nom_exif::{EntryValue, Exif, ExifIter, MediaParser, MediaSource};
use std::path::Path;

pub(super) const TAG_IMAGE_DESCRIPTION: u16 = 0x010E;

// little_exif as_u8_vec(JPEG) returns: [APP1 marker 2B][length 2B][Exif\0\0 6B][TIFF data]
// img-parts set_exif() expects just the TIFF data (after Exif\0\0)
const JPEG_EXIF_OVERHEAD: usize = 10; // 2 + 2 + 6

const TIFF_ASCII: u16 = 2;

/// Read `ImageDescription` from the EXIF block of an image file.
///
/// An image without an EXIF segment yields `None`; so does a description tag
/// that is not text. An EXIF segment that cannot be parsed is an error.
pub(super) fn read_image_description(path: &Path, has_exif: bool) -> Result<Option<String>> {
    if !has_exif {
        log::debug!("No EXIF data found in {}", path.display());
        return Ok(None);
    }

    let mut parser = MediaParser::new();
    let ms = MediaSource::file_path(path).context("Failed to open image file")?;
    let iter: ExifIter = parser.parse(ms).context("Malformed EXIF block")?;
    let exif: Exif = iter.into();

    Ok(match exif.get(nom_exif::ExifTag::ImageDescription) {
        Some(EntryValue::Text(s)) => Some(s.trim_end_matches('\0').to_string()),
        Some(other) => {
            log::debug!("ImageDescription is not text: {other}");
            None
        }
        None => None,
    })
}

/// Produce new TIFF data for the JPEG EXIF segment with `ImageDescription`
/// set to `description`.
///
/// Existing EXIF is patched in place so unknown tags and maker notes keep
/// their bytes; little_exif is used when the original cannot be walked and
/// when the image has no EXIF at all.
pub(super) fn with_image_description(
    path: &Path,
    original: Option<&[u8]>,
    description: &str,
) -> Result<Vec<u8>> {
    let Some(original) = original.filter(|o| !o.is_empty()) else {
        let mut metadata = Metadata::new();
        metadata.set_tag(ExifTag::ImageDescription(description.to_string()));
        return tiff_from_little_exif(&metadata);
    };

    match inject_ifd0_strings(original, &[(TAG_IMAGE_DESCRIPTION, description)]) {
        Ok(tiff) => Ok(tiff),
        Err(e) => {
            log::debug!("Raw TIFF injection failed ({e:#}), trying little_exif");
            let mut metadata = load_existing_metadata(path)
                .context("EXIF block can be neither patched nor parsed")?;
            metadata.set_tag(ExifTag::ImageDescription(description.to_string()));
            tiff_from_little_exif(&metadata)
        }
    }
}

fn tiff_from_little_exif(metadata: &Metadata) -> Result<Vec<u8>> {
    let exif_bytes = metadata.as_u8_vec(FileExtension::JPEG);
    if exif_bytes.len() <= JPEG_EXIF_OVERHEAD {
        bail!("little_exif produced an empty EXIF block");
    }
    Ok(exif_bytes[JPEG_EXIF_OVERHEAD..].to_vec())
}

/// Load existing EXIF metadata from a file path using little_exif.
/// Returns None if it can't parse.
fn load_existing_metadata(path: &Path) -> Option<Metadata> {
    let path_owned = path.to_path_buf();
    // Suppress panics from little_exif
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(|_| {}));
    let result = std::panic::catch_unwind(move || Metadata::new_from_path(&path_owned));
    std::panic::set_hook(prev_hook);

    match result {
        Ok(Ok(m)) => {
            log::debug!("little_exif loaded {} existing EXIF tags", m.data().len());
            Some(m)
        }
        Ok(Err(e)) => {
            log::debug!("little_exif could not parse EXIF: {e}");
            None
        }
        Err(_) => {
            log::debug!("little_exif panicked parsing EXIF");
            None
        }
    }
}

/// Byte order of a TIFF block.
#[derive(Clone, Copy)]
struct Endian {
    big: bool,
}

impl Endian {
    fn u16(self, data: &[u8], offset: usize) -> u16 {
        let b = [data[offset], data[offset + 1]];
        if self.big { u16::from_be_bytes(b) } else { u16::from_le_bytes(b) }
    }

    fn u32(self, data: &[u8], offset: usize) -> u32 {
        let b = [data[offset], data[offset + 1], data[offset + 2], data[offset + 3]];
        if self.big { u32::from_be_bytes(b) } else { u32::from_le_bytes(b) }
    }

    fn put_u16(self, val: u16) -> [u8; 2] {
        if self.big { val.to_be_bytes() } else { val.to_le_bytes() }
    }

    fn put_u32(self, val: u32) -> [u8; 4] {
        if self.big { val.to_be_bytes() } else { val.to_le_bytes() }
    }
}

/// Set ASCII string tags in IFD0 of raw TIFF data.
///
/// The original bytes are kept; a rebuilt IFD0 (with entries sorted by tag)
/// and the new string values are appended, and the header is pointed at the
/// new IFD0. Offsets used by the other IFDs stay valid. When the old IFD0 ends
/// the block (always true after an earlier call), it is dropped together with
/// the replaced values right before it, so rewrites do not grow the block.
fn inject_ifd0_strings(original: &[u8], strings: &[(u16, &str)]) -> Result<Vec<u8>> {
    if original.len() < 8 {
        bail!("TIFF data too short");
    }
    let endian = match &original[0..2] {
        b"MM" => Endian { big: true },
        b"II" => Endian { big: false },
        _ => bail!("Invalid TIFF byte order"),
    };

    let ifd0_offset = endian.u32(original, 4) as usize;
    if ifd0_offset + 2 > original.len() {
        bail!("IFD0 offset out of bounds");
    }
    let ifd0_count = endian.u16(original, ifd0_offset) as usize;
    let ifd0_start = ifd0_offset + 2;
    let ifd0_end = ifd0_start + ifd0_count * 12;
    if ifd0_end + 4 > original.len() {
        bail!("IFD0 entries extend beyond TIFF data");
    }
    let ifd0_next = endian.u32(original, ifd0_end);

    let (replaced, mut entries): (Vec<[u8; 12]>, Vec<[u8; 12]>) = (0..ifd0_count)
        .map(|i| {
            let mut e = [0u8; 12];
            e.copy_from_slice(&original[ifd0_start + i * 12..ifd0_start + (i + 1) * 12]);
            e
        })
        .partition(|e| {
            let tag = endian.u16(e, 0);
            strings.iter().any(|(t, _)| *t == tag)
        });

    let tail = reclaimable_tail(original.len(), endian, ifd0_offset, ifd0_next, &replaced, &entries);
    if tail < original.len() {
        log::debug!("Reclaiming {} bytes of the previous IFD0", original.len() - tail);
    }
    let mut result = original[..tail].to_vec();
    // word-align appended data
    if result.len() % 2 != 0 {
        result.push(0);
    }

    for (tag, value) in strings {
        let mut data = value.as_bytes().to_vec();
        data.push(0);

        let mut entry = [0u8; 12];
        entry[0..2].copy_from_slice(&endian.put_u16(*tag));
        entry[2..4].copy_from_slice(&endian.put_u16(TIFF_ASCII));
        entry[4..8].copy_from_slice(&endian.put_u32(data.len() as u32));
        if data.len() <= 4 {
            entry[8..8 + data.len()].copy_from_slice(&data);
        } else {
            entry[8..12].copy_from_slice(&endian.put_u32(result.len() as u32));
            result.extend_from_slice(&data);
            if result.len() % 2 != 0 {
                result.push(0);
            }
        }
        entries.push(entry);
    }

    entries.sort_by_key(|e| endian.u16(e, 0));

    let new_ifd0_start = result.len() as u32;
    result.extend_from_slice(&endian.put_u16(entries.len() as u16));
    for entry in &entries {
        result.extend_from_slice(entry);
    }
    result.extend_from_slice(&endian.put_u32(ifd0_next));

    // Update TIFF header to point to new IFD0
    result[4..8].copy_from_slice(&endian.put_u32(new_ifd0_start));

    Ok(result)
}

/// Start of the trailing bytes used only by the current IFD0: the IFD itself
/// when it ends the block, plus out-of-line values of `replaced` entries packed
/// right before it. Returns `len` when nothing can be dropped.
fn reclaimable_tail(
    len: usize,
    endian: Endian,
    ifd0_offset: usize,
    ifd0_next: u32,
    replaced: &[[u8; 12]],
    kept: &[[u8; 12]],
) -> usize {
    let ifd0_len = 2 + (replaced.len() + kept.len()) * 12 + 4;
    if ifd0_offset < 8 || len - (ifd0_offset + ifd0_len) > 1 {
        return len;
    }

    let mut tail = ifd0_offset;
    let mut values: Vec<(usize, usize)> = replaced
        .iter()
        .filter_map(|e| out_of_line_value(endian, e))
        .collect();
    // a value may be followed by one byte of word-alignment padding
    while let Some(i) = values
        .iter()
        .position(|&(at, n)| at >= 8 && at + n <= tail && tail - (at + n) <= 1)
    {
        tail = values.swap_remove(i).0;
    }

    let kept_overlaps = kept
        .iter()
        .filter_map(|e| out_of_line_value(endian, e))
        .any(|(at, n)| at + n > tail);
    if kept_overlaps || (ifd0_next != 0 && ifd0_next as usize >= tail) {
        return len;
    }
    tail
}

/// `(offset, size)` of an entry whose value does not fit in the entry itself.
fn out_of_line_value(endian: Endian, entry: &[u8; 12]) -> Option<(usize, usize)> {
    let unit = match endian.u16(entry, 2) {
        1 | 2 | 6 | 7 => 1,
        3 | 8 => 2,
        4 | 9 | 11 | 13 => 4,
        5 | 10 | 12 => 8,
        _ => return None,
    };
    let size = unit * endian.u32(entry, 4) as usize;
    (size > 4).then(|| (endian.u32(entry, 8) as usize, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal TIFF with one IFD0 entry (Orientation = 1).
    fn tiff(big: bool) -> Vec<u8> {
        let e = Endian { big };
        let mut t = Vec::new();
        t.extend_from_slice(if big { b"MM" } else { b"II" });
        t.extend_from_slice(&e.put_u16(42));
        t.extend_from_slice(&e.put_u32(8));
        t.extend_from_slice(&e.put_u16(1));
        t.extend_from_slice(&e.put_u16(0x0112));
        t.extend_from_slice(&e.put_u16(3));
        t.extend_from_slice(&e.put_u32(1));
        t.extend_from_slice(&e.put_u16(1));
        t.extend_from_slice(&[0, 0]);
        t.extend_from_slice(&e.put_u32(0));
        t
    }

    /// Walk IFD0 and return (tag, value bytes) for ASCII entries.
    fn ifd0_strings(data: &[u8]) -> Vec<(u16, String)> {
        let e = Endian { big: &data[0..2] == b"MM" };
        let start = e.u32(data, 4) as usize;
        let count = e.u16(data, start) as usize;
        (0..count)
            .filter_map(|i| {
                let off = start + 2 + i * 12;
                let tag = e.u16(data, off);
                if e.u16(data, off + 2) != TIFF_ASCII {
                    return None;
                }
                let len = e.u32(data, off + 4) as usize;
                let bytes = if len <= 4 {
                    &data[off + 8..off + 8 + len]
                } else {
                    let at = e.u32(data, off + 8) as usize;
                    &data[at..at + len]
                };
                let s = String::from_utf8(bytes.to_vec()).unwrap();
                Some((tag, s.trim_end_matches('\0').to_string()))
            })
            .collect()
    }

    fn ifd0_tags(data: &[u8]) -> Vec<u16> {
        let e = Endian { big: &data[0..2] == b"MM" };
        let start = e.u32(data, 4) as usize;
        let count = e.u16(data, start) as usize;
        (0..count).map(|i| e.u16(data, start + 2 + i * 12)).collect()
    }

    #[test]
    fn injects_description_little_endian() {
        let out = inject_ifd0_strings(&tiff(false), &[(TAG_IMAGE_DESCRIPTION, "sunset\nbeach")]).unwrap();
        assert_eq!(ifd0_tags(&out), vec![TAG_IMAGE_DESCRIPTION, 0x0112]);
        assert_eq!(
            ifd0_strings(&out),
            vec![(TAG_IMAGE_DESCRIPTION, "sunset\nbeach".to_string())]
        );
    }

    #[test]
    fn injects_description_big_endian() {
        let out = inject_ifd0_strings(&tiff(true), &[(TAG_IMAGE_DESCRIPTION, "caption")]).unwrap();
        assert_eq!(ifd0_strings(&out), vec![(TAG_IMAGE_DESCRIPTION, "caption".to_string())]);
    }

    #[test]
    fn short_values_are_inline() {
        let out = inject_ifd0_strings(&tiff(false), &[(TAG_IMAGE_DESCRIPTION, "")]).unwrap();
        assert_eq!(ifd0_strings(&out), vec![(TAG_IMAGE_DESCRIPTION, String::new())]);
    }

    #[test]
    fn replaces_existing_entry() {
        let once = inject_ifd0_strings(&tiff(false), &[(TAG_IMAGE_DESCRIPTION, "first value")]).unwrap();
        let twice = inject_ifd0_strings(&once, &[(TAG_IMAGE_DESCRIPTION, "second")]).unwrap();
        assert_eq!(ifd0_tags(&twice).len(), 2);
        assert_eq!(ifd0_strings(&twice), vec![(TAG_IMAGE_DESCRIPTION, "second".to_string())]);
    }

    #[test]
    fn original_bytes_are_untouched() {
        let mut original = tiff(false);
        // data after IFD0, as cameras write it
        original.extend_from_slice(b"MAKERNOTE\0");
        let out = inject_ifd0_strings(&original, &[(TAG_IMAGE_DESCRIPTION, "x")]).unwrap();
        assert_eq!(&out[8..original.len()], &original[8..]);
    }

    #[test]
    fn repeated_rewrites_keep_the_block_size() {
        let mut data = inject_ifd0_strings(&tiff(false), &[(TAG_IMAGE_DESCRIPTION, "first")]).unwrap();
        data = inject_ifd0_strings(&data, &[(TAG_IMAGE_DESCRIPTION, &format!("{:0>120}", 0))]).unwrap();
        let size = data.len();

        for i in 1..500 {
            let caption = format!("{i:0>120}");
            data = inject_ifd0_strings(&data, &[(TAG_IMAGE_DESCRIPTION, &caption)]).unwrap();
            assert_eq!(data.len(), size, "block grew on rewrite {i}");
        }

        assert_eq!(ifd0_tags(&data), vec![TAG_IMAGE_DESCRIPTION, 0x0112]);
        assert_eq!(
            ifd0_strings(&data),
            vec![(TAG_IMAGE_DESCRIPTION, format!("{:0>120}", 499))]
        );
    }

    #[test]
    fn odd_length_rewrites_stay_bounded() {
        let mut data = tiff(true);
        let mut sizes = Vec::new();
        for i in 0..50 {
            let caption = "y".repeat(20 + i % 3);
            data = inject_ifd0_strings(&data, &[(TAG_IMAGE_DESCRIPTION, &caption)]).unwrap();
            sizes.push(data.len());
        }
        let largest = sizes.iter().max().copied().unwrap();
        assert!(largest <= 8 + 24 + 2 + 2 * 12 + 4, "largest block {largest}");
        assert_eq!(ifd0_strings(&data), vec![(TAG_IMAGE_DESCRIPTION, "y".repeat(21))]);
    }

    #[test]
    fn kept_values_after_the_string_are_not_reclaimed() {
        // IFD0 at the end, with an Artist string that must survive.
        let e = Endian { big: false };
        let mut t = Vec::new();
        t.extend_from_slice(b"II");
        t.extend_from_slice(&e.put_u16(42));
        t.extend_from_slice(&e.put_u32(8 + 10));
        t.extend_from_slice(b"photograph");
        t.extend_from_slice(&e.put_u16(1));
        t.extend_from_slice(&e.put_u16(0x013B));
        t.extend_from_slice(&e.put_u16(TIFF_ASCII));
        t.extend_from_slice(&e.put_u32(10));
        t.extend_from_slice(&e.put_u32(8));
        t.extend_from_slice(&e.put_u32(0));

        let mut data = t;
        for caption in ["one caption", "another caption", "third caption"] {
            data = inject_ifd0_strings(&data, &[(TAG_IMAGE_DESCRIPTION, caption)]).unwrap();
        }
        assert_eq!(
            ifd0_strings(&data),
            vec![
                (TAG_IMAGE_DESCRIPTION, "third caption".to_string()),
                (0x013B, "photograph".to_string()),
            ]
        );
    }

    #[test]
    fn rejects_bad_tiff() {
        assert!(inject_ifd0_strings(b"XX\0\0", &[]).is_err());
        assert!(inject_ifd0_strings(b"II*\0\xff\0\0\0", &[]).is_err());
    }
}
