//! IPTC-IIM metadata inside the JPEG APP13 (Photoshop 3.0) segment.
//!
//! Layout: `Photoshop 3.0\0` followed by image resource blocks
//! (`8BIM`, id, pascal name padded to even, u32 size, data padded to even).
//! Resource 0x0404 carries the IIM datasets: `0x1C record number size data`.

use anyhow::{Result, bail};

pub(super) const APP13: u8 = 0xED;
pub(super) const PHOTOSHOP_HEADER: &[u8] = b"Photoshop 3.0\0";

const RESOURCE_SIGNATURES: &[&[u8]] = &[b"8BIM", b"8B64", b"PHUT", b"AgHg", b"DCSR", b"MeSa"];
const IPTC_SIGNATURE: &[u8] = b"8BIM";
const IPTC_RESOURCE_ID: u16 = 0x0404;
const TAG_MARKER: u8 = 0x1C;
/// Largest size expressible in a standard (non-extended) dataset header.
const MAX_STANDARD_SIZE: usize = 0x7FFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) struct DatasetTag {
    pub record: u8,
    pub number: u8,
}

pub(super) const RECORD_VERSION: DatasetTag = DatasetTag { record: 2, number: 0 };
pub(super) const KEYWORDS: DatasetTag = DatasetTag { record: 2, number: 25 };
pub(super) const CAPTION: DatasetTag = DatasetTag { record: 2, number: 120 };

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Dataset {
    pub tag: DatasetTag,
    pub data: Vec<u8>,
}

struct Resource<'a> {
    id: u16,
    signature: &'a [u8],
    /// The whole block including header and padding.
    raw: &'a [u8],
    data: &'a [u8],
}

fn resources(contents: &[u8]) -> Result<Vec<Resource<'_>>> {
    let Some(body) = contents.strip_prefix(PHOTOSHOP_HEADER) else {
        bail!("APP13 segment lacks the Photoshop 3.0 header");
    };

    let mut out = Vec::new();
    let mut pos = 0;
    while pos < body.len() {
        let rest = &body[pos..];
        if rest.iter().all(|&b| b == 0) {
            // trailing padding written by some tools
            break;
        }
        if rest.len() < 12 || !RESOURCE_SIGNATURES.contains(&&rest[..4]) {
            bail!("invalid image resource block at offset {pos}");
        }

        let id = u16::from_be_bytes([rest[4], rest[5]]);
        let name_len = rest[6] as usize;
        let name_padded = if (name_len + 1) % 2 == 0 { name_len + 1 } else { name_len + 2 };
        let size_at = 6 + name_padded;
        if size_at + 4 > rest.len() {
            bail!("truncated image resource {id:#06x}");
        }
        let size = u32::from_be_bytes([
            rest[size_at],
            rest[size_at + 1],
            rest[size_at + 2],
            rest[size_at + 3],
        ]) as usize;
        let data_start = size_at + 4;
        let data_end = data_start + size;
        if data_end > rest.len() {
            bail!("image resource {id:#06x} extends past the segment");
        }
        let block_end = (data_end + size % 2).min(rest.len());

        out.push(Resource {
            id,
            signature: &rest[..4],
            raw: &rest[..block_end],
            data: &rest[data_start..data_end],
        });
        pos += block_end;
    }

    Ok(out)
}

fn is_iptc(resource: &Resource<'_>) -> bool {
    resource.id == IPTC_RESOURCE_ID && resource.signature == IPTC_SIGNATURE
}

/// Parse the IIM datasets of an APP13 segment. A segment without an IPTC
/// resource yields no datasets.
pub(super) fn read_datasets(app13: &[u8]) -> Result<Vec<Dataset>> {
    match resources(app13)?.iter().find(|r| is_iptc(r)) {
        Some(resource) => parse_datasets(resource.data),
        None => Ok(Vec::new()),
    }
}

pub(super) fn parse_datasets(iim: &[u8]) -> Result<Vec<Dataset>> {
    let mut datasets = Vec::new();
    let mut pos = 0;

    while pos < iim.len() {
        if iim[pos] != TAG_MARKER {
            if iim[pos..].iter().all(|&b| b == 0) {
                break;
            }
            bail!("invalid IIM tag marker {:#04x} at offset {pos}", iim[pos]);
        }
        if pos + 5 > iim.len() {
            bail!("truncated IIM dataset header at offset {pos}");
        }

        let tag = DatasetTag {
            record: iim[pos + 1],
            number: iim[pos + 2],
        };
        let size_field = u16::from_be_bytes([iim[pos + 3], iim[pos + 4]]);
        let (size, header_len) = if size_field & 0x8000 != 0 {
            // Extended dataset: the low 15 bits give the length of the size field.
            let n = (size_field & 0x7FFF) as usize;
            if n == 0 || n > 4 || pos + 5 + n > iim.len() {
                bail!("invalid extended IIM size at offset {pos}");
            }
            let size = iim[pos + 5..pos + 5 + n]
                .iter()
                .fold(0usize, |acc, &b| (acc << 8) | b as usize);
            (size, 5 + n)
        } else {
            (size_field as usize, 5)
        };

        let start = pos + header_len;
        let end = start + size;
        if end > iim.len() {
            bail!(
                "IIM dataset {}:{} extends past the resource",
                tag.record,
                tag.number
            );
        }
        datasets.push(Dataset {
            tag,
            data: iim[start..end].to_vec(),
        });
        pos = end;
    }

    Ok(datasets)
}

pub(super) fn encode_datasets(datasets: &[Dataset]) -> Vec<u8> {
    let mut out = Vec::new();
    for dataset in datasets {
        out.extend_from_slice(&[TAG_MARKER, dataset.tag.record, dataset.tag.number]);
        if dataset.data.len() <= MAX_STANDARD_SIZE {
            out.extend_from_slice(&(dataset.data.len() as u16).to_be_bytes());
        } else {
            out.extend_from_slice(&0x8004u16.to_be_bytes());
            out.extend_from_slice(&(dataset.data.len() as u32).to_be_bytes());
        }
        out.extend_from_slice(&dataset.data);
    }
    out
}

/// Values of a repeatable dataset, or `None` if the dataset does not occur.
pub(super) fn repeated(datasets: &[Dataset], tag: DatasetTag) -> Option<Vec<String>> {
    let values: Vec<String> = datasets
        .iter()
        .filter(|d| d.tag == tag)
        .map(|d| decode_text(&d.data))
        .collect();
    if values.is_empty() { None } else { Some(values) }
}

/// Replace every occurrence of `tag` with one dataset per value, keeping all
/// other datasets in place.
pub(super) fn replace_repeated(datasets: &mut Vec<Dataset>, tag: DatasetTag, values: &[String]) {
    let first = datasets.iter().position(|d| d.tag == tag);
    datasets.retain(|d| d.tag != tag);

    let mut at = first.unwrap_or_else(|| {
        datasets
            .iter()
            .position(|d| d.tag > tag)
            .unwrap_or(datasets.len())
    });

    if tag.record == RECORD_VERSION.record && !datasets.iter().any(|d| d.tag == RECORD_VERSION) {
        let version_at = datasets
            .iter()
            .position(|d| d.tag.record >= RECORD_VERSION.record)
            .unwrap_or(datasets.len());
        datasets.insert(
            version_at,
            Dataset {
                tag: RECORD_VERSION,
                data: vec![0x00, 0x04],
            },
        );
        if version_at <= at {
            at += 1;
        }
    }

    for (i, value) in values.iter().enumerate() {
        datasets.insert(
            at + i,
            Dataset {
                tag,
                data: value.as_bytes().to_vec(),
            },
        );
    }
}

/// Build new APP13 contents holding `datasets` as the IPTC resource. Every
/// other image resource of `existing` is kept in its original order.
pub(super) fn build_app13(existing: Option<&[u8]>, datasets: &[Dataset]) -> Result<Vec<u8>> {
    let iim = encode_datasets(datasets);

    let mut block = Vec::with_capacity(iim.len() + 13);
    block.extend_from_slice(IPTC_SIGNATURE);
    block.extend_from_slice(&IPTC_RESOURCE_ID.to_be_bytes());
    block.push(0x00); // empty pascal name
    block.push(0x00); // padding to even
    block.extend_from_slice(&(iim.len() as u32).to_be_bytes());
    block.extend_from_slice(&iim);
    if iim.len() % 2 != 0 {
        block.push(0x00);
    }

    let mut out = Vec::new();
    out.extend_from_slice(PHOTOSHOP_HEADER);

    let mut placed = false;
    if let Some(contents) = existing {
        for resource in resources(contents)? {
            if is_iptc(&resource) {
                if !placed {
                    out.extend_from_slice(&block);
                    placed = true;
                }
            } else {
                out.extend_from_slice(resource.raw);
            }
        }
    }
    if !placed {
        out.extend_from_slice(&block);
    }

    Ok(out)
}

/// IIM text is usually UTF-8; older files use Latin-1.
fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}
