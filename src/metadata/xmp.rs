//! XMP packet handling for `dc:description` and `dc:subject`.
//!
//! The packet is treated as text: properties are located with regular
//! expressions and replaced in place, so everything else in the packet
//! (other namespaces, padding, the xpacket wrapper) survives a rewrite.

use anyhow::{Context, Result, bail};
use regex::{Captures, Regex};
use std::sync::LazyLock;

use super::fields::{LangAlt, X_DEFAULT};

pub(super) const XMP_HEADER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
const DC_NAMESPACE: &str = "http://purl.org/dc/elements/1.1/";

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

regex!(DESCRIPTION_ELEMENT, r"(?s)<dc:description(?:\s[^>]*?)?(?:/>|>(.*?)</dc:description\s*>)");
regex!(SUBJECT_ELEMENT, r"(?s)<dc:subject(?:\s[^>]*?)?(?:/>|>(.*?)</dc:subject\s*>)");
regex!(LIST_ITEM, r"(?s)<rdf:li(\s[^>]*?)?(?:/>|>(.*?)</rdf:li\s*>)");
regex!(LANG_ATTRIBUTE, r#"xml:lang\s*=\s*["']([^"']*)["']"#);
regex!(RDF_DESCRIPTION_START, r"(?s)<rdf:Description\b[^>]*>");
regex!(ENTITY, r"&(#x[0-9A-Fa-f]+|#[0-9]+|amp|lt|gt|quot|apos);");

/// The XMP packet of an APP1 segment, if the segment is an XMP segment.
pub(super) fn packet(app1: &[u8]) -> Option<&[u8]> {
    app1.strip_prefix(XMP_HEADER)
}

pub(super) fn decode_packet(bytes: &[u8]) -> Result<&str> {
    let text = std::str::from_utf8(bytes).context("XMP packet is not valid UTF-8")?;
    Ok(text.trim_end_matches('\0'))
}

/// Read `dc:description`. `None` if the property is absent.
pub(super) fn read_description(xmp: &str) -> Result<Option<LangAlt>> {
    let Some(body) = element_body(xmp, &DESCRIPTION_ELEMENT, "dc:description")? else {
        return Ok(None);
    };

    let mut alt = LangAlt::default();
    for item in LIST_ITEM.captures_iter(body) {
        let lang = item
            .get(1)
            .and_then(|attrs| LANG_ATTRIBUTE.captures(attrs.as_str()))
            .map(|c| c[1].to_string())
            .unwrap_or_else(|| X_DEFAULT.to_string());
        let value = item.get(2).map(|v| unescape(v.as_str())).unwrap_or_default();
        alt.insert(lang, value);
    }
    Ok(Some(alt))
}

/// Read `dc:subject`. `None` if the property is absent; an empty bag is `Some(vec![])`.
pub(super) fn read_subject(xmp: &str) -> Result<Option<Vec<String>>> {
    let Some(body) = element_body(xmp, &SUBJECT_ELEMENT, "dc:subject")? else {
        return Ok(None);
    };

    let subjects = LIST_ITEM
        .captures_iter(body)
        .map(|item| item.get(2).map(|v| unescape(v.as_str())).unwrap_or_default())
        .collect();
    Ok(Some(subjects))
}

/// Body of a property element: `Some("")` for a self-closing element.
fn element_body<'a>(xmp: &'a str, pattern: &Regex, name: &str) -> Result<Option<&'a str>> {
    match pattern.captures(xmp) {
        Some(caps) => Ok(Some(caps.get(1).map(|m| m.as_str()).unwrap_or(""))),
        None => {
            if xmp.contains(&format!("<{name}>")) || xmp.contains(&format!("<{name} ")) {
                bail!("unterminated {name} element in XMP packet");
            }
            Ok(None)
        }
    }
}

/// Return a packet with `dc:description` set to `alt`, starting from the
/// existing packet when there is one.
pub(super) fn with_description(existing: Option<&str>, alt: &LangAlt) -> Result<String> {
    with_property(existing, &DESCRIPTION_ELEMENT, &description_element(alt))
}

/// Return a packet with `dc:subject` set to `subjects`.
pub(super) fn with_subject(existing: Option<&str>, subjects: &[String]) -> Result<String> {
    with_property(existing, &SUBJECT_ELEMENT, &subject_element(subjects))
}

fn with_property(existing: Option<&str>, pattern: &Regex, element: &str) -> Result<String> {
    let Some(xmp) = existing else {
        return Ok(fresh_packet(element));
    };

    if let Some(found) = pattern.find(xmp) {
        let mut result = String::with_capacity(xmp.len() + element.len());
        result.push_str(&xmp[..found.start()]);
        result.push_str(element);
        result.push_str(&xmp[found.end()..]);
        return Ok(result);
    }

    insert_dc_property(xmp, element)
}

/// Insert a new dc property into the rdf:Description that declares the dc
/// namespace, or into the first one (declaring the namespace on it).
fn insert_dc_property(xmp: &str, element: &str) -> Result<String> {
    let mut result = xmp.to_string();

    let start = RDF_DESCRIPTION_START
        .find_iter(&result)
        .find(|m| m.as_str().contains("xmlns:dc="))
        .or_else(|| RDF_DESCRIPTION_START.find(&result))
        .map(|m| m.range());

    let Some(start) = start else {
        let rdf_end = result
            .find("</rdf:RDF>")
            .context("XMP packet has no rdf:RDF element")?;
        result.insert_str(
            rdf_end,
            &format!(
                "<rdf:Description rdf:about=\"\"\n  xmlns:dc=\"{DC_NAMESPACE}\">\n  {element}\n</rdf:Description>\n"
            ),
        );
        return Ok(result);
    };

    let mut tag = result[start.clone()].to_string();
    if !tag.contains("xmlns:dc=") {
        tag.insert_str(
            "<rdf:Description".len(),
            &format!(" xmlns:dc=\"{DC_NAMESPACE}\""),
        );
    }

    if tag.ends_with("/>") {
        let open = format!("{}>", tag[..tag.len() - 2].trim_end());
        result.replace_range(start, &format!("{open}\n  {element}\n</rdf:Description>"));
    } else {
        let close = result[start.end..]
            .find("</rdf:Description>")
            .map(|p| start.end + p)
            .context("unterminated rdf:Description in XMP packet")?;
        result.insert_str(close, &format!("  {element}\n"));
        result.replace_range(start, &tag);
    }

    Ok(result)
}

fn description_element(alt: &LangAlt) -> String {
    let mut element = String::from("<dc:description><rdf:Alt>");
    for (lang, value) in alt.entries() {
        element.push_str(&format!(
            "<rdf:li xml:lang=\"{}\">{}</rdf:li>",
            xml_escape(lang),
            xml_escape(value)
        ));
    }
    element.push_str("</rdf:Alt></dc:description>");
    element
}

fn subject_element(subjects: &[String]) -> String {
    let mut element = String::from("<dc:subject><rdf:Bag>");
    for subject in subjects {
        element.push_str(&format!("<rdf:li>{}</rdf:li>", xml_escape(subject)));
    }
    element.push_str("</rdf:Bag></dc:subject>");
    element
}

fn fresh_packet(element: &str) -> String {
    let mut xmp = String::new();
    xmp.push_str("<?xpacket begin=\"\u{feff}\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\n");
    xmp.push_str("<x:xmpmeta xmlns:x=\"adobe:ns:meta/\">\n");
    xmp.push_str("<rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\">\n");
    xmp.push_str("<rdf:Description rdf:about=\"\"\n");
    xmp.push_str(&format!("  xmlns:dc=\"{DC_NAMESPACE}\">\n"));
    xmp.push_str(&format!("  {element}\n"));
    xmp.push_str("</rdf:Description>\n");
    xmp.push_str("</rdf:RDF>\n");
    xmp.push_str("</x:xmpmeta>\n");
    xmp.push_str("<?xpacket end=\"w\"?>");
    xmp
}

/// Escape special XML characters.
fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn unescape(s: &str) -> String {
    ENTITY
        .replace_all(s, |caps: &Captures| {
            let entity = &caps[1];
            let decoded = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => {
                    let code = match entity.strip_prefix("#x") {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => entity[1..].parse().ok(),
                    };
                    code.and_then(char::from_u32)
                }
            };
            decoded
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
