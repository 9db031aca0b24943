use std::collections::BTreeMap;

/// The XMP language tag for the default entry of a language alternative.
pub const X_DEFAULT: &str = "x-default";

/// Fields holding a single plain string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TextField {
    /// `Exif.Image.ImageDescription` (IFD0 tag 0x010E)
    ImageDescription,
}

/// Repeatable fields holding an ordered list of strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ListField {
    /// `Iptc.Application2.Caption` (IIM 2:120)
    IptcCaption,
    /// `Iptc.Application2.Keywords` (IIM 2:25)
    IptcKeywords,
    /// `Xmp.dc.subject` (`rdf:Bag`)
    XmpSubject,
}

/// Language-alternative fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LangAltField {
    /// `Xmp.dc.description` (`rdf:Alt`)
    XmpDescription,
}

impl TextField {
    pub fn key(self) -> &'static str {
        match self {
            Self::ImageDescription => "Exif.Image.ImageDescription",
        }
    }
}

impl ListField {
    pub fn key(self) -> &'static str {
        match self {
            Self::IptcCaption => "Iptc.Application2.Caption",
            Self::IptcKeywords => "Iptc.Application2.Keywords",
            Self::XmpSubject => "Xmp.dc.subject",
        }
    }
}

impl LangAltField {
    pub fn key(self) -> &'static str {
        match self {
            Self::XmpDescription => "Xmp.dc.description",
        }
    }
}

/// An XMP language alternative: ordered `(language, value)` entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LangAlt {
    entries: Vec<(String, String)>,
}

impl LangAlt {
    /// A language alternative with only an `x-default` entry.
    pub fn x_default(value: impl Into<String>) -> Self {
        Self {
            entries: vec![(X_DEFAULT.to_string(), value.into())],
        }
    }

    /// Append an entry; a later entry for the same language replaces the earlier one.
    pub fn insert(&mut self, lang: impl Into<String>, value: impl Into<String>) {
        let lang = lang.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(l, _)| l.eq_ignore_ascii_case(&lang)) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((lang, value)),
        }
    }

    pub fn get(&self, lang: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(l, _)| l.eq_ignore_ascii_case(lang))
            .map(|(_, v)| v.as_str())
    }

    /// The `x-default` entry if there is one, else the first entry.
    pub fn preferred(&self) -> Option<&str> {
        self.get(X_DEFAULT)
            .or_else(|| self.entries.first().map(|(_, v)| v.as_str()))
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// In-memory values of the known fields. A missing key means the field is
/// absent from the image, which is distinct from a present-but-empty value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFields {
    texts: BTreeMap<TextField, String>,
    lists: BTreeMap<ListField, Vec<String>>,
    lang_alts: BTreeMap<LangAltField, LangAlt>,
}

impl MetadataFields {
    pub fn text(&self, field: TextField) -> Option<&str> {
        self.texts.get(&field).map(String::as_str)
    }

    pub fn list(&self, field: ListField) -> Option<&[String]> {
        self.lists.get(&field).map(Vec::as_slice)
    }

    pub fn lang_alt(&self, field: LangAltField) -> Option<&LangAlt> {
        self.lang_alts.get(&field)
    }

    pub fn set_text(&mut self, field: TextField, value: impl Into<String>) {
        self.texts.insert(field, value.into());
    }

    pub fn set_list(&mut self, field: ListField, values: Vec<String>) {
        self.lists.insert(field, values);
    }

    pub fn set_lang_alt(&mut self, field: LangAltField, value: LangAlt) {
        self.lang_alts.insert(field, value);
    }
}
