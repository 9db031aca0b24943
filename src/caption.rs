//! Caption reconciliation: derive the caption from the keywords and write it
//! to every caption field when it differs from the current one.

use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::sync::LazyLock;

use crate::error::SyncError;
use crate::metadata::{ImageMetadata, LangAlt, LangAltField, ListField, MetadataHandle, TextField};

/// Separator between keywords in the derived caption.
pub const KEYWORD_SEPARATOR: &str = "\n";

/// Inline language prefix some tools leave in front of a localized value,
/// e.g. `lang="x-default" Hello`.
static LANG_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"^lang=".*?" "#).unwrap());

/// How a reconciliation should behave.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Ignore the keywords and make the caption empty.
    pub clear_only: bool,
    /// Compute and log the change, never write it.
    pub dry_run: bool,
    /// Keep a `.bak` copy of the file before writing.
    pub backup_originals: bool,
}

/// A caption transition for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptionChange {
    pub old: String,
    pub new: String,
    /// `false` in dry-run mode.
    pub written: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The caption already matches the keywords.
    Unchanged,
    Changed(CaptionChange),
}

impl Outcome {
    pub fn change(&self) -> Option<&CaptionChange> {
        match self {
            Self::Unchanged => None,
            Self::Changed(change) => Some(change),
        }
    }
}

/// The keyword list: IPTC keywords if that field is present at all (even
/// empty), else XMP `dc:subject`, else nothing.
pub fn keywords<H: MetadataHandle + ?Sized>(handle: &H) -> Vec<String> {
    handle
        .list(ListField::IptcKeywords)
        .or_else(|| handle.list(ListField::XmpSubject))
        .map(<[String]>::to_vec)
        .unwrap_or_default()
}

/// The current caption: the first non-empty value of EXIF ImageDescription,
/// the first IPTC caption, or the XMP description; `""` when none is set.
pub fn current_caption<H: MetadataHandle + ?Sized>(handle: &H) -> String {
    if let Some(description) = handle.text(TextField::ImageDescription).filter(|s| !s.is_empty()) {
        return description.to_string();
    }

    if let Some(caption) = handle
        .list(ListField::IptcCaption)
        .and_then(|values| values.first())
        .filter(|s| !s.is_empty())
    {
        return caption.clone();
    }

    if let Some(localized) = handle
        .lang_alt(LangAltField::XmpDescription)
        .and_then(LangAlt::preferred)
    {
        let stripped = LANG_PREFIX.replace(localized, "");
        if !stripped.is_empty() {
            return stripped.into_owned();
        }
    }

    String::new()
}

/// The caption the keywords call for.
pub fn target_caption(keywords: &[String]) -> String {
    keywords.join(KEYWORD_SEPARATOR)
}

/// Write `caption` to all three caption fields (in memory).
pub fn set_caption<H: MetadataHandle + ?Sized>(handle: &mut H, caption: &str) {
    handle.set_text(TextField::ImageDescription, caption.to_string());
    handle.set_list(ListField::IptcCaption, vec![caption.to_string()]);
    handle.set_lang_alt(LangAltField::XmpDescription, LangAlt::x_default(caption));
}

/// Reconcile an already opened handle.
pub fn reconcile_handle<H: MetadataHandle + ?Sized>(
    handle: &mut H,
    options: &SyncOptions,
) -> Result<Outcome, SyncError> {
    let target = if options.clear_only {
        String::new()
    } else {
        target_caption(&keywords(handle))
    };
    let current = current_caption(handle);

    if target == current {
        log::debug!("{}: caption up to date", handle.name());
        return Ok(Outcome::Unchanged);
    }

    // Logged in dry-run mode too: it is the only output of a dry run.
    log::warn!("{}: {current:?} -> {target:?}", handle.name());

    if !options.dry_run {
        set_caption(handle, &target);
        handle.flush()?;
    }

    Ok(Outcome::Changed(CaptionChange {
        old: current,
        new: target,
        written: !options.dry_run,
    }))
}

/// Open `path`, reconcile it, and close it again.
///
/// The handle is dropped on every return path, including a failed flush.
pub fn reconcile(path: &Path, options: &SyncOptions) -> Result<Outcome, SyncError> {
    let mut handle = ImageMetadata::open(path)?.with_backup(options.backup_originals);
    reconcile_handle(&mut handle, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataFields;

    /// In-memory handle that counts flushes and can be told to fail them.
    #[derive(Default)]
    struct MemoryHandle {
        fields: MetadataFields,
        stored: MetadataFields,
        flushes: usize,
        fail_flush: bool,
    }

    impl MemoryHandle {
        fn with(build: impl FnOnce(&mut MetadataFields)) -> Self {
            let mut fields = MetadataFields::default();
            build(&mut fields);
            Self {
                stored: fields.clone(),
                fields,
                ..Default::default()
            }
        }
    }

    impl MetadataHandle for MemoryHandle {
        fn name(&self) -> String {
            "memory.jpg".to_string()
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
        }
        fn set_list(&mut self, field: ListField, values: Vec<String>) {
            self.fields.set_list(field, values);
        }
        fn set_lang_alt(&mut self, field: LangAltField, value: LangAlt) {
            self.fields.set_lang_alt(field, value);
        }
        fn flush(&mut self) -> Result<(), SyncError> {
            if self.fail_flush {
                return Err(SyncError::MetadataWrite {
                    path: "memory.jpg".into(),
                    reason: "disk full".into(),
                });
            }
            self.flushes += 1;
            self.stored = self.fields.clone();
            Ok(())
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn write() -> SyncOptions {
        SyncOptions::default()
    }

    fn assert_all_captions(handle: &MemoryHandle, expected: &str) {
        let stored = &handle.stored;
        assert_eq!(stored.text(TextField::ImageDescription), Some(expected));
        assert_eq!(
            stored.list(ListField::IptcCaption),
            Some(&[expected.to_string()][..])
        );
        let alt = stored.lang_alt(LangAltField::XmpDescription).unwrap();
        assert_eq!(alt.entries().len(), 1);
        assert_eq!(alt.get("x-default"), Some(expected));
    }

    #[test]
    fn keywords_are_joined_with_newlines() {
        assert_eq!(target_caption(&strings(&["sunset", "beach"])), "sunset\nbeach");
        assert_eq!(target_caption(&[]), "");
    }

    #[test]
    fn caption_prefers_exif() {
        let handle = MemoryHandle::with(|f| {
            f.set_text(TextField::ImageDescription, "A");
            f.set_list(ListField::IptcCaption, strings(&["B"]));
            f.set_lang_alt(LangAltField::XmpDescription, LangAlt::x_default("C"));
        });
        assert_eq!(current_caption(&handle), "A");
    }

    #[test]
    fn caption_falls_back_to_iptc() {
        let handle = MemoryHandle::with(|f| {
            f.set_list(ListField::IptcCaption, strings(&["B", "ignored"]));
            f.set_lang_alt(LangAltField::XmpDescription, LangAlt::x_default("C"));
        });
        assert_eq!(current_caption(&handle), "B");
    }

    #[test]
    fn empty_exif_does_not_win() {
        let handle = MemoryHandle::with(|f| {
            f.set_text(TextField::ImageDescription, "");
            f.set_list(ListField::IptcCaption, strings(&[""]));
            f.set_lang_alt(LangAltField::XmpDescription, LangAlt::x_default("C"));
        });
        assert_eq!(current_caption(&handle), "C");
    }

    #[test]
    fn localized_caption_prefers_default_language() {
        let handle = MemoryHandle::with(|f| {
            let mut alt = LangAlt::default();
            alt.insert("en", "Hello");
            alt.insert("x-default", "Hallo");
            f.set_lang_alt(LangAltField::XmpDescription, alt);
        });
        assert_eq!(current_caption(&handle), "Hallo");
    }

    #[test]
    fn localized_caption_strips_inline_language_prefix() {
        let handle = MemoryHandle::with(|f| {
            f.set_lang_alt(
                LangAltField::XmpDescription,
                LangAlt::x_default(r#"lang="x-default" Hallo"#),
            );
        });
        assert_eq!(current_caption(&handle), "Hallo");
    }

    #[test]
    fn no_caption_fields_means_empty() {
        assert_eq!(current_caption(&MemoryHandle::default()), "");
    }

    #[test]
    fn iptc_keywords_win_when_present_even_if_empty() {
        let handle = MemoryHandle::with(|f| {
            f.set_list(ListField::IptcKeywords, Vec::new());
            f.set_list(ListField::XmpSubject, strings(&["x"]));
        });
        assert!(keywords(&handle).is_empty());
    }

    #[test]
    fn subject_used_when_iptc_keywords_absent() {
        let handle = MemoryHandle::with(|f| {
            f.set_list(ListField::XmpSubject, strings(&["x", "y"]));
        });
        assert_eq!(keywords(&handle), strings(&["x", "y"]));
        assert!(keywords(&MemoryHandle::default()).is_empty());
    }

    #[test]
    fn writes_joined_keywords_to_all_caption_fields() {
        let mut handle = MemoryHandle::with(|f| {
            f.set_list(ListField::IptcKeywords, strings(&["sunset", "beach"]));
        });

        let outcome = reconcile_handle(&mut handle, &write()).unwrap();

        assert_eq!(
            outcome,
            Outcome::Changed(CaptionChange {
                old: String::new(),
                new: "sunset\nbeach".to_string(),
                written: true,
            })
        );
        assert_eq!(handle.flushes, 1);
        assert_all_captions(&handle, "sunset\nbeach");
    }

    #[test]
    fn second_run_is_a_no_op() {
        let mut handle = MemoryHandle::with(|f| {
            f.set_list(ListField::IptcKeywords, strings(&["a", "b"]));
            f.set_text(TextField::ImageDescription, "stale");
        });

        reconcile_handle(&mut handle, &write()).unwrap();
        let outcome = reconcile_handle(&mut handle, &write()).unwrap();

        assert_eq!(outcome, Outcome::Unchanged);
        assert_eq!(handle.flushes, 1);
    }

    #[test]
    fn dry_run_never_flushes_or_mutates() {
        let mut handle = MemoryHandle::with(|f| {
            f.set_list(ListField::IptcKeywords, strings(&["a"]));
        });
        let before = handle.fields.clone();

        let outcome = reconcile_handle(
            &mut handle,
            &SyncOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(outcome.change().map(|c| c.written), Some(false));
        assert_eq!(outcome.change().map(|c| c.new.as_str()), Some("a"));
        assert_eq!(handle.flushes, 0);
        assert_eq!(handle.fields, before);
    }

    #[test]
    fn clear_only_empties_every_caption_field() {
        let mut handle = MemoryHandle::with(|f| {
            f.set_list(ListField::IptcKeywords, strings(&["kept", "keywords"]));
            f.set_text(TextField::ImageDescription, "old caption");
        });

        let outcome = reconcile_handle(
            &mut handle,
            &SyncOptions {
                clear_only: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(outcome.change().map(|c| c.old.as_str()), Some("old caption"));
        assert_all_captions(&handle, "");
        assert_eq!(
            handle.stored.list(ListField::IptcKeywords),
            Some(&strings(&["kept", "keywords"])[..])
        );
    }

    #[test]
    fn clear_only_without_caption_is_unchanged() {
        let mut handle = MemoryHandle::with(|f| {
            f.set_list(ListField::IptcKeywords, strings(&["k"]));
        });
        let options = SyncOptions {
            clear_only: true,
            ..Default::default()
        };
        assert_eq!(reconcile_handle(&mut handle, &options).unwrap(), Outcome::Unchanged);
    }

    #[test]
    fn failed_flush_is_reported() {
        let mut handle = MemoryHandle::with(|f| {
            f.set_list(ListField::IptcKeywords, strings(&["a"]));
        });
        handle.fail_flush = true;

        let err = reconcile_handle(&mut handle, &write()).unwrap_err();
        assert!(matches!(err, SyncError::MetadataWrite { .. }));
    }

    #[test]
    fn reconcile_missing_file_fails_to_open() {
        let err = reconcile(Path::new("/nonexistent/x.jpg"), &write()).unwrap_err();
        assert!(matches!(err, SyncError::FileOpen { .. }));
    }
}
