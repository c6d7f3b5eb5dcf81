use lopdf::{decode_text_string, text_string, Dictionary, Document, Object};
use std::{collections::BTreeSet, path::Path};

use crate::{
    codec::{check_batch, is_noop, Accessor},
    commands::FileEditCmd,
    error::NotedirError,
    properties::{FileInfo, NaiveDateTime},
};

/// Reads and edits the document information dictionary of PDF files.
///
/// - The title is `/Title`.
/// - The creation date is `/CreationDate`. Any timezone is dropped.
/// - Tags are the comma-separated `/Keywords`.
///
/// Links inside PDFs are not read, so `ReplaceRef` is unsupported. Because PDFs are binary, the
/// document is always loaded from and saved to disk; [Accessor::edit_content] only reports the
/// edit as unsupported.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfAccessor;

/// The metadata fields this accessor manages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PdfMeta {
    title: Option<String>,
    created: Option<NaiveDateTime>,
    tags: BTreeSet<String>,
}

impl PdfMeta {
    fn read(doc: &Document) -> PdfMeta {
        let Some(info) = info_dict(doc) else {
            return PdfMeta::default();
        };
        let text = |key: &[u8]| {
            info.get(key)
                .ok()
                .and_then(|value| decode_text_string(value).ok())
                .filter(|value| !value.trim().is_empty())
        };
        PdfMeta {
            title: text(b"Title"),
            created: text(b"CreationDate").and_then(|raw| parse_pdf_date(&raw)),
            tags: text(b"Keywords")
                .map(|keywords| {
                    keywords
                        .split(',')
                        .map(|tag| tag.trim().to_lowercase())
                        .filter(|tag| !tag.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    fn into_info(self, path: &Path) -> FileInfo {
        let mut info = FileInfo::new(path);
        info.title = self.title;
        info.created = self.created;
        info.tags = self.tags;
        info
    }

    fn apply(&mut self, edit: &FileEditCmd) -> Result<(), NotedirError> {
        match edit {
            FileEditCmd::SetTitle { value, .. } => self.title = value.clone(),
            FileEditCmd::SetCreated { value, .. } => self.created = *value,
            FileEditCmd::AddTag { value, .. } => {
                self.tags.insert(value.to_lowercase());
            }
            FileEditCmd::DelTag { value, .. } => {
                self.tags.remove(&value.to_lowercase());
            }
            FileEditCmd::ReplaceRef { .. }
            | FileEditCmd::Move { .. }
            | FileEditCmd::Create { .. } => {
                return Err(NotedirError::UnsupportedChange(edit.to_string()))
            }
        }
        Ok(())
    }

    /// Write the fields that differ from `before` into the document's info dictionary.
    fn write(&self, before: &PdfMeta, doc: &mut Document) -> Result<(), lopdf::Error> {
        let info = info_dict_mut(doc)?;
        let mut set = |key: &str, value: Option<String>| match value {
            Some(value) => info.set(key, text_string(&value)),
            None => {
                info.remove(key.as_bytes());
            }
        };
        if self.title != before.title {
            set("Title", self.title.clone());
        }
        if self.created != before.created {
            set("CreationDate", self.created.map(format_pdf_date));
        }
        if self.tags != before.tags {
            let joined = self.tags.iter().cloned().collect::<Vec<_>>().join(", ");
            set("Keywords", (!joined.is_empty()).then_some(joined));
        }
        Ok(())
    }
}

fn info_dict(doc: &Document) -> Option<&Dictionary> {
    match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_object(*id).ok()?.as_dict().ok(),
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

/// The info dictionary as an indirect object, creating it if the document has none.
fn info_dict_mut(doc: &mut Document) -> Result<&mut Dictionary, lopdf::Error> {
    let existing = doc.trailer.get(b"Info").ok().cloned();
    let id = match existing {
        Some(Object::Reference(id)) => id,
        Some(Object::Dictionary(dict)) => doc.add_object(dict),
        _ => doc.add_object(Dictionary::new()),
    };
    doc.trailer.set("Info", id);
    doc.get_object_mut(id)?.as_dict_mut()
}

/// Parse a PDF date such as `D:20200702174340Z00'00'`. Missing trailing fields default to the
/// start of the period, and the timezone is ignored.
fn parse_pdf_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    let digits = raw
        .strip_prefix("D:")
        .unwrap_or(raw)
        .chars()
        .take_while(char::is_ascii_digit)
        .take(14)
        .collect::<String>();
    if digits.len() < 4 {
        return None;
    }
    let field = |start: usize, default: u32| {
        digits
            .get(start..start + 2)
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(default)
    };
    let year = digits[..4].parse::<i32>().ok()?;
    chrono::NaiveDate::from_ymd_opt(year, field(4, 1), field(6, 1))?.and_hms_opt(
        field(8, 0),
        field(10, 0),
        field(12, 0),
    )
}

fn format_pdf_date(created: NaiveDateTime) -> String {
    created.format("D:%Y%m%d%H%M%S").to_string()
}

fn load(path: &Path) -> Result<Document, NotedirError> {
    Document::load(path)
        .map_err(|e| NotedirError::parse(path, "Could not read PDF", Some(e.to_string())))
}

impl Accessor for PdfAccessor {
    fn parse_content(&self, path: &Path, content: &str) -> Result<FileInfo, NotedirError> {
        let doc = Document::load_mem(content.as_bytes())
            .map_err(|e| NotedirError::parse(path, "Could not read PDF", Some(e.to_string())))?;
        Ok(PdfMeta::read(&doc).into_info(path))
    }

    fn edit_content(
        &self,
        _path: &Path,
        _content: &str,
        edit: &FileEditCmd,
    ) -> Result<String, NotedirError> {
        Err(NotedirError::UnsupportedChange(edit.to_string()))
    }

    fn replace_refs(
        &self,
        path: &Path,
        _content: &str,
        replacements: &[(&str, &str)],
    ) -> Result<String, NotedirError> {
        let (original, replacement) = replacements.first().copied().unwrap_or_default();
        Err(NotedirError::UnsupportedChange(
            FileEditCmd::replace_ref(path, original, replacement).to_string(),
        ))
    }

    fn parse(&self, path: &Path) -> Result<FileInfo, NotedirError> {
        Ok(PdfMeta::read(&load(path)?).into_info(path))
    }

    fn apply(&self, edits: &[FileEditCmd]) -> Result<bool, NotedirError> {
        let Some(first) = edits.first() else {
            return Ok(false);
        };
        let path = first.path();
        check_batch(path, edits)?;
        let edits = edits.iter().filter(|edit| !is_noop(edit)).collect::<Vec<_>>();
        if edits.is_empty() {
            return Ok(false);
        }

        let mut doc = load(path)?;
        let before = PdfMeta::read(&doc);
        let mut after = before.clone();
        for edit in edits {
            after.apply(edit)?;
        }
        if after == before {
            return Ok(false);
        }
        after
            .write(&before, &mut doc)
            .map_err(|e| NotedirError::change(path, format!("Invalid PDF metadata: {e}")))?;
        doc.save(path)
            .map_err(|e| NotedirError::change(path, format!("Could not write PDF: {e}")))?;
        tracing::debug!("Rewrote PDF metadata of {path:?}");
        Ok(true)
    }
}
