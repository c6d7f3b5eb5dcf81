//! Reading and rewriting individual documents.
//!
//! An [`Accessor`] knows one file format. It extracts a [`FileInfo`] from a document (refs, tags,
//! title, created) and applies [`FileEditCmd`]s to it. Nothing outside this module interprets
//! document content.
//!
//! ## Built-in Accessors
//!
//! - **Markdown** (`.md`, `.markdown`) - via [`md::MdAccessor`]
//! - **HTML** (`.html`, `.htm`) - via [`html::HtmlAccessor`]
//! - **PDF** (`.pdf`) - via [`pdf::PdfAccessor`], metadata only
//! - **Generic** (everything else) - via [`GenericAccessor`], which knows nothing beyond the path
//!   and supports no edits.
//!
//! Selection is purely by file extension, see [`AccessorKind::for_path`].
use std::{
    fmt::{Display, Formatter},
    ops::Range,
    path::Path,
};

use crate::{
    commands::FileEditCmd,
    config::{get_content, set_content},
    error::NotedirError,
    properties::FileInfo,
};

pub mod html;
pub mod md;
pub mod pdf;

pub trait Accessor: Sync {
    /// Extract everything knowable about the document at `path` from its `content`. Only
    /// `backlinks` is left empty.
    fn parse_content(&self, path: &Path, content: &str) -> Result<FileInfo, NotedirError>;

    /// Apply a single edit to `content`, returning the new content. Edits that do not change
    /// anything return the content unchanged.
    fn edit_content(
        &self,
        path: &Path,
        content: &str,
        edit: &FileEditCmd,
    ) -> Result<String, NotedirError>;

    /// Rewrite several hrefs in one pass. Every `(original, replacement)` pair is located in
    /// `content` before anything is replaced, so swapping two hrefs works. An original that
    /// does not occur in the document is an error.
    fn replace_refs(
        &self,
        path: &Path,
        content: &str,
        replacements: &[(&str, &str)],
    ) -> Result<String, NotedirError>;

    /// Read and parse the file at `path`. Any failure, including failure to read the file, is a
    /// [`NotedirError::Parse`].
    fn parse(&self, path: &Path) -> Result<FileInfo, NotedirError> {
        let content = get_content(path).map_err(|e| {
            NotedirError::parse(path, "Could not read file", Some(e.to_string()))
        })?;
        self.parse_content(path, &content)
    }

    /// Apply a batch of edits that all target the same file, writing the file once at the end.
    /// Returns whether the file changed.
    fn apply(&self, edits: &[FileEditCmd]) -> Result<bool, NotedirError> {
        let Some(first) = edits.first() else {
            return Ok(false);
        };
        let path = first.path();
        check_batch(path, edits)?;
        let original = get_content(path)?;
        let replacements = edits
            .iter()
            .filter(|edit| !is_noop(edit))
            .filter_map(|edit| match edit {
                FileEditCmd::ReplaceRef {
                    original,
                    replacement,
                    ..
                } => Some((original.as_str(), replacement.as_str())),
                _ => None,
            })
            .collect::<Vec<_>>();
        let mut content = if replacements.is_empty() {
            original.clone()
        } else {
            self.replace_refs(path, &original, &replacements)?
        };
        for edit in edits
            .iter()
            .filter(|edit| !matches!(edit, FileEditCmd::ReplaceRef { .. }))
        {
            content = self.edit_content(path, &content, edit)?;
        }
        if content == original {
            return Ok(false);
        }
        set_content(path, &content)?;
        Ok(true)
    }
}

/// Edits in one accessor batch must all target `path`, and none may be a filesystem operation.
fn check_batch(path: &Path, edits: &[FileEditCmd]) -> Result<(), NotedirError> {
    for edit in edits.iter() {
        if edit.path() != path {
            return Err(NotedirError::Command(format!(
                "Accessor batch for {path:?} contains an edit for another path: {edit}"
            )));
        }
        if edit.is_filesystem_op() {
            return Err(NotedirError::UnsupportedChange(edit.to_string()));
        }
    }
    Ok(())
}

/// Replace every range `locate` finds for each original with `render(replacement)`, all
/// against the unmodified `content`.
pub(crate) fn splice_hrefs(
    path: &Path,
    content: &str,
    replacements: &[(&str, &str)],
    locate: impl Fn(&str) -> Vec<Range<usize>>,
    render: impl Fn(&str) -> String,
) -> Result<String, NotedirError> {
    let mut spans = Vec::new();
    for &(original, replacement) in replacements.iter().filter(|(o, r)| o != r) {
        let found = locate(original);
        if found.is_empty() {
            return Err(NotedirError::change(
                path,
                format!("Could not find href {original:?} to replace"),
            ));
        }
        let rendered = render(replacement);
        spans.extend(found.into_iter().map(|range| (range, rendered.clone())));
    }
    spans.sort_by_key(|(range, _)| (range.start, range.end));
    spans.dedup_by(|later, earlier| later.0 == earlier.0);
    if spans.windows(2).any(|pair| pair[0].0.end > pair[1].0.start) {
        return Err(NotedirError::change(path, "Overlapping hrefs to replace"));
    }

    let mut changed = String::with_capacity(content.len());
    let mut copied = 0;
    for (range, text) in spans.iter() {
        changed.push_str(&content[copied..range.start]);
        changed.push_str(text);
        copied = range.end;
    }
    changed.push_str(&content[copied..]);
    Ok(changed)
}

/// Replacing an href with itself never needs to touch the document.
fn is_noop(edit: &FileEditCmd) -> bool {
    matches!(edit, FileEditCmd::ReplaceRef { original, replacement, .. } if original == replacement)
}

/// File formats with dedicated handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessorKind {
    Markdown,
    Html,
    Pdf,
    Generic,
}

impl AccessorKind {
    pub fn for_path(path: &Path) -> AccessorKind {
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "md" | "markdown" => AccessorKind::Markdown,
            "html" | "htm" => AccessorKind::Html,
            "pdf" => AccessorKind::Pdf,
            _ => AccessorKind::Generic,
        }
    }

    pub fn accessor(&self) -> &'static dyn Accessor {
        match self {
            AccessorKind::Markdown => &md::MdAccessor,
            AccessorKind::Html => &html::HtmlAccessor,
            AccessorKind::Pdf => &pdf::PdfAccessor,
            AccessorKind::Generic => &GenericAccessor,
        }
    }
}

impl Display for AccessorKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The accessor responsible for `path`.
pub fn accessor_for(path: &Path) -> &'static dyn Accessor {
    AccessorKind::for_path(path).accessor()
}

/// Works for any path, even a folder or a path that does not exist. Only the path is reported and
/// no edits are supported.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericAccessor;

impl Accessor for GenericAccessor {
    fn parse_content(&self, path: &Path, _content: &str) -> Result<FileInfo, NotedirError> {
        Ok(FileInfo::new(path))
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
        Ok(FileInfo::new(path))
    }

    fn apply(&self, edits: &[FileEditCmd]) -> Result<bool, NotedirError> {
        match edits.iter().find(|edit| !is_noop(edit)) {
            Some(edit) => Err(NotedirError::UnsupportedChange(edit.to_string())),
            None => Ok(false),
        }
    }
}
